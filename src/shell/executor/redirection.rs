use std::io::{self, Write};
use std::os::fd::RawFd;

use log::{debug, warn};
use nix::fcntl::{fcntl, open, FcntlArg, OFlag};
use nix::libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};

use crate::shell::error::ShellError;
use crate::shell::parser::Redirection;

// saved copies live above the descriptors children normally use
const SAVED_FD_MIN: RawFd = 10;

/// Copies of standard input and output taken before a redirection.
///
/// Dropping it restores the originals, so the interpreter's own streams
/// come back however the redirected command ended.
#[derive(Debug, Default)]
pub struct SavedFds {
    stdin: Option<RawFd>,
    stdout: Option<RawFd>,
}

impl SavedFds {
    /// Puts standard input and output back and closes the saved copies.
    pub fn restore(mut self) {
        self.restore_in_place();
    }

    fn restore_in_place(&mut self) {
        if self.stdin.is_none() && self.stdout.is_none() {
            return;
        }
        let _ = io::stdout().flush();
        if let Some(saved) = self.stdin.take() {
            put_back(saved, STDIN_FILENO);
        }
        if let Some(saved) = self.stdout.take() {
            put_back(saved, STDOUT_FILENO);
        }
    }
}

impl Drop for SavedFds {
    fn drop(&mut self) {
        self.restore_in_place();
    }
}

fn put_back(saved: RawFd, target: RawFd) {
    if let Err(e) = dup2(saved, target) {
        warn!("cannot restore descriptor {}: {}", target, e);
    }
    let _ = close(saved);
}

pub fn output_flags(append: bool) -> OFlag {
    let mode = if append {
        OFlag::O_APPEND
    } else {
        OFlag::O_TRUNC
    };
    OFlag::O_WRONLY | OFlag::O_CREAT | mode | OFlag::O_CLOEXEC
}

/// Opens the files named by `redirect` and installs them as standard
/// output and input, output first. If the input file cannot be opened the
/// output redirection is undone before the error is returned.
pub fn apply(redirect: &Redirection) -> Result<SavedFds, ShellError> {
    let mut saved = SavedFds::default();
    if redirect.is_empty() {
        return Ok(saved);
    }
    let _ = io::stdout().flush();

    if let Some(path) = &redirect.output {
        saved.stdout = Some(replace(path, output_flags(redirect.append), STDOUT_FILENO)?);
        debug!("stdout redirected to {}", path);
    }
    if let Some(path) = &redirect.input {
        // on error `saved` drops here and undoes the output side
        saved.stdin = Some(replace(path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, STDIN_FILENO)?);
        debug!("stdin redirected from {}", path);
    }
    Ok(saved)
}

/// Points `target` at `path` and returns a close-on-exec copy of what
/// `target` referred to before.
fn replace(path: &str, flags: OFlag, target: RawFd) -> Result<RawFd, ShellError> {
    let file = open(path, flags, Mode::from_bits_truncate(0o644)).map_err(|source| {
        ShellError::Redirect {
            path: path.to_string(),
            source,
        }
    })?;

    let saved = match fcntl(target, FcntlArg::F_DUPFD_CLOEXEC(SAVED_FD_MIN)) {
        Ok(fd) => fd,
        Err(e) => {
            let _ = close(file);
            return Err(ShellError::Descriptor(e));
        }
    };

    let result = dup2(file, target);
    let _ = close(file);
    if let Err(e) = result {
        let _ = close(saved);
        return Err(ShellError::Descriptor(e));
    }
    Ok(saved)
}
