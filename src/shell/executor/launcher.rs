use std::convert::Infallible;
use std::env;
use std::ffi::CString;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process;

use log::debug;
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execv, fork, ForkResult, Pid};

use crate::shell::error::ShellError;
use crate::shell::job_manager::JOBS;
use crate::shell::signals;
use crate::utils::config::Config;
use crate::utils::path::{basename, file_exists, resolve_in_path};

pub const EXIT_FAILURE: i32 = 1;

/// Forks. The child resets its signal handling, forgets the parent's
/// background jobs, runs `body` and exits with the status it returns; only
/// the parent comes back from this function.
pub fn spawn<F>(body: F) -> Result<Pid, ShellError>
where
    F: FnOnce() -> i32,
{
    // buffered output must not be written twice
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    // SAFETY: the interpreter is single threaded
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!("forked child {}", child);
            Ok(child)
        }
        Ok(ForkResult::Child) => {
            signals::reset_child_signals();
            JOBS.forget_all();
            let status = body();
            process::exit(status)
        }
        Err(e) => Err(ShellError::Fork(e)),
    }
}

/// Blocks until `child` terminates. A normal exit yields its exit code, a
/// termination by signal yields failure.
pub fn wait_for(child: Pid) -> Result<i32, ShellError> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                debug!("child {} killed by {}", child, signal);
                return Ok(EXIT_FAILURE);
            }
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(ShellError::Wait(e)),
        }
    }
}

/// Runs an external program in a child process and waits for it.
pub fn run_external(arguments: &[String], config: &Config) -> Result<i32, ShellError> {
    let child = spawn(|| exec_program(arguments, config))?;
    wait_for(child)
}

/// Where `program` would be executed from: names with a slash are used as
/// given, anything else is looked up along the search path.
pub fn locate(program: &str, path_list: &str) -> PathBuf {
    if program.contains('/') {
        return PathBuf::from(program);
    }
    resolve_in_path(program, path_list).unwrap_or_else(|| PathBuf::from(program))
}

/// Replaces the current process image. Only returns on failure, with the
/// status the child should exit with.
fn exec_program(arguments: &[String], config: &Config) -> i32 {
    let Some(program) = arguments.first() else {
        return 0;
    };
    let path = locate(program, &config.path);

    let Err(err) = exec_file(&path, arguments);
    if runs_as_script(&path, err) {
        debug!("{} is not a binary, running it as a script", path.display());
        let Err(e) = exec_script(&path, config);
        debug!("script fallback failed: {}", e);
    }

    eprintln!("{}: {}: {}", config.name, program, err.desc());
    EXIT_FAILURE
}

fn runs_as_script(path: &Path, err: Errno) -> bool {
    file_exists(path)
        && (err == Errno::ENOEXEC || path.extension().is_some_and(|ext| ext == "sh"))
}

fn to_cstring(bytes: &[u8]) -> Result<CString, Errno> {
    CString::new(bytes).map_err(|_| Errno::EINVAL)
}

fn exec_file(path: &Path, arguments: &[String]) -> Result<Infallible, Errno> {
    let c_path = to_cstring(path.as_os_str().as_bytes())?;
    let program = path.to_string_lossy();

    let mut argv = Vec::with_capacity(arguments.len());
    argv.push(to_cstring(basename(&program).as_bytes())?);
    for argument in &arguments[1..] {
        argv.push(to_cstring(argument.as_bytes())?);
    }
    execv(&c_path, &argv)
}

/// Re-runs this interpreter with `script` as its input file.
fn exec_script(script: &Path, config: &Config) -> Result<Infallible, Errno> {
    let interpreter = env::current_exe().map_err(|_| Errno::ENOENT)?;
    let c_path = to_cstring(interpreter.as_os_str().as_bytes())?;
    let argv = [
        to_cstring(config.name.as_bytes())?,
        to_cstring(script.as_os_str().as_bytes())?,
    ];
    execv(&c_path, &argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_locate() {
        assert_eq!(locate("./run", "/bin"), PathBuf::from("./run"));
        assert_eq!(locate("/bin/sh", "/nowhere"), PathBuf::from("/bin/sh"));
        assert_eq!(locate("sh", "/nowhere:/bin"), PathBuf::from("/bin/sh"));
        assert_eq!(
            locate("no-such-program-here", "/bin"),
            PathBuf::from("no-such-program-here")
        );
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_runs_as_script() {
        let dir = env::temp_dir().join(format!("myshell-launcher-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        let script = dir.join("job.sh");
        let data = dir.join("notes.txt");
        fs::write(&script, "echo hi\n").unwrap();
        fs::write(&data, "echo hi\n").unwrap();

        assert!(runs_as_script(&script, Errno::EACCES));
        assert!(runs_as_script(&data, Errno::ENOEXEC));
        assert!(!runs_as_script(&data, Errno::EACCES));
        assert!(!runs_as_script(&dir.join("missing.sh"), Errno::ENOENT));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_exit_status_of_children() {
        let child = spawn(|| 3).unwrap();
        assert_eq!(wait_for(child).unwrap(), 3);

        let config = Config::default();
        let args = vec!["false".to_string()];
        assert_eq!(run_external(&args, &config).unwrap(), 1);
    }
}
