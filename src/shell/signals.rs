use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use nix::sys::signal::{
    sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};

use super::job_manager::{self, JOBS};
use crate::shell::error::ShellError;

static SIGCHLD_INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigchld(_signum: libc::c_int) {
    let saved = errno::errno();
    job_manager::reap_finished(&JOBS, job_manager::report_to_stderr);
    if JOBS.is_empty() {
        uninstall_sigchld_handler();
    }
    errno::set_errno(saved);
}

/// Installs the background-job reaper. Called before every background
/// launch; installing an installed handler is a no-op.
pub fn setup_sigchld_handler() -> Result<(), ShellError> {
    if SIGCHLD_INSTALLED.load(Ordering::Acquire) {
        return Ok(());
    }
    let action = SigAction::new(
        SigHandler::Handler(on_sigchld),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    // SAFETY: the handler only touches atomics, waitpid and write(2)
    unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(ShellError::Signal)?;
    SIGCHLD_INSTALLED.store(true, Ordering::Release);
    debug!("SIGCHLD handler installed");
    Ok(())
}

/// Restores the default SIGCHLD disposition. Async-signal-safe.
pub fn uninstall_sigchld_handler() {
    if !SIGCHLD_INSTALLED.swap(false, Ordering::AcqRel) {
        return;
    }
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: resetting to the default disposition
    let _ = unsafe { sigaction(Signal::SIGCHLD, &action) };
}

/// Keeps SIGCHLD pending while alive; the previous mask comes back on drop.
pub struct SigchldBlock {
    previous: SigSet,
}

pub fn block_sigchld() -> Result<SigchldBlock, ShellError> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    let mut previous = SigSet::empty();
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous))
        .map_err(ShellError::Signal)?;
    Ok(SigchldBlock { previous })
}

impl Drop for SigchldBlock {
    fn drop(&mut self) {
        let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
    }
}

fn set_disposition(signal: Signal, handler: SigHandler) {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // SAFETY: only SigIgn and SigDfl are passed here
    if let Err(e) = unsafe { sigaction(signal, &action) } {
        debug!("cannot set disposition of {}: {}", signal, e);
    }
}

/// An interactive interpreter survives the keyboard signals meant for its
/// foreground children.
pub fn ignore_interactive_signals() {
    set_disposition(Signal::SIGINT, SigHandler::SigIgn);
    set_disposition(Signal::SIGQUIT, SigHandler::SigIgn);
}

/// Puts a freshly forked child back to default signal handling.
pub fn reset_child_signals() {
    set_disposition(Signal::SIGINT, SigHandler::SigDfl);
    set_disposition(Signal::SIGQUIT, SigHandler::SigDfl);
    set_disposition(Signal::SIGCHLD, SigHandler::SigDfl);
    SIGCHLD_INSTALLED.store(false, Ordering::Release);

    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_block_guard_restores_mask() {
        let mut before = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, None, Some(&mut before)).unwrap();
        let was_blocked = before.contains(Signal::SIGCHLD);
        {
            let _guard = block_sigchld().unwrap();
            let mut during = SigSet::empty();
            sigprocmask(SigmaskHow::SIG_BLOCK, None, Some(&mut during)).unwrap();
            assert!(during.contains(Signal::SIGCHLD));
        }
        let mut after = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, None, Some(&mut after)).unwrap();
        assert_eq!(after.contains(Signal::SIGCHLD), was_blocked);
    }

    fn sigchld_is_default() -> bool {
        // SAFETY: a null new action only queries the disposition
        unsafe {
            let mut current: libc::sigaction = std::mem::zeroed();
            libc::sigaction(libc::SIGCHLD, std::ptr::null(), &mut current);
            current.sa_sigaction == libc::SIG_DFL
        }
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_handler_reaps_job_and_uninstalls_itself() {
        use nix::unistd::{fork, pipe, read, write, ForkResult};
        use std::os::fd::AsRawFd;
        use std::thread;
        use std::time::{Duration, Instant};

        let _lock = job_manager::lock_for_tests();
        let (read_end, write_end) = pipe().unwrap();

        // SAFETY: the child only reads a byte and calls _exit
        let child = match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let mut go = [0u8; 1];
                let _ = read(read_end.as_raw_fd(), &mut go);
                unsafe { libc::_exit(0) }
            }
            ForkResult::Parent { child } => child,
        };
        drop(read_end);

        assert!(JOBS.track(child.as_raw()));
        assert_eq!(JOBS.len(), 1);
        setup_sigchld_handler().unwrap();
        assert!(!sigchld_is_default());

        write(&write_end, b"x").unwrap();
        drop(write_end);

        let deadline = Instant::now() + Duration::from_secs(5);
        while JOBS.contains(child.as_raw()) || !sigchld_is_default() {
            if Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(JOBS.is_empty());
        assert!(sigchld_is_default());
    }
}
