use std::fmt::{self, Write};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use once_cell::sync::OnceCell;

use super::signals;

/// Most background jobs alive at once. The table is updated from the
/// SIGCHLD handler, so it cannot grow; a launch beyond this fails with
/// `ShellError::TooManyJobs` and nothing is forked.
pub const MAX_JOBS: usize = 256;

/// Background jobs of this interpreter process.
pub static JOBS: JobTable = JobTable::new();

static PROGRAM_NAME: OnceCell<String> = OnceCell::new();

pub fn set_program_name(name: &str) {
    let _ = PROGRAM_NAME.set(name.to_string());
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: AtomicI32 = AtomicI32::new(0);

/// A fixed-capacity set of process ids.
///
/// Every operation is a handful of atomic loads and compare-exchanges, so
/// the table can be mutated from the SIGCHLD handler while the interpreter
/// is in the middle of updating it. A slot holding 0 is free.
pub struct JobTable {
    slots: [AtomicI32; MAX_JOBS],
    len: AtomicUsize,
}

impl JobTable {
    pub const fn new() -> Self {
        Self {
            slots: [EMPTY_SLOT; MAX_JOBS],
            len: AtomicUsize::new(0),
        }
    }

    /// Adds `pid`. Returns false if the table is full or the pid is invalid.
    pub fn track(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        if self.contains(pid) {
            return true;
        }
        for slot in &self.slots {
            if slot
                .compare_exchange(0, pid, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.len.fetch_add(1, Ordering::AcqRel);
                return true;
            }
        }
        false
    }

    /// Removes `pid`. Only one caller can ever observe `true` for a given
    /// entry.
    pub fn untrack(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        for slot in &self.slots {
            if slot
                .compare_exchange(pid, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::AcqRel);
                return true;
            }
        }
        false
    }

    pub fn contains(&self, pid: i32) -> bool {
        pid > 0 && self.pids().any(|p| p == pid)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= MAX_JOBS
    }

    pub fn pids(&self) -> impl Iterator<Item = i32> + '_ {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .filter(|&pid| pid > 0)
    }

    /// Forgets every entry without signalling anyone. A forked child calls
    /// this so it never acts on its parent's jobs.
    pub fn forget_all(&self) {
        for pid in self.pids() {
            self.untrack(pid);
        }
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

/// How a reaped background job ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobStatus {
    Exited(i32),
    Killed(Signal),
}

/// Collects every tracked child that has terminated, without blocking.
///
/// Only tracked pids are waited for, so foreground children are never
/// reaped behind the interpreter's back. Runs in signal context: no
/// allocation, no locks.
pub fn reap_finished<F>(table: &JobTable, mut report: F)
where
    F: FnMut(i32, JobStatus),
{
    for pid in table.pids() {
        let status = match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => JobStatus::Exited(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => JobStatus::Killed(signal),
            Ok(_) => continue,
            // reaped by someone else: the entry is stale
            Err(Errno::ECHILD) => {
                table.untrack(pid);
                continue;
            }
            Err(_) => continue,
        };
        if table.untrack(pid) {
            report(pid, status);
        }
    }
}

/// Sends SIGTERM to the process group of every tracked job and forgets
/// it. Does not wait.
pub fn drain(table: &JobTable) {
    for pid in table.pids() {
        if table.untrack(pid) {
            match terminate(pid) {
                Ok(()) => debug!("sent SIGTERM to background job {}", pid),
                Err(e) => debug!("kill {} failed: {}", pid, e),
            }
        }
    }
    signals::uninstall_sigchld_handler();
}

/// Signals the job's whole process group, or just the job when it never
/// became a group leader.
fn terminate(pid: i32) -> nix::Result<()> {
    match kill(Pid::from_raw(-pid), Signal::SIGTERM) {
        Err(Errno::ESRCH) => kill(Pid::from_raw(pid), Signal::SIGTERM),
        result => result,
    }
}

/// Fixed buffer formatter, usable where allocation is not.
struct StackBuf {
    buf: [u8; 160],
    len: usize,
}

impl Write for StackBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let room = self.buf.len() - self.len;
        let n = bytes.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        if n < bytes.len() {
            return Err(fmt::Error);
        }
        Ok(())
    }
}

fn format_report(out: &mut impl Write, name: &str, pid: i32, status: JobStatus) -> fmt::Result {
    match status {
        JobStatus::Exited(code) => writeln!(out, "{}: [{}] exited with status {}", name, pid, code),
        JobStatus::Killed(signal) => {
            writeln!(out, "{}: [{}] killed by {}", name, pid, signal.as_str())
        }
    }
}

/// Writes a job report straight to file descriptor 2.
pub fn report_to_stderr(pid: i32, status: JobStatus) {
    let name = PROGRAM_NAME.get().map(String::as_str).unwrap_or("myshell");
    let mut out = StackBuf {
        buf: [0; 160],
        len: 0,
    };
    let _ = format_report(&mut out, name, pid, status);
    // SAFETY: write(2) is async-signal-safe and the buffer outlives the call
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            out.buf.as_ptr() as *const libc::c_void,
            out.len,
        );
    }
}

/// Serialises tests that touch `JOBS` or the SIGCHLD disposition.
#[cfg(test)]
pub fn lock_for_tests() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{fork, pipe, setpgid, write, ForkResult};
    use std::fs::File;
    use std::io::Read;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_track_and_untrack() {
        let table = JobTable::new();
        assert!(table.is_empty());
        assert!(table.track(100));
        assert!(table.track(200));
        // tracking twice keeps a single entry
        assert!(table.track(100));
        assert_eq!(table.len(), 2);
        assert!(table.contains(200));

        assert!(table.untrack(100));
        assert!(!table.untrack(100));
        assert_eq!(table.len(), 1);
        assert!(!table.contains(100));
        assert_eq!(table.pids().collect::<Vec<_>>(), vec![200]);
    }

    #[test]
    fn test_rejects_invalid_pids() {
        let table = JobTable::new();
        assert!(!table.track(0));
        assert!(!table.track(-1));
        assert!(!table.untrack(0));
        assert!(table.is_empty());
    }

    #[test]
    fn test_full_table() {
        let table = JobTable::new();
        for pid in 1..=MAX_JOBS as i32 {
            assert!(table.track(pid));
        }
        assert!(table.is_full());
        assert!(!table.track(MAX_JOBS as i32 + 1));
        assert!(table.untrack(7));
        assert!(table.track(MAX_JOBS as i32 + 1));
    }

    #[test]
    fn test_forget_all() {
        let table = JobTable::new();
        table.track(11);
        table.track(12);
        table.forget_all();
        assert!(table.is_empty());
        assert_eq!(table.pids().count(), 0);
    }

    #[test]
    fn test_reap_drops_entries_that_are_not_our_children() {
        let table = JobTable::new();
        // pid 1 is never a child of the test process
        table.track(1);
        let mut reports = Vec::new();
        reap_finished(&table, |pid, status| reports.push((pid, status)));
        assert!(table.is_empty());
        assert!(reports.is_empty());
    }

    #[test]
    fn test_report_format() {
        let mut out = String::new();
        format_report(&mut out, "myshell", 42, JobStatus::Exited(3)).ok();
        format_report(&mut out, "myshell", 43, JobStatus::Killed(Signal::SIGTERM)).ok();
        assert_eq!(
            out,
            "myshell: [42] exited with status 3\nmyshell: [43] killed by SIGTERM\n"
        );
    }

    #[test]
    fn test_stack_buf_truncates() {
        let mut out = StackBuf {
            buf: [0; 160],
            len: 0,
        };
        let long = "x".repeat(200);
        assert!(out.write_str(&long).is_err());
        assert_eq!(out.len, 160);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_reap_collects_a_finished_child() {
        // SAFETY: the child only calls _exit
        let child = match unsafe { fork() }.unwrap() {
            ForkResult::Child => unsafe { libc::_exit(7) },
            ForkResult::Parent { child } => child,
        };
        let table = JobTable::new();
        assert!(table.track(child.as_raw()));
        assert_eq!(table.len(), 1);

        let mut reports = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !table.is_empty() && Instant::now() < deadline {
            reap_finished(&table, |pid, status| reports.push((pid, status)));
            thread::sleep(Duration::from_millis(10));
        }
        assert!(table.is_empty());
        assert_eq!(reports, vec![(child.as_raw(), JobStatus::Exited(7))]);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_drain_terminates_the_whole_job() {
        let _lock = lock_for_tests();
        let (read_end, write_end) = pipe().unwrap();

        // the job forks a grandchild holding the write end, as a background
        // subtree running an external command does
        // SAFETY: both children only use async-signal-safe calls
        let child = match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                drop(read_end);
                let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
                if let Ok(ForkResult::Child) = unsafe { fork() } {
                    let _ = write(&write_end, b"x");
                }
                loop {
                    unsafe { libc::pause() };
                }
            }
            ForkResult::Parent { child } => child,
        };
        drop(write_end);
        let _ = setpgid(child, child);

        let mut reader = File::from(read_end);
        let mut ready = [0u8; 1];
        reader.read_exact(&mut ready).unwrap();

        let table = JobTable::new();
        assert!(table.track(child.as_raw()));
        drain(&table);
        assert!(table.is_empty());

        // end of file only once the grandchild is gone too
        let (done, finished) = mpsc::channel();
        thread::spawn(move || {
            let mut rest = Vec::new();
            let _ = reader.read_to_end(&mut rest);
            let _ = done.send(());
        });
        assert!(finished.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(matches!(
            waitpid(child, None),
            Ok(WaitStatus::Signaled(_, Signal::SIGTERM, _))
        ));
    }
}
