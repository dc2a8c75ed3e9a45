use std::os::fd::AsRawFd;
use std::time::Instant;

use log::{debug, warn};
use nix::fcntl::OFlag;
use nix::libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{close, dup2, pipe2, setpgid, Pid};

use crate::shell::error::ShellError;
use crate::shell::job_manager::JOBS;
use crate::shell::parser::ast::{Command, Node, Redirection};
use crate::shell::signals;
use crate::utils::config::Config;

use super::builtins::{self, Builtin};
use super::launcher::{self, EXIT_FAILURE};
use super::redirection;

/// Walks command trees, running every node in this process or in forked
/// children, and remembers the status of the last node it ran.
pub struct Executor<'a> {
    config: &'a Config,
    last_status: i32,
}

impl<'a> Executor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            last_status: 0,
        }
    }

    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    pub fn set_last_status(&mut self, status: i32) {
        self.last_status = status;
    }

    /// Runs `node` and returns its status.
    ///
    /// Errors that only concern this node are reported and turned into a
    /// failure status. `Exit` and fatal process-control errors are passed
    /// up to the caller.
    pub fn execute(&mut self, node: &Node) -> Result<i32, ShellError> {
        let result = match node {
            Node::Command(command) => self.execute_command(command),
            Node::Sequence { left, right } => self.execute_sequence(left, right.as_deref()),
            Node::Background { left, right } => self.execute_background(left, right.as_deref()),
            Node::And { left, right } => self.execute_and(left, right),
            Node::Or { left, right } => self.execute_or(left, right),
            Node::Subshell { body, redirect } => self.execute_subshell(body, redirect),
            Node::Pipe { left, right } => self.execute_pipe(left, right),
        };

        let status = match result {
            Ok(status) => status,
            Err(e) if matches!(e, ShellError::Exit(_)) || e.is_fatal() => return Err(e),
            Err(e) => {
                eprintln!("{}: {}", self.config.name, e);
                EXIT_FAILURE
            }
        };
        self.last_status = status;
        Ok(status)
    }

    /// Entry point of a forked child: runs `node` and maps the outcome to
    /// the status the child exits with.
    fn execute_in_child(&mut self, node: &Node) -> i32 {
        match self.execute(node) {
            Ok(status) => status,
            Err(ShellError::Exit(code)) => code,
            Err(e) => {
                eprintln!("{}: {}", self.config.name, e);
                EXIT_FAILURE
            }
        }
    }

    fn execute_command(&mut self, command: &Command) -> Result<i32, ShellError> {
        let saved = redirection::apply(&command.redirect)?;
        let result = self.run_command(&command.arguments, command.attached.as_deref());
        saved.restore();
        result
    }

    fn run_command(
        &mut self,
        arguments: &[String],
        attached: Option<&Node>,
    ) -> Result<i32, ShellError> {
        let Some(program) = arguments.first() else {
            return Ok(0);
        };
        match Builtin::from_name(program) {
            Some(Builtin::Cd) => Ok(builtins::cd(arguments, self.config)),
            Some(Builtin::Exit) => Err(builtins::exit(arguments, self.last_status)),
            Some(Builtin::Time) => self.time(&arguments[1..], attached),
            None => {
                debug!("running external command {:?}", arguments);
                launcher::run_external(arguments, self.config)
            }
        }
    }

    /// Runs the rest of the command line, or the attached subshell, and
    /// reports the elapsed wall-clock time on stderr.
    fn time(&mut self, arguments: &[String], attached: Option<&Node>) -> Result<i32, ShellError> {
        let start = Instant::now();
        let result = if !arguments.is_empty() {
            self.run_command(arguments, None)
        } else if let Some(node) = attached {
            self.execute(node)
        } else {
            Ok(0)
        };
        eprintln!("{} msec", start.elapsed().as_millis());
        result
    }

    fn execute_sequence(&mut self, left: &Node, right: Option<&Node>) -> Result<i32, ShellError> {
        let status = self.execute(left)?;
        match right {
            Some(right) => self.execute(right),
            None => Ok(status),
        }
    }

    fn execute_background(
        &mut self,
        left: &Node,
        right: Option<&Node>,
    ) -> Result<i32, ShellError> {
        self.launch_background(left)?;
        match right {
            Some(right) => self.execute(right),
            None => Ok(0),
        }
    }

    /// Starts `node` in a child that nobody waits for. SIGCHLD stays blocked
    /// until the child is in the job table, so its completion can never be
    /// missed.
    ///
    /// The child leads its own process group, so everything it forks can be
    /// terminated together when the job is drained.
    fn launch_background(&mut self, node: &Node) -> Result<(), ShellError> {
        if JOBS.is_full() {
            return Err(ShellError::TooManyJobs);
        }
        let _blocked = signals::block_sigchld()?;

        let child = launcher::spawn(|| {
            if let Err(e) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
                debug!("background job cannot lead a process group: {}", e);
            }
            self.execute_in_child(node)
        })?;
        // set on both sides so the group exists whichever runs first
        if let Err(e) = setpgid(child, child) {
            debug!("setpgid {} failed: {}", child, e);
        }
        if !JOBS.track(child.as_raw()) {
            warn!("background job {} is not tracked", child);
        }
        // installed with the job already tracked: an empty table means
        // the handler removes itself
        signals::setup_sigchld_handler()?;
        debug!("background job {} started", child);
        Ok(())
    }

    fn execute_and(&mut self, left: &Node, right: &Node) -> Result<i32, ShellError> {
        let status = self.execute(left)?;
        if status != 0 {
            return Ok(status);
        }
        self.execute(right)
    }

    fn execute_or(&mut self, left: &Node, right: &Node) -> Result<i32, ShellError> {
        let status = self.execute(left)?;
        if status == 0 {
            return Ok(status);
        }
        self.execute(right)
    }

    fn execute_subshell(
        &mut self,
        body: &Node,
        redirect: &Redirection,
    ) -> Result<i32, ShellError> {
        let saved = redirection::apply(redirect)?;
        let result = launcher::spawn(|| self.execute_in_child(body)).and_then(launcher::wait_for);
        saved.restore();
        result
    }

    /// Connects the output of `left` to the input of `right`. Both sides run
    /// in their own child, the writer is started first, and the status is
    /// that of the reader.
    fn execute_pipe(&mut self, left: &Node, right: &Node) -> Result<i32, ShellError> {
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;
        let (read_fd, write_fd) = (read_end.as_raw_fd(), write_end.as_raw_fd());

        let writer = launcher::spawn(|| {
            if let Err(e) = dup2(write_fd, STDOUT_FILENO) {
                eprintln!("{}: {}", self.config.name, ShellError::Descriptor(e));
                return EXIT_FAILURE;
            }
            let _ = close(read_fd);
            let _ = close(write_fd);
            self.execute_in_child(left)
        })?;

        let reader = launcher::spawn(|| {
            if let Err(e) = dup2(read_fd, STDIN_FILENO) {
                eprintln!("{}: {}", self.config.name, ShellError::Descriptor(e));
                return EXIT_FAILURE;
            }
            let _ = close(read_fd);
            let _ = close(write_fd);
            self.execute_in_child(right)
        })?;

        // the reader only sees end of input once every write end is closed
        drop(read_end);
        drop(write_end);

        launcher::wait_for(writer)?;
        launcher::wait_for(reader)
    }
}
