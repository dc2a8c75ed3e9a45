use log::{debug, error, warn};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use nix::unistd::isatty;

use crate::shell::error::ShellError;
use crate::shell::executor::{Executor, EXIT_FAILURE};
use crate::shell::job_manager::{self, JOBS};
use crate::shell::parser::Parser;
use crate::shell::readline::{LineSource, ReaderSource, ReadlineSource};
use crate::shell::signals;
use crate::utils::config::Config;

pub struct Shell<'a> {
    config: &'a Config,
    executor: Executor<'a>,
}

impl<'a> Shell<'a> {
    pub fn new(config: &'a Config) -> Self {
        job_manager::set_program_name(&config.name);
        Self {
            config,
            executor: Executor::new(config),
        }
    }

    /// Reads and runs commands until end of input or `exit`, and returns
    /// the status the process should exit with.
    ///
    /// Input comes from `script` when given, from a line editor when both
    /// standard input and output are terminals, and from standard input
    /// otherwise.
    pub fn run(&mut self, script: Option<&Path>) -> i32 {
        debug!("starting {}", self.config.name);

        let status = if let Some(path) = script {
            match File::open(path) {
                Ok(file) => {
                    let source = ReaderSource::new(BufReader::new(file));
                    let mut parser = Parser::new(source, self.config);
                    self.run_loop(&mut parser, false)
                }
                Err(e) => {
                    eprintln!("{}: {}: {}", self.config.name, path.display(), e);
                    EXIT_FAILURE
                }
            }
        } else if Self::is_interactive() {
            self.run_interactive()
        } else {
            let stdin = io::stdin();
            let mut parser = Parser::new(ReaderSource::new(stdin.lock()), self.config);
            self.run_loop(&mut parser, false)
        };

        job_manager::drain(&JOBS);
        debug!("{} exiting with status {}", self.config.name, status);
        status
    }

    fn is_interactive() -> bool {
        isatty(libc::STDIN_FILENO).unwrap_or(false) && isatty(libc::STDOUT_FILENO).unwrap_or(false)
    }

    fn run_interactive(&mut self) -> i32 {
        signals::ignore_interactive_signals();

        let source = match ReadlineSource::new(self.config) {
            Ok(source) => source,
            Err(e) => {
                error!("cannot start line editor: {}", e);
                eprintln!("{}: {}", self.config.name, e);
                return EXIT_FAILURE;
            }
        };
        let mut parser = Parser::new(source, self.config);
        let status = self.run_loop(&mut parser, true);
        parser.source_mut().save_history();
        status
    }

    fn run_loop<S: LineSource>(&mut self, parser: &mut Parser<'_, S>, interactive: bool) -> i32 {
        loop {
            let errors = parser.error_count();
            let next = parser.next_command();
            if parser.error_count() > errors {
                self.executor.set_last_status(EXIT_FAILURE);
            }

            let node = match next {
                Ok(Some(node)) => node,
                Ok(None) => break,
                Err(e) => {
                    warn!("input failed: {}", e);
                    eprintln!("{}: {}", self.config.name, e);
                    self.executor.set_last_status(EXIT_FAILURE);
                    break;
                }
            };

            debug!("executing {}", node);
            match self.executor.execute(&node) {
                Ok(status) => debug!("status {}", status),
                Err(ShellError::Exit(code)) => return code,
                Err(e) => {
                    error!("fatal: {}", e);
                    eprintln!("{}: {}", self.config.name, e);
                    return EXIT_FAILURE;
                }
            }
        }

        if interactive {
            println!();
        }
        self.executor.last_status()
    }
}
