mod error;
mod executor;
mod job_manager;
mod parser;
mod readline;
mod shell;
mod signals;

pub use shell::Shell;
