mod builtins;
#[allow(clippy::module_inception)]
mod executor;
mod launcher;
mod redirection;

pub use executor::Executor;
pub use launcher::EXIT_FAILURE;
