use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use log::debug;

use crate::shell::Shell;
use crate::utils::config::Config;
use crate::utils::log::init_logger;
use crate::utils::path::basename;

mod shell;
mod utils;

fn main() -> ExitCode {
    let mut args = env::args();
    let invoked_as = args.next().unwrap_or_else(|| String::from("myshell"));
    let name = basename(&invoked_as).into_owned();

    let config = Config::new(&name);
    init_logger(&config);
    debug!("config loaded, PATH={} CDPATH={}", config.path, config.cdpath);

    let script = args.next().map(PathBuf::from);
    let mut shell = Shell::new(&config);
    let status = shell.run(script.as_deref());

    ExitCode::from((status & 0xff) as u8)
}
