use std::path::PathBuf;

use log::debug;
use nix::unistd::chdir;

use crate::shell::error::ShellError;
use crate::shell::job_manager::{self, JOBS};
use crate::utils::config::Config;
use crate::utils::path::{is_absolute, resolve_in_path};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Builtin {
    Cd,
    Exit,
    Time,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cd" => Some(Builtin::Cd),
            "exit" => Some(Builtin::Exit),
            "time" => Some(Builtin::Time),
            _ => None,
        }
    }
}

/// Directory `cd` would switch to for `argument`.
pub fn cd_target(argument: Option<&str>, config: &Config) -> PathBuf {
    match argument {
        None => PathBuf::from(&config.home),
        Some(dir) if is_absolute(dir) => PathBuf::from(dir),
        Some(dir) => resolve_in_path(dir, &config.cdpath).unwrap_or_else(|| PathBuf::from(dir)),
    }
}

pub fn cd(arguments: &[String], config: &Config) -> i32 {
    let argument = arguments.get(1).map(String::as_str);
    let target = cd_target(argument, config);
    debug!("cd {}", target.display());

    match chdir(&target) {
        Ok(()) => 0,
        Err(e) => {
            let shown = argument.unwrap_or(config.home.as_str());
            eprintln!("{}: cd: {}: {}", config.name, shown, e.desc());
            1
        }
    }
}

/// Stops every background job and produces the exit request that unwinds
/// execution. Only `0` and `1` are recognised as codes; anything else
/// repeats the previous status.
pub fn exit(arguments: &[String], last_status: i32) -> ShellError {
    let code = match arguments.get(1).map(String::as_str) {
        Some("0") => 0,
        Some("1") => 1,
        _ => last_status,
    };
    job_manager::drain(&JOBS);
    ShellError::Exit(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(Builtin::from_name("cd"), Some(Builtin::Cd));
        assert_eq!(Builtin::from_name("exit"), Some(Builtin::Exit));
        assert_eq!(Builtin::from_name("time"), Some(Builtin::Time));
        assert_eq!(Builtin::from_name("ls"), None);
    }

    #[test]
    fn test_exit_codes() {
        let _lock = crate::shell::job_manager::lock_for_tests();
        assert!(matches!(exit(&args(&["exit"]), 7), ShellError::Exit(7)));
        assert!(matches!(exit(&args(&["exit", "0"]), 7), ShellError::Exit(0)));
        assert!(matches!(exit(&args(&["exit", "1"]), 0), ShellError::Exit(1)));
        assert!(matches!(exit(&args(&["exit", "42"]), 3), ShellError::Exit(3)));
    }

    #[test]
    fn test_cd_target() {
        let config = Config {
            home: "/home/someone".to_string(),
            cdpath: "/nowhere:/".to_string(),
            ..Config::default()
        };
        assert_eq!(cd_target(None, &config), PathBuf::from("/home/someone"));
        assert_eq!(cd_target(Some("/usr"), &config), PathBuf::from("/usr"));
        // found through the search path
        assert_eq!(cd_target(Some("tmp"), &config), PathBuf::from("/tmp"));
        // not found anywhere: used as given
        assert_eq!(
            cd_target(Some("no-such-dir-anywhere"), &config),
            PathBuf::from("no-such-dir-anywhere")
        );
    }

    #[test]
    fn test_cd_failure_status() {
        let config = Config::default();
        assert_eq!(cd(&args(&["cd", "/no/such/directory"]), &config), 1);
    }
}
