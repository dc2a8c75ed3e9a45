use dotenv::dotenv;
use rustyline::EditMode;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_HOME: &str = "/tmp";
pub const DEFAULT_PATH: &str = "/bin:/usr/bin:/usr/local/bin:.";
pub const DEFAULT_CDPATH: &str = ".:..";

/// Settings read once at startup and shared by reference afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Invocation name, used to prefix every diagnostic.
    pub name: String,
    pub home: String,
    pub path: String,
    pub cdpath: String,
    pub history_file: PathBuf,
    pub editor_mode: String,
    pub logger_level: String,
    pub logger_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: String::from("myshell"),
            home: String::from(DEFAULT_HOME),
            path: String::from(DEFAULT_PATH),
            cdpath: String::from(DEFAULT_CDPATH),
            history_file: PathBuf::from(DEFAULT_HOME).join(".myshell_history"),
            editor_mode: String::from("emacs"),
            logger_level: String::from("warn"),
            logger_dir: None,
        }
    }
}

impl Config {
    pub fn new(name: &str) -> Self {
        // .env values are visible to the lookups below
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }

        Self::from_lookup(name, |key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup, falling back to the
    /// fixed defaults for anything unset or empty.
    pub fn from_lookup<F>(name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let mut config = Config {
            name: name.to_string(),
            ..Config::default()
        };

        if let Some(home) = var("HOME") {
            config.home = home;
        }
        if let Some(path) = var("PATH") {
            config.path = path;
        }
        if let Some(cdpath) = var("CDPATH") {
            config.cdpath = cdpath;
        }

        config.history_file = match var("MYSHELL_HISTORY") {
            Some(history) => PathBuf::from(history),
            None => PathBuf::from(&config.home).join(format!(".{}_history", config.name)),
        };

        if let Some(editor) = var("MYSHELL_EDITOR") {
            config.editor_mode = editor;
        }
        if let Some(level) = var("MYSHELL_LOG") {
            config.logger_level = level;
        }
        config.logger_dir = var("MYSHELL_LOG_DIR").map(PathBuf::from);

        config
    }

    pub fn get_edit_mode(&self) -> EditMode {
        match self.editor_mode.to_lowercase().as_str() {
            "vi" => EditMode::Vi,
            _ => EditMode::Emacs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup("myshell", lookup(&[]));
        assert_eq!(config.home, DEFAULT_HOME);
        assert_eq!(config.path, DEFAULT_PATH);
        assert_eq!(config.cdpath, DEFAULT_CDPATH);
        assert_eq!(config.history_file, PathBuf::from("/tmp/.myshell_history"));
        assert!(config.logger_dir.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::from_lookup(
            "sh2",
            lookup(&[
                ("HOME", "/home/zed"),
                ("PATH", "/opt/bin"),
                ("CDPATH", ""),
                ("MYSHELL_EDITOR", "vi"),
                ("MYSHELL_LOG_DIR", "/var/log/sh2"),
            ]),
        );
        assert_eq!(config.name, "sh2");
        assert_eq!(config.home, "/home/zed");
        assert_eq!(config.path, "/opt/bin");
        // empty values fall back to the default
        assert_eq!(config.cdpath, DEFAULT_CDPATH);
        assert_eq!(config.history_file, PathBuf::from("/home/zed/.sh2_history"));
        assert_eq!(config.get_edit_mode(), EditMode::Vi);
        assert_eq!(config.logger_dir, Some(PathBuf::from("/var/log/sh2")));
    }
}
