use crate::utils::config::Config;
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::process;

fn parse_level(level: &str) -> LevelFilter {
    match level {
        level if level.eq_ignore_ascii_case("off") => LevelFilter::Off,
        level if level.eq_ignore_ascii_case("error") => LevelFilter::Error,
        level if level.eq_ignore_ascii_case("warn") => LevelFilter::Warn,
        level if level.eq_ignore_ascii_case("info") => LevelFilter::Info,
        level if level.eq_ignore_ascii_case("debug") => LevelFilter::Debug,
        level if level.eq_ignore_ascii_case("trace") => LevelFilter::Trace,
        _ => LevelFilter::Warn,
    }
}

/// Installs the global logger. Records always go to standard error; when a
/// log directory is configured they are also appended to a dated file there.
/// An unusable log directory is reported once and otherwise ignored.
pub fn init_logger(config: &Config) {
    let level = parse_level(&config.logger_level);

    let mut writers: Vec<Box<dyn Write + Send + Sync>> = vec![Box::new(io::stderr())];
    let mut file_error = None;
    if let Some(dir) = &config.logger_dir {
        let date = Local::now().format("%Y-%m-%d");
        let log_file = dir.join(format!("{}_{}.log", config.name, date));
        let file = fs::create_dir_all(dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&log_file));
        match file {
            Ok(file) => writers.push(Box::new(file)),
            Err(e) => file_error = Some((log_file, e)),
        }
    }

    let result = Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[PID:{}][{}] {} - {}",
                process::id(),
                record.level(),
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(MultiWriter { writers })))
        .filter_level(level)
        .try_init();

    if let Err(e) = result {
        eprintln!("{}: logger: {}", config.name, e);
        return;
    }

    if let Some((path, e)) = file_error {
        log::warn!("cannot open log file {}: {}", path.display(), e);
    }
    log::debug!("log level set to {}", level);
}

struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + Sync>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}
