use std::fs;
use std::io::{self, BufRead};

use colored::Colorize;
use log::{debug, warn};
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::{Config as RLConfig, Editor};

use crate::shell::error::ParseError;
use crate::utils::config::Config;

/// A stream of input lines for the lexer.
///
/// `Ok(None)` means the input is exhausted. Lines keep their trailing
/// newline, except possibly the very last one.
pub trait LineSource {
    fn read_line(&mut self, continuation: bool) -> Result<Option<String>, ParseError>;

    /// Called once a logical command has been parsed successfully.
    fn command_finished(&mut self) {}
}

/// Batch input: piped standard input or a script file.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn read_line(&mut self, _continuation: bool) -> Result<Option<String>, ParseError> {
        let mut buf = Vec::new();
        loop {
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) if buf.is_empty() => return Ok(None),
                Ok(_) => return Ok(Some(String::from_utf8_lossy(&buf).into_owned())),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ParseError::Read(e)),
            }
        }
    }
}

/// Interactive input through a line editor, with a numbered primary prompt
/// and a continuation prompt of the same width.
pub struct ReadlineSource<'a> {
    config: &'a Config,
    editor: Editor<(), FileHistory>,
    prompt_no: u32,
    pending: String,
}

impl<'a> ReadlineSource<'a> {
    pub fn new(config: &'a Config) -> Result<Self, ReadlineError> {
        let rl_config = RLConfig::builder()
            .history_ignore_space(true)
            .auto_add_history(false)
            .edit_mode(config.get_edit_mode())
            .build();

        let editor = Editor::with_config(rl_config)?;
        let mut source = Self {
            config,
            editor,
            prompt_no: 1,
            pending: String::new(),
        };
        source.load_history();
        Ok(source)
    }

    fn primary_prompt(&self) -> String {
        format!("{}.{} ", self.config.name, self.prompt_no)
    }

    fn continuation_prompt(&self) -> String {
        let width = self.primary_prompt().chars().count();
        format!("{:<width$}", " ++", width = width)
    }

    fn load_history(&mut self) {
        if let Err(err) = self.editor.load_history(&self.config.history_file) {
            debug!(
                "no history loaded from {}: {}",
                self.config.history_file.display(),
                err
            );
        }
    }

    pub fn save_history(&mut self) {
        if let Some(parent) = self.config.history_file.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("cannot create history directory {}: {}", parent.display(), err);
                return;
            }
        }
        if let Err(err) = self.editor.save_history(&self.config.history_file) {
            warn!("failed to save history: {}", err);
        } else {
            debug!("history saved");
        }
    }
}

impl LineSource for ReadlineSource<'_> {
    fn read_line(&mut self, continuation: bool) -> Result<Option<String>, ParseError> {
        let prompt = if continuation {
            self.continuation_prompt()
        } else {
            self.pending.clear();
            self.primary_prompt().bright_cyan().to_string()
        };

        match self.editor.readline(&prompt) {
            Ok(mut line) => {
                self.pending.push_str(&line);
                self.pending.push('\n');
                line.push('\n');
                Ok(Some(line))
            }
            Err(ReadlineError::Interrupted) => {
                println!();
                self.pending.clear();
                Err(ParseError::Interrupted)
            }
            Err(ReadlineError::Eof) => Ok(None),
            Err(ReadlineError::Io(e)) => Err(ParseError::Read(e)),
            Err(err) => Err(ParseError::Read(io::Error::new(io::ErrorKind::Other, err))),
        }
    }

    fn command_finished(&mut self) {
        self.prompt_no += 1;
        let entry = self.pending.trim_end().to_string();
        self.pending.clear();
        if entry.is_empty() {
            return;
        }
        if let Err(err) = self.editor.add_history_entry(entry) {
            warn!("failed to add history entry: {}", err);
        }
    }
}
