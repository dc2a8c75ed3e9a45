use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Everything that can stop the parser from producing a command tree.
///
/// Apart from `Interrupted` and `Read`, every variant is a diagnostic for
/// the current logical line: it is reported, the line is dropped and
/// parsing starts over on the next one.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0} redirection filename expected")]
    MissingFilename(&'static str),
    #[error("multiple input redirection")]
    MultipleInput,
    #[error("multiple output redirection")]
    MultipleOutput,
    #[error("output cannot be both redirected and piped")]
    OutputRedirectedAndPiped,
    #[error("input cannot be both redirected and piped")]
    InputRedirectedAndPiped,
    #[error("command expected after '{0}'")]
    CommandExpectedAfter(&'static str),
    #[error("command expected before '{0}'")]
    CommandExpectedBefore(&'static str),
    #[error("redirection without a command")]
    RedirectionWithoutCommand,
    #[error("')' expected")]
    RightParenExpected,
    #[error("subshells may not be empty")]
    EmptySubshell,
    #[error("garbage at end of line")]
    Garbage,
    #[error("unterminated {0} quote")]
    UnterminatedQuote(&'static str),
    #[error("interrupted")]
    Interrupted,
    #[error("read error: {0}")]
    Read(#[from] io::Error),
}

impl ParseError {
    /// True for errors that only invalidate the current line.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ParseError::Interrupted | ParseError::Read(_))
    }
}

#[derive(Debug, Error)]
pub enum ShellError {
    // exit is not a real error, it unwinds execution up to the nearest
    // process boundary
    #[error("exit {0}")]
    Exit(i32),

    #[error("{path}: {}", .source.desc())]
    Redirect { path: String, source: Errno },
    #[error("cannot create process: {}", .0.desc())]
    Fork(Errno),
    #[error("cannot create pipe: {}", .0.desc())]
    Pipe(Errno),
    #[error("wait failed: {}", .0.desc())]
    Wait(Errno),
    #[error("descriptor error: {}", .0.desc())]
    Descriptor(Errno),
    #[error("cannot change signal disposition: {}", .0.desc())]
    Signal(Errno),
    #[error("too many background jobs")]
    TooManyJobs,
}

impl ShellError {
    /// Fatal errors leave the interpreter without reliable process control.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShellError::Fork(_) | ShellError::Pipe(_) | ShellError::Signal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_messages() {
        assert_eq!(
            ParseError::MissingFilename("input").to_string(),
            "input redirection filename expected"
        );
        assert_eq!(
            ParseError::CommandExpectedAfter("|").to_string(),
            "command expected after '|'"
        );
        assert!(ParseError::Garbage.is_recoverable());
        assert!(!ParseError::Interrupted.is_recoverable());
    }

    #[test]
    fn test_redirect_error_names_path_and_reason() {
        let err = ShellError::Redirect {
            path: "missing.txt".to_string(),
            source: Errno::ENOENT,
        };
        assert_eq!(err.to_string(), "missing.txt: No such file or directory");
        assert!(!err.is_fatal());
        assert!(ShellError::Fork(Errno::EAGAIN).is_fatal());
        assert!(!ShellError::Wait(Errno::ECHILD).is_fatal());
        assert!(!ShellError::TooManyJobs.is_fatal());
    }
}
