use log::debug;

use super::ast::{Command, Node, Redirection};
use super::lexer::{Lexer, RedirectOp, Token};
use crate::shell::error::ParseError;
use crate::shell::readline::LineSource;
use crate::utils::config::Config;

/// Recursive-descent parser, lowest precedence first:
///
/// ```text
/// sequence   := condition ( (';' | '&') condition )*
/// condition  := pipeline ( ('&&' | '||') pipeline )*
/// pipeline   := factor ( '|' factor )*
/// factor     := '(' sequence ')' redirection* | wordlist
/// wordlist   := ( word | redirection )+
/// ```
pub struct Parser<'a, S> {
    lexer: Lexer<S>,
    current_token: Token,
    config: &'a Config,
    errors: usize,
}

impl<'a, S: LineSource> Parser<'a, S> {
    pub fn new(source: S, config: &'a Config) -> Self {
        Parser {
            lexer: Lexer::new(source),
            current_token: Token::Newline,
            config,
            errors: 0,
        }
    }

    /// Number of lines rejected so far.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn source_mut(&mut self) -> &mut S {
        self.lexer.source_mut()
    }

    /// Returns the next command tree, or `None` once the input is exhausted.
    ///
    /// Bad lines are reported on standard error, counted and skipped; an
    /// interrupt abandons the current line and starts over. Only a failing
    /// input stream is returned as an error.
    pub fn next_command(&mut self) -> Result<Option<Node>, ParseError> {
        loop {
            match self.parse_command() {
                Ok(Some(node)) => return Ok(Some(node)),
                Ok(None) if self.lexer.at_eof() => return Ok(None),
                Ok(None) => continue,
                Err(ParseError::Interrupted) => {
                    debug!("parse interrupted");
                    self.lexer.discard_line();
                }
                Err(e) if e.is_recoverable() => {
                    eprintln!("{}: {}", self.config.name, e);
                    self.errors += 1;
                    self.lexer.discard_line();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Parses one logical command. `Ok(None)` is a blank line or end of input.
    pub fn parse_command(&mut self) -> Result<Option<Node>, ParseError> {
        self.lexer.begin_command();
        self.next_token()?;

        let node = self.parse_sequence()?;
        match self.current_token {
            Token::Newline | Token::Eof => {}
            _ => return Err(ParseError::Garbage),
        }

        if let Some(node) = &node {
            debug!("parsed: {}", node);
            self.lexer.source_mut().command_finished();
        }
        Ok(node)
    }

    fn next_token(&mut self) -> Result<(), ParseError> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    fn parse_sequence(&mut self) -> Result<Option<Node>, ParseError> {
        let mut left = self.parse_condition()?;

        loop {
            let (background, op) = match self.current_token {
                Token::Semi => (false, ";"),
                Token::Background => (true, "&"),
                _ => break,
            };
            let first = Box::new(left.ok_or(ParseError::CommandExpectedBefore(op))?);
            self.next_token()?;
            let right = self.parse_condition()?.map(Box::new);

            left = Some(if background {
                Node::Background { left: first, right }
            } else {
                Node::Sequence { left: first, right }
            });
        }

        Ok(left)
    }

    fn parse_condition(&mut self) -> Result<Option<Node>, ParseError> {
        let mut left = self.parse_pipeline()?;

        loop {
            let (and, op) = match self.current_token {
                Token::And => (true, "&&"),
                Token::Or => (false, "||"),
                _ => break,
            };
            let first = Box::new(left.ok_or(ParseError::CommandExpectedBefore(op))?);
            self.next_token()?;
            let second = Box::new(
                self.parse_pipeline()?
                    .ok_or(ParseError::CommandExpectedAfter(op))?,
            );

            left = Some(if and {
                Node::And {
                    left: first,
                    right: second,
                }
            } else {
                Node::Or {
                    left: first,
                    right: second,
                }
            });
        }

        Ok(left)
    }

    fn parse_pipeline(&mut self) -> Result<Option<Node>, ParseError> {
        let mut left = self.parse_factor()?;

        while self.current_token == Token::Pipe {
            let first = left.ok_or(ParseError::CommandExpectedBefore("|"))?;
            if first.output_redirected() {
                return Err(ParseError::OutputRedirectedAndPiped);
            }

            self.next_token()?;
            let second = self
                .parse_factor()?
                .ok_or(ParseError::CommandExpectedAfter("|"))?;
            if second.input_redirected() {
                return Err(ParseError::InputRedirectedAndPiped);
            }

            left = Some(Node::Pipe {
                left: Box::new(first),
                right: Box::new(second),
            });
        }

        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Option<Node>, ParseError> {
        if self.current_token != Token::LeftParen {
            return self.parse_wordlist();
        }

        self.next_token()?;
        let body = self.parse_sequence()?;
        if self.current_token != Token::RightParen {
            return Err(ParseError::RightParenExpected);
        }
        let body = body.ok_or(ParseError::EmptySubshell)?;
        self.next_token()?;

        // redirections after ')' belong to the subshell itself
        let mut redirect = Redirection::default();
        while let Token::Redirect(op) = self.current_token {
            self.parse_redirection(op, &mut redirect)?;
        }

        Ok(Some(Node::Subshell {
            body: Box::new(body),
            redirect,
        }))
    }

    fn parse_wordlist(&mut self) -> Result<Option<Node>, ParseError> {
        let mut command = Command::default();

        loop {
            match &self.current_token {
                Token::Word(word) => {
                    let word = self.expand_tilde(word);
                    command.arguments.push(word);
                    self.next_token()?;
                }
                Token::Quoted(_, text) => {
                    command.arguments.push(text.clone());
                    self.next_token()?;
                }
                Token::Redirect(op) => {
                    let op = *op;
                    self.parse_redirection(op, &mut command.redirect)?;
                }
                _ => break,
            }
        }

        if command.arguments.is_empty() {
            if !command.redirect.is_empty() {
                return Err(ParseError::RedirectionWithoutCommand);
            }
            return Ok(None);
        }

        if command.arguments.len() == 1
            && command.program() == "time"
            && self.current_token == Token::LeftParen
        {
            command.attached = self.parse_factor()?.map(Box::new);
        }

        Ok(Some(Node::Command(command)))
    }

    fn parse_redirection(
        &mut self,
        operator: RedirectOp,
        redirect: &mut Redirection,
    ) -> Result<(), ParseError> {
        self.next_token()?; // skip the operator

        let filename = match &self.current_token {
            Token::Word(word) => self.expand_tilde(word),
            Token::Quoted(_, text) => text.clone(),
            _ => return Err(ParseError::MissingFilename(operator.direction())),
        };

        match operator {
            RedirectOp::Input => {
                if redirect.input.is_some() {
                    return Err(ParseError::MultipleInput);
                }
                redirect.input = Some(filename);
            }
            RedirectOp::Output | RedirectOp::Append => {
                if redirect.output.is_some() {
                    return Err(ParseError::MultipleOutput);
                }
                redirect.output = Some(filename);
                redirect.append = operator == RedirectOp::Append;
            }
        }

        self.next_token()
    }

    /// Leading `~` in a bare word becomes the configured home directory.
    fn expand_tilde(&self, word: &str) -> String {
        shellexpand::tilde_with_context(word, || Some(self.config.home.as_str())).into_owned()
    }
}
