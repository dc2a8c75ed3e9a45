use crate::shell::error::ParseError;
use crate::shell::readline::LineSource;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Word(String),
    /// A quoted word, tagged with its opening quote character.
    Quoted(char, String),
    Redirect(RedirectOp),
    Semi,
    Background,
    And,
    Or,
    Pipe,
    LeftParen,
    RightParen,
    Newline,
    Eof,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum RedirectOp {
    Input,  // <
    Output, // >
    Append, // >>
}

impl RedirectOp {
    pub fn direction(self) -> &'static str {
        match self {
            RedirectOp::Input => "input",
            RedirectOp::Output | RedirectOp::Append => "output",
        }
    }
}

const COMMENT_CHAR: char = '#';

fn is_delimiter(c: char) -> bool {
    " \t\n<>|();&".contains(c)
}

/// Splits a line-oriented character stream into tokens.
///
/// Lines are pulled from the source only when the current one is used up,
/// so a command that ends at a newline never triggers a read of the next
/// line. Everything read after the first line of a logical command is
/// requested as a continuation.
pub struct Lexer<S> {
    source: S,
    line: Vec<char>,
    pos: usize,
    continuation: bool,
    at_eof: bool,
}

impl<S: LineSource> Lexer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            line: Vec::new(),
            pos: 0,
            continuation: false,
            at_eof: false,
        }
    }

    /// Marks the start of a new logical command.
    pub fn begin_command(&mut self) {
        self.continuation = false;
    }

    /// Drops whatever is left of the current physical line.
    pub fn discard_line(&mut self) {
        self.pos = self.line.len();
    }

    pub fn at_eof(&self) -> bool {
        self.at_eof
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_blanks()?;

        let c = match self.read_char()? {
            None => return Ok(Token::Eof),
            Some(c) => c,
        };

        let token = match c {
            '\n' => Token::Newline,
            '<' => Token::Redirect(RedirectOp::Input),
            '>' => {
                if self.next_is('>')? {
                    Token::Redirect(RedirectOp::Append)
                } else {
                    Token::Redirect(RedirectOp::Output)
                }
            }
            ';' => Token::Semi,
            '&' => {
                if self.next_is('&')? {
                    Token::And
                } else {
                    Token::Background
                }
            }
            '|' => {
                if self.next_is('|')? {
                    Token::Or
                } else {
                    Token::Pipe
                }
            }
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            '"' | '\'' => self.read_quoted(c)?,
            _ => self.read_word(c)?,
        };

        Ok(token)
    }

    fn fill(&mut self) -> Result<bool, ParseError> {
        while self.pos >= self.line.len() {
            if self.at_eof {
                return Ok(false);
            }
            match self.source.read_line(self.continuation)? {
                Some(line) => {
                    self.line = line.chars().collect();
                    self.pos = 0;
                    self.continuation = true;
                }
                None => {
                    self.at_eof = true;
                    self.line.clear();
                    self.pos = 0;
                }
            }
        }
        Ok(true)
    }

    fn peek_char(&mut self) -> Result<Option<char>, ParseError> {
        if self.fill()? {
            Ok(Some(self.line[self.pos]))
        } else {
            Ok(None)
        }
    }

    fn read_char(&mut self) -> Result<Option<char>, ParseError> {
        let c = self.peek_char()?;
        if c.is_some() {
            self.pos += 1;
        }
        Ok(c)
    }

    fn next_is(&mut self, expected: char) -> Result<bool, ParseError> {
        if self.peek_char()? == Some(expected) {
            self.pos += 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn skip_blanks(&mut self) -> Result<(), ParseError> {
        while let Some(c) = self.peek_char()? {
            match c {
                ' ' | '\t' | '\r' => self.pos += 1,
                '\\' if self.line.get(self.pos + 1) == Some(&'\n') => self.pos += 2,
                COMMENT_CHAR => {
                    // the newline itself still ends the command
                    while self.pos < self.line.len() && self.line[self.pos] != '\n' {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Decodes the character after a backslash. A backslash-newline pair is a
    /// line continuation and yields nothing.
    fn read_escape(&mut self) -> Result<Option<char>, ParseError> {
        let escaped = match self.read_char()? {
            None | Some('\n') => return Ok(None),
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some(c) => c,
        };
        Ok(Some(escaped))
    }

    fn read_word(&mut self, first: char) -> Result<Token, ParseError> {
        let mut word = String::new();
        let mut next = Some(first);

        while let Some(c) = next {
            if c == '\\' {
                if let Some(escaped) = self.read_escape()? {
                    word.push(escaped);
                }
            } else {
                word.push(c);
            }

            next = match self.peek_char()? {
                Some(c) if !is_delimiter(c) => {
                    self.pos += 1;
                    Some(c)
                }
                _ => None,
            };
        }

        Ok(Token::Word(word))
    }

    fn read_quoted(&mut self, quote: char) -> Result<Token, ParseError> {
        let mut text = String::new();

        loop {
            match self.read_char()? {
                None => {
                    let kind = if quote == '"' { "double" } else { "single" };
                    return Err(ParseError::UnterminatedQuote(kind));
                }
                Some(c) if c == quote => break,
                Some('\\') => {
                    if let Some(escaped) = self.read_escape()? {
                        text.push(escaped);
                    }
                }
                Some(c) => text.push(c),
            }
        }

        Ok(Token::Quoted(quote, text))
    }
}
