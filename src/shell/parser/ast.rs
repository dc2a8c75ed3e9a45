use std::fmt;

/// A parsed command tree. Children are owned, so dropping the root releases
/// the whole tree exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Command(Command),
    /// `left ; right`
    Sequence {
        left: Box<Node>,
        right: Option<Box<Node>>,
    },
    /// `left & right`
    Background {
        left: Box<Node>,
        right: Option<Box<Node>>,
    },
    /// `left && right`
    And { left: Box<Node>, right: Box<Node> },
    /// `left || right`
    Or { left: Box<Node>, right: Box<Node> },
    /// `( body ) redirections`
    Subshell {
        body: Box<Node>,
        redirect: Redirection,
    },
    /// `left | right`
    Pipe { left: Box<Node>, right: Box<Node> },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    /// `arguments[0]` is the program or built-in name; never empty.
    pub arguments: Vec<String>,
    pub redirect: Redirection,
    /// Sub-node attached to a lone `time`, as in `time ( ... )`.
    pub attached: Option<Box<Node>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Redirection {
    pub input: Option<String>,
    pub output: Option<String>,
    pub append: bool,
}

impl Redirection {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.output.is_none()
    }
}

impl Command {
    pub fn program(&self) -> &str {
        self.arguments.first().map(String::as_str).unwrap_or_default()
    }
}

impl Node {
    /// Whether the first process of this node already reads from a file.
    pub fn input_redirected(&self) -> bool {
        match self {
            Node::Command(command) => command.redirect.input.is_some(),
            Node::Subshell { redirect, .. } => redirect.input.is_some(),
            Node::Pipe { left, .. } => left.input_redirected(),
            _ => false,
        }
    }

    /// Whether the last process of this node already writes to a file.
    pub fn output_redirected(&self) -> bool {
        match self {
            Node::Command(command) => command.redirect.output.is_some(),
            Node::Subshell { redirect, .. } => redirect.output.is_some(),
            Node::Pipe { right, .. } => right.output_redirected(),
            _ => false,
        }
    }
}

fn needs_quotes(word: &str) -> bool {
    word.is_empty()
        || word.starts_with('~')
        || word.starts_with('#')
        || word
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "<>|();&\"'\\".contains(c))
}

/// Writes a word so that the lexer reads it back unchanged.
fn write_word(f: &mut fmt::Formatter<'_>, word: &str) -> fmt::Result {
    if !needs_quotes(word) {
        return f.write_str(word);
    }

    f.write_str("\"")?;
    for c in word.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\u{8}' => f.write_str("\\b")?,
            '\u{c}' => f.write_str("\\f")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(input) = &self.input {
            f.write_str(" < ")?;
            write_word(f, input)?;
        }
        if let Some(output) = &self.output {
            f.write_str(if self.append { " >> " } else { " > " })?;
            write_word(f, output)?;
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write_word(f, argument)?;
        }
        write!(f, "{}", self.redirect)?;
        if let Some(attached) = &self.attached {
            write!(f, " {}", attached)?;
        }
        Ok(())
    }
}

fn write_binary(
    f: &mut fmt::Formatter<'_>,
    left: &Node,
    op: &str,
    right: Option<&Node>,
) -> fmt::Result {
    write!(f, "{} {}", left, op)?;
    match right {
        Some(right) => write!(f, " {}", right),
        None => Ok(()),
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Command(command) => write!(f, "{}", command),
            Node::Sequence { left, right } => write_binary(f, left, ";", right.as_deref()),
            Node::Background { left, right } => write_binary(f, left, "&", right.as_deref()),
            Node::And { left, right } => write_binary(f, left, "&&", Some(right.as_ref())),
            Node::Or { left, right } => write_binary(f, left, "||", Some(right.as_ref())),
            Node::Pipe { left, right } => write_binary(f, left, "|", Some(right.as_ref())),
            Node::Subshell { body, redirect } => write!(f, "( {} ){}", body, redirect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> Node {
        Node::Command(Command {
            arguments: args.iter().map(|s| s.to_string()).collect(),
            ..Command::default()
        })
    }

    #[test]
    fn test_print_quotes_only_when_needed() {
        let node = command(&["echo", "plain", "two words", "", "a\"b", "~x", "tab\there"]);
        assert_eq!(
            node.to_string(),
            r#"echo plain "two words" "" "a\"b" "~x" "tab\there""#
        );
    }

    #[test]
    fn test_print_operators_and_redirections() {
        let node = Node::Background {
            left: Box::new(Node::And {
                left: Box::new(command(&["make"])),
                right: Box::new(Node::Subshell {
                    body: Box::new(Node::Pipe {
                        left: Box::new(command(&["ls"])),
                        right: Box::new(command(&["wc", "-l"])),
                    }),
                    redirect: Redirection {
                        input: None,
                        output: Some("out.txt".to_string()),
                        append: true,
                    },
                }),
            }),
            right: None,
        };
        assert_eq!(node.to_string(), "make && ( ls | wc -l ) >> out.txt &");
    }

    #[test]
    fn test_redirected_ends_of_a_pipe() {
        let mut first = Command {
            arguments: vec!["sort".to_string()],
            ..Command::default()
        };
        first.redirect.input = Some("in".to_string());
        let pipe = Node::Pipe {
            left: Box::new(Node::Command(first)),
            right: Box::new(command(&["uniq"])),
        };
        assert!(pipe.input_redirected());
        assert!(!pipe.output_redirected());
    }
}
