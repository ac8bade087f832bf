//! Abstract Syntax Tree for vsh scripts
//!
//! Words keep their quoting so the expansion phases know what applies to
//! each part. Statements carry the control operator that followed them.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub node: ScriptNode,
    pub terminator: ControlOp,
}

/// Operator that ended a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlOp {
    /// `&&`: run the next statement only on success
    And,
    /// `||`: run the next statement only on failure
    Or,
    /// `;` or newline
    Sequence,
    /// End of input
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptNode {
    /// Single command, possibly only assignments
    Command(Segment),
    /// Two or more segments joined by `|`
    Pipeline(Pipeline),
    If(IfStatement),
    For(ForLoop),
    While(WhileLoop),
    /// `break [n]`
    Break(ControlCommand),
    /// `continue [n]`
    Continue(ControlCommand),
    /// `exit [code]`; arguments are validated at run time
    Exit(ControlCommand),
}

/// Operands of `break`, `continue` or `exit`, without the keyword.
/// Redirections apply to the diagnostics the statement writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub assignments: Vec<Assignment>,
    pub args: Vec<Word>,
    pub redirections: Vec<Redirection>,
}

impl ControlCommand {
    pub fn new(args: Vec<Word>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    /// Split a segment whose first word is the keyword.
    pub fn from_segment(segment: Segment) -> Self {
        let Segment {
            assignments,
            mut words,
            redirections,
        } = segment;
        if !words.is_empty() {
            words.remove(0);
        }
        Self {
            assignments,
            args: words,
            redirections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub segments: Vec<Segment>,
}

/// One command invocation before expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub assignments: Vec<Assignment>,
    pub words: Vec<Word>,
    pub redirections: Vec<Redirection>,
}

impl Segment {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.words.is_empty() && self.redirections.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub name: String,
    pub value: Word,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfStatement {
    pub condition: Vec<Statement>,
    pub then_body: Vec<Statement>,
    pub elif_clauses: Vec<ElifClause>,
    pub else_body: Option<Vec<Statement>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElifClause {
    pub condition: Vec<Statement>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForLoop {
    pub variable: String,
    pub items: Vec<Word>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhileLoop {
    pub condition: Vec<Statement>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedirectSource {
    Stdin,
    Stdout,
    Stderr,
    /// `&>` / `&>>`
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedirectMode {
    Read,
    Write,
    Append,
    /// Duplicate another descriptor (`2>&1`)
    Dup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectTarget {
    Path(Word),
    Fd(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirection {
    pub source: RedirectSource,
    pub mode: RedirectMode,
    pub target: RedirectTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quote {
    Unquoted,
    Single,
    Double,
}

impl Quote {
    pub fn is_quoted(self) -> bool {
        self != Self::Unquoted
    }
}

/// `${NAME<op>word}` forms
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamOp {
    /// `${NAME:-word}`
    Default(Word),
    /// `${NAME:+word}`
    Alternative(Word),
    /// `${NAME:=word}`
    Assign(Word),
    /// `${#NAME}`
    Length,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordPart {
    /// Plain text; single-quoted and backslash-escaped text is `Single`
    Literal { text: String, quote: Quote },
    Variable {
        name: String,
        op: Option<Box<ParamOp>>,
        quote: Quote,
    },
    /// `$(...)` or backticks, holding the inner command text
    CommandSub { command: String, quote: Quote },
}

impl WordPart {
    pub fn quote(&self) -> Quote {
        match self {
            Self::Literal { quote, .. }
            | Self::Variable { quote, .. }
            | Self::CommandSub { quote, .. } => *quote,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

impl Word {
    pub fn literal(s: &str) -> Self {
        Self {
            parts: vec![WordPart::Literal {
                text: s.to_string(),
                quote: Quote::Unquoted,
            }],
        }
    }

    pub fn empty() -> Self {
        Self { parts: vec![] }
    }

    /// The text of a word made of one unquoted literal. Reserved words and
    /// assignments are only recognized in this form.
    pub fn as_unquoted_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Literal {
                text,
                quote: Quote::Unquoted,
            }] => Some(text),
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.as_unquoted_literal() == Some(keyword)
    }

    pub fn is_reserved(&self) -> bool {
        self.as_unquoted_literal().is_some_and(is_reserved_word)
    }
}

pub const RESERVED_WORDS: &[&str] = &[
    "if", "then", "elif", "else", "fi", "for", "in", "do", "done", "while",
];

pub fn is_reserved_word(s: &str) -> bool {
    RESERVED_WORDS.contains(&s)
}

fn write_quoted(f: &mut fmt::Formatter<'_>, quote: Quote, body: &str) -> fmt::Result {
    match quote {
        Quote::Unquoted => f.write_str(body),
        Quote::Single => write!(f, "'{body}'"),
        Quote::Double => write!(f, "\"{body}\""),
    }
}

impl fmt::Display for ParamOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default(w) => write!(f, ":-{w}"),
            Self::Alternative(w) => write!(f, ":+{w}"),
            Self::Assign(w) => write!(f, ":={w}"),
            Self::Length => Ok(()),
        }
    }
}

impl fmt::Display for WordPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { text, quote } => write_quoted(f, *quote, text),
            Self::Variable { name, op, quote } => {
                let body = match op.as_deref() {
                    None => format!("${{{name}}}"),
                    Some(ParamOp::Length) => format!("${{#{name}}}"),
                    Some(op) => format!("${{{name}{op}}}"),
                };
                write_quoted(f, *quote, &body)
            }
            Self::CommandSub { command, quote } => write_quoted(f, *quote, &format!("$({command})")),
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_requires_unquoted() {
        assert!(Word::literal("done").is_reserved());
        let quoted = Word {
            parts: vec![WordPart::Literal {
                text: "done".into(),
                quote: Quote::Single,
            }],
        };
        assert!(!quoted.is_reserved());
        assert!(!Word::literal("echo").is_reserved());
    }

    #[test]
    fn test_word_display() {
        let word = Word {
            parts: vec![
                WordPart::Literal {
                    text: "a".into(),
                    quote: Quote::Unquoted,
                },
                WordPart::Variable {
                    name: "X".into(),
                    op: Some(Box::new(ParamOp::Default(Word::literal("d")))),
                    quote: Quote::Double,
                },
                WordPart::CommandSub {
                    command: "pwd".into(),
                    quote: Quote::Unquoted,
                },
            ],
        };
        assert_eq!(word.to_string(), "a\"${X:-d}\"$(pwd)");
    }
}
