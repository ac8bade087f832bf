//! Lexer for vsh
//!
//! A recursive-descent scanner that turns a raw line into quote-aware words
//! and operator tokens. Substitutions are located by scanning for their
//! matching closer and kept as inner command text; they are tokenized again
//! when they run. Malformed input (an unmatched quote, paren or brace)
//! degrades to literal text instead of failing.

use std::fmt;

use crate::ast::{ParamOp, Quote, RedirectMode, RedirectSource, Word, WordPart};

/// Deepest `$(...)` nesting kept as a substitution.
pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    Word(Word),

    Pipe,      // |
    AndAnd,    // &&
    OrOr,      // ||
    Semicolon, // ;
    Newline,   // \n
    Ampersand, // &

    /// `fd` is set for descriptor duplication (`2>&1`)
    Redirect {
        source: RedirectSource,
        mode: RedirectMode,
        fd: Option<u8>,
    },
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{w}"),
            Token::Pipe => write!(f, "|"),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Semicolon => write!(f, ";"),
            Token::Newline => write!(f, "newline"),
            Token::Ampersand => write!(f, "&"),
            Token::Redirect { source, mode, fd } => {
                let prefix = match source {
                    RedirectSource::Stdin => return write!(f, "<"),
                    RedirectSource::Stdout => "",
                    RedirectSource::Stderr => "2",
                    RedirectSource::Both => "&",
                };
                match (mode, fd) {
                    (RedirectMode::Append, _) => write!(f, "{prefix}>>"),
                    (RedirectMode::Dup, Some(fd)) => write!(f, "{prefix}>&{fd}"),
                    _ => write!(f, "{prefix}>"),
                }
            }
        }
    }
}

/// Tokenize with the default substitution nesting limit.
pub fn tokenize(line: &str) -> Vec<Token> {
    tokenize_with_depth(line, DEFAULT_MAX_DEPTH)
}

pub fn tokenize_with_depth(line: &str, max_depth: usize) -> Vec<Token> {
    Scanner::new(line, max_depth).run()
}

/// Words of each command of a line, split at every operator. Redirection
/// operators and their targets are left out.
pub fn segments(line: &str) -> Vec<Vec<Word>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    let mut skip_target = false;
    for token in tokenize(line) {
        match token {
            Token::Word(word) => {
                if !std::mem::take(&mut skip_target) {
                    current.push(word);
                }
            }
            Token::Redirect { fd, .. } => skip_target = fd.is_none(),
            _ => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn is_break(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '|' | '&' | ';' | '<' | '>')
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Word parts under construction. Adjacent literals with the same quoting
/// are merged.
#[derive(Default)]
struct Parts(Vec<WordPart>);

impl Parts {
    fn push_char(&mut self, c: char, quote: Quote) {
        if let Some(WordPart::Literal { text, quote: q }) = self.0.last_mut() {
            if *q == quote {
                text.push(c);
                return;
            }
        }
        self.0.push(WordPart::Literal {
            text: c.to_string(),
            quote,
        });
    }

    /// Push text even when empty, so `''` and `""` survive as arguments.
    fn push_text(&mut self, s: &str, quote: Quote) {
        if let Some(WordPart::Literal { text, quote: q }) = self.0.last_mut() {
            if *q == quote {
                text.push_str(s);
                return;
            }
        }
        self.0.push(WordPart::Literal {
            text: s.to_string(),
            quote,
        });
    }

    fn push(&mut self, part: WordPart) {
        self.0.push(part);
    }

    fn finish(self) -> Word {
        Word { parts: self.0 }
    }
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    max_depth: usize,
}

impl Scanner {
    fn new(input: &str, max_depth: usize) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            max_depth,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    fn run(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_blanks();
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    tokens.push(Token::Newline);
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '|' => {
                    if self.peek_at(1) == Some('|') {
                        self.pos += 2;
                        tokens.push(Token::OrOr);
                    } else {
                        self.pos += 1;
                        tokens.push(Token::Pipe);
                    }
                }
                '&' => match self.peek_at(1) {
                    Some('&') => {
                        self.pos += 2;
                        tokens.push(Token::AndAnd);
                    }
                    Some('>') => {
                        self.pos += 2;
                        let mode = if self.peek() == Some('>') {
                            self.pos += 1;
                            RedirectMode::Append
                        } else {
                            RedirectMode::Write
                        };
                        tokens.push(Token::Redirect {
                            source: RedirectSource::Both,
                            mode,
                            fd: None,
                        });
                    }
                    _ => {
                        self.pos += 1;
                        tokens.push(Token::Ampersand);
                    }
                },
                ';' => {
                    self.pos += 1;
                    tokens.push(Token::Semicolon);
                }
                '<' | '>' => tokens.push(self.redirect(None)),
                '1' | '2' if self.peek_at(1) == Some('>') => {
                    self.pos += 1;
                    tokens.push(self.redirect(Some(c)));
                }
                '0' if self.peek_at(1) == Some('<') => {
                    self.pos += 1;
                    tokens.push(self.redirect(Some(c)));
                }
                _ => {
                    let word = self.word();
                    if !word.parts.is_empty() {
                        tokens.push(Token::Word(word));
                    }
                }
            }
        }
        tokens
    }

    /// Skip spaces, tabs and line continuations.
    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => self.pos += 1,
                Some('\\') if self.peek_at(1) == Some('\n') => self.pos += 2,
                _ => break,
            }
        }
    }

    fn redirect(&mut self, digit: Option<char>) -> Token {
        if self.peek() == Some('<') {
            self.pos += 1;
            return Token::Redirect {
                source: RedirectSource::Stdin,
                mode: RedirectMode::Read,
                fd: None,
            };
        }

        self.pos += 1;
        let source = if digit == Some('2') {
            RedirectSource::Stderr
        } else {
            RedirectSource::Stdout
        };
        match self.peek() {
            Some('>') => {
                self.pos += 1;
                Token::Redirect {
                    source,
                    mode: RedirectMode::Append,
                    fd: None,
                }
            }
            Some('&') => match self.peek_at(1) {
                Some(d @ ('1' | '2')) => {
                    self.pos += 2;
                    Token::Redirect {
                        source,
                        mode: RedirectMode::Dup,
                        fd: Some(if d == '1' { 1 } else { 2 }),
                    }
                }
                _ if digit.is_none() => {
                    // `>&file` is `&>file`
                    self.pos += 1;
                    Token::Redirect {
                        source: RedirectSource::Both,
                        mode: RedirectMode::Write,
                        fd: None,
                    }
                }
                _ => Token::Redirect {
                    source,
                    mode: RedirectMode::Write,
                    fd: None,
                },
            },
            Some('|') => {
                self.pos += 1;
                Token::Redirect {
                    source,
                    mode: RedirectMode::Write,
                    fd: None,
                }
            }
            _ => Token::Redirect {
                source,
                mode: RedirectMode::Write,
                fd: None,
            },
        }
    }

    fn word(&mut self) -> Word {
        let mut parts = Parts::default();
        while let Some(c) = self.peek() {
            match c {
                c if is_break(c) => break,
                '\\' => self.escape(&mut parts, Quote::Unquoted),
                '\'' => self.single_quoted(&mut parts),
                '"' => self.double_quoted(&mut parts),
                '$' => self.dollar(&mut parts, Quote::Unquoted),
                '`' => self.backtick(&mut parts, Quote::Unquoted),
                _ => {
                    self.pos += 1;
                    parts.push_char(c, Quote::Unquoted);
                }
            }
        }
        parts.finish()
    }

    /// The word of a `${NAME:-word}` operand: the whole input, no breaks.
    fn operand(&mut self, quote: Quote) -> Word {
        let mut parts = Parts::default();
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.escape(&mut parts, quote),
                '\'' if quote == Quote::Unquoted => self.single_quoted(&mut parts),
                '"' => self.double_quoted(&mut parts),
                '$' => self.dollar(&mut parts, quote),
                '`' => self.backtick(&mut parts, quote),
                _ => {
                    self.pos += 1;
                    parts.push_char(c, quote);
                }
            }
        }
        parts.finish()
    }

    fn escape(&mut self, parts: &mut Parts, quote: Quote) {
        self.pos += 1;
        match self.peek() {
            Some('\n') => self.pos += 1,
            Some(c) if quote == Quote::Double && !matches!(c, '\\' | '$' | '"' | '`') => {
                parts.push_char('\\', Quote::Double);
            }
            Some(c) => {
                self.pos += 1;
                let kept = if quote == Quote::Double { Quote::Double } else { Quote::Single };
                parts.push_char(c, kept);
            }
            None => parts.push_char('\\', quote),
        }
    }

    fn single_quoted(&mut self, parts: &mut Parts) {
        let start = self.pos + 1;
        match self.find_char('\'', start) {
            Some(end) => {
                let text = self.text(start, end);
                parts.push_text(&text, Quote::Single);
                self.pos = end + 1;
            }
            None => {
                self.pos += 1;
                parts.push_char('\'', Quote::Unquoted);
            }
        }
    }

    fn double_quoted(&mut self, parts: &mut Parts) {
        let start = self.pos + 1;
        let Some(end) = self.find_double_close(start, 0) else {
            self.pos += 1;
            parts.push_char('"', Quote::Unquoted);
            return;
        };

        parts.push_text("", Quote::Double);
        self.pos = start;
        while self.pos < end {
            let c = self.chars[self.pos];
            match c {
                '\\' => self.escape(parts, Quote::Double),
                '$' => self.dollar(parts, Quote::Double),
                '`' => self.backtick(parts, Quote::Double),
                _ => {
                    self.pos += 1;
                    parts.push_char(c, Quote::Double);
                }
            }
        }
        self.pos = end + 1;
    }

    fn backtick(&mut self, parts: &mut Parts, quote: Quote) {
        let start = self.pos + 1;
        let Some(end) = self.find_backtick_close(start) else {
            self.pos += 1;
            parts.push_char('`', quote);
            return;
        };

        let mut command = String::new();
        let mut i = start;
        while i < end {
            let c = self.chars[i];
            if c == '\\' && matches!(self.chars.get(i + 1), Some('`' | '\\' | '$')) {
                command.push(self.chars[i + 1]);
                i += 2;
            } else {
                command.push(c);
                i += 1;
            }
        }
        parts.push(WordPart::CommandSub { command, quote });
        self.pos = end + 1;
    }

    fn dollar(&mut self, parts: &mut Parts, quote: Quote) {
        match self.peek_at(1) {
            Some('(') if self.peek_at(2) != Some('(') => self.command_sub(parts, quote),
            Some('{') => self.braced_param(parts, quote),
            Some(c @ ('?' | '#' | '@' | '*' | '0'..='9')) => {
                self.pos += 2;
                parts.push(WordPart::Variable {
                    name: c.to_string(),
                    op: None,
                    quote,
                });
            }
            Some(c) if is_name_start(c) => {
                let start = self.pos + 1;
                let mut end = start;
                while self.chars.get(end).copied().is_some_and(is_name_char) {
                    end += 1;
                }
                let name = self.text(start, end);
                self.pos = end;
                parts.push(WordPart::Variable {
                    name,
                    op: None,
                    quote,
                });
            }
            _ => {
                self.pos += 1;
                parts.push_char('$', quote);
            }
        }
    }

    fn command_sub(&mut self, parts: &mut Parts, quote: Quote) {
        let start = self.pos + 2;
        match self.find_paren_close(start, 0) {
            Some((end, nested)) if nested < self.max_depth => {
                let command = self.text(start, end);
                parts.push(WordPart::CommandSub { command, quote });
                self.pos = end + 1;
            }
            Some((end, nested)) => {
                tracing::warn!(nested, limit = self.max_depth, "substitution nesting too deep, keeping literal text");
                let text = self.text(self.pos, end + 1);
                parts.push_text(&text, Quote::Single);
                self.pos = end + 1;
            }
            None => {
                self.pos += 1;
                parts.push_char('$', quote);
            }
        }
    }

    fn braced_param(&mut self, parts: &mut Parts, quote: Quote) {
        let start = self.pos + 2;
        let Some(end) = self.find_brace_close(start, 0) else {
            self.pos += 1;
            parts.push_char('$', quote);
            return;
        };
        let inner = self.text(start, end);
        let literal = self.text(self.pos, end + 1);
        self.pos = end + 1;

        match self.parse_param(&inner, quote) {
            Some(part) => parts.push(part),
            None => parts.push_text(&literal, Quote::Single),
        }
    }

    fn parse_param(&self, inner: &str, quote: Quote) -> Option<WordPart> {
        if let Some(name) = inner.strip_prefix('#') {
            if !name.is_empty() && is_param_name(name) {
                return Some(WordPart::Variable {
                    name: name.to_string(),
                    op: Some(Box::new(ParamOp::Length)),
                    quote,
                });
            }
        }

        let name_len = if inner.starts_with(|c: char| matches!(c, '?' | '#' | '@' | '*')) {
            1
        } else {
            inner.find(|c: char| !is_name_char(c)).unwrap_or(inner.len())
        };
        let (name, rest) = inner.split_at(name_len);
        if name.is_empty() || !is_param_name(name) {
            return None;
        }
        if rest.is_empty() {
            return Some(WordPart::Variable {
                name: name.to_string(),
                op: None,
                quote,
            });
        }

        let operand = |s: &str| Scanner::new(s, self.max_depth).operand(quote);
        let op = if let Some(w) = rest.strip_prefix(":-") {
            ParamOp::Default(operand(w))
        } else if let Some(w) = rest.strip_prefix(":+") {
            ParamOp::Alternative(operand(w))
        } else if let Some(w) = rest.strip_prefix(":=") {
            ParamOp::Assign(operand(w))
        } else {
            return None;
        };
        Some(WordPart::Variable {
            name: name.to_string(),
            op: Some(Box::new(op)),
            quote,
        })
    }

    fn find_char(&self, target: char, start: usize) -> Option<usize> {
        (start..self.chars.len()).find(|&i| self.chars[i] == target)
    }

    fn find_backtick_close(&self, start: usize) -> Option<usize> {
        let mut i = start;
        while i < self.chars.len() {
            match self.chars[i] {
                '\\' => i += 2,
                '`' => return Some(i),
                _ => i += 1,
            }
        }
        None
    }

    /// Closing `"` of a double-quoted string whose body starts at `start`.
    fn find_double_close(&self, start: usize, level: usize) -> Option<usize> {
        if level > self.max_depth {
            return None;
        }
        let mut i = start;
        while i < self.chars.len() {
            match self.chars[i] {
                '\\' => i += 2,
                '"' => return Some(i),
                '$' if self.chars.get(i + 1) == Some(&'(') => {
                    i = self.find_paren_close(i + 2, level + 1)?.0 + 1;
                }
                '`' => i = self.find_backtick_close(i + 1)? + 1,
                _ => i += 1,
            }
        }
        None
    }

    /// Matching `)` for a substitution body starting at `start`, with the
    /// deepest paren nesting seen inside it.
    fn find_paren_close(&self, start: usize, level: usize) -> Option<(usize, usize)> {
        if level > self.max_depth {
            return None;
        }
        let mut depth = 1usize;
        let mut deepest = 0usize;
        let mut i = start;
        while i < self.chars.len() {
            match self.chars[i] {
                '\\' => i += 2,
                '\'' => i = self.find_char('\'', i + 1)? + 1,
                '"' => i = self.find_double_close(i + 1, level + 1)? + 1,
                '`' => i = self.find_backtick_close(i + 1)? + 1,
                '(' => {
                    depth += 1;
                    deepest = deepest.max(depth - 1);
                    i += 1;
                }
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some((i, deepest));
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }
        None
    }

    fn find_brace_close(&self, start: usize, level: usize) -> Option<usize> {
        if level > self.max_depth {
            return None;
        }
        let mut depth = 1usize;
        let mut i = start;
        while i < self.chars.len() {
            match self.chars[i] {
                '\\' => i += 2,
                '\'' => i = self.find_char('\'', i + 1)? + 1,
                '"' => i = self.find_double_close(i + 1, level + 1)? + 1,
                '{' => {
                    depth += 1;
                    i += 1;
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }
        None
    }
}

fn is_param_name(name: &str) -> bool {
    matches!(name, "?" | "#" | "@" | "*")
        || name.chars().all(|c| c.is_ascii_digit())
        || crate::environment::is_valid_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        tokenize(input)
    }

    fn words(input: &str) -> Vec<Word> {
        lex(input)
            .into_iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w),
                _ => None,
            })
            .collect()
    }

    fn lit(text: &str, quote: Quote) -> WordPart {
        WordPart::Literal {
            text: text.to_string(),
            quote,
        }
    }

    #[test]
    fn test_simple_command() {
        assert_eq!(
            lex("echo hello world"),
            vec![
                Token::Word(Word::literal("echo")),
                Token::Word(Word::literal("hello")),
                Token::Word(Word::literal("world")),
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = lex("a | b && c || d; e\nf");
        assert_eq!(tokens[1], Token::Pipe);
        assert_eq!(tokens[3], Token::AndAnd);
        assert_eq!(tokens[5], Token::OrOr);
        assert_eq!(tokens[7], Token::Semicolon);
        assert_eq!(tokens[9], Token::Newline);
        assert_eq!(tokens.len(), 11);
    }

    #[test]
    fn test_single_quotes_keep_everything() {
        let w = words("'$HOME $(ls) *'");
        assert_eq!(w[0].parts, vec![lit("$HOME $(ls) *", Quote::Single)]);
    }

    #[test]
    fn test_double_quotes_expand_variables() {
        let w = words(r#""hi $USER \$x""#);
        assert_eq!(
            w[0].parts,
            vec![
                lit("hi ", Quote::Double),
                WordPart::Variable {
                    name: "USER".into(),
                    op: None,
                    quote: Quote::Double,
                },
                lit(" $x", Quote::Double),
            ]
        );
    }

    #[test]
    fn test_empty_quotes_survive() {
        let w = words("a '' \"\"");
        assert_eq!(w.len(), 3);
        assert_eq!(w[1].parts, vec![lit("", Quote::Single)]);
        assert_eq!(w[2].parts, vec![lit("", Quote::Double)]);
    }

    #[test]
    fn test_escaped_space_joins_word() {
        let w = words(r"my\ file.txt next");
        assert_eq!(w.len(), 2);
        assert_eq!(
            w[0].parts,
            vec![
                lit("my", Quote::Unquoted),
                lit(" ", Quote::Single),
                lit("file.txt", Quote::Unquoted),
            ]
        );
    }

    #[test]
    fn test_unmatched_quote_is_literal() {
        let w = words("echo 'oops");
        assert_eq!(w[1].parts, vec![lit("'oops", Quote::Unquoted)]);
        let w = words("echo \"open");
        assert_eq!(w[1].parts, vec![lit("\"open", Quote::Unquoted)]);
    }

    #[test]
    fn test_nested_command_substitution() {
        let w = words("echo $(echo $(echo nested))");
        assert_eq!(
            w[1].parts,
            vec![WordPart::CommandSub {
                command: "echo $(echo nested)".into(),
                quote: Quote::Unquoted,
            }]
        );
    }

    #[test]
    fn test_substitution_with_quoted_paren() {
        let w = words("$(echo ')')");
        assert_eq!(
            w[0].parts,
            vec![WordPart::CommandSub {
                command: "echo ')'".into(),
                quote: Quote::Unquoted,
            }]
        );
    }

    #[test]
    fn test_backtick_substitution() {
        let w = words("echo `pwd`x");
        assert_eq!(
            w[1].parts,
            vec![
                WordPart::CommandSub {
                    command: "pwd".into(),
                    quote: Quote::Unquoted,
                },
                lit("x", Quote::Unquoted),
            ]
        );
    }

    #[test]
    fn test_unmatched_substitution_is_literal() {
        let w = words("echo $(oops");
        assert_eq!(w[1].to_string(), "$(oops");
        assert!(w[1]
            .parts
            .iter()
            .all(|p| matches!(p, WordPart::Literal { .. })));
    }

    #[test]
    fn test_depth_limit_degrades_to_literal() {
        let tokens = tokenize_with_depth("echo $(a $(b $(c)))", 2);
        let Token::Word(w) = &tokens[1] else {
            panic!("expected word");
        };
        assert_eq!(w.parts, vec![lit("$(a $(b $(c)))", Quote::Single)]);

        let tokens = tokenize_with_depth("echo $(a $(b))", 2);
        let Token::Word(w) = &tokens[1] else {
            panic!("expected word");
        };
        assert!(matches!(w.parts[0], WordPart::CommandSub { .. }));
    }

    #[test]
    fn test_adversarial_nesting_does_not_overflow() {
        let input = format!("echo {}", "\"$(".repeat(5000));
        let tokens = tokenize(&input);
        assert!(!tokens.is_empty());
    }

    #[test]
    fn test_braced_parameters() {
        let w = words("${HOME} ${#PATH} ${X:-def} ${Y:+alt} ${Z:=set}");
        assert_eq!(
            w[0].parts,
            vec![WordPart::Variable {
                name: "HOME".into(),
                op: None,
                quote: Quote::Unquoted,
            }]
        );
        assert!(matches!(
            &w[1].parts[0],
            WordPart::Variable { op: Some(op), .. } if **op == ParamOp::Length
        ));
        assert!(matches!(
            &w[2].parts[0],
            WordPart::Variable { op: Some(op), .. } if **op == ParamOp::Default(Word::literal("def"))
        ));
        assert!(matches!(
            &w[3].parts[0],
            WordPart::Variable { op: Some(op), .. } if matches!(**op, ParamOp::Alternative(_))
        ));
        assert!(matches!(
            &w[4].parts[0],
            WordPart::Variable { op: Some(op), .. } if matches!(**op, ParamOp::Assign(_))
        ));
    }

    #[test]
    fn test_special_variables() {
        let w = words("$? $1 $#");
        let names: Vec<_> = w
            .iter()
            .map(|w| match &w.parts[0] {
                WordPart::Variable { name, .. } => name.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["?", "1", "#"]);
    }

    #[test]
    fn test_redirections() {
        let tokens = lex("cmd > out 2>> err < in 2>&1 1>&2 >&2 &> both &>> both2");
        let ops: Vec<String> = tokens
            .iter()
            .filter(|t| matches!(t, Token::Redirect { .. }))
            .map(ToString::to_string)
            .collect();
        assert_eq!(ops, vec![">", "2>>", "<", "2>&1", ">&2", ">&2", "&>", "&>>"]);
    }

    #[test]
    fn test_digit_only_redirects_at_word_start() {
        let tokens = lex("echo a2>f");
        assert_eq!(tokens[1], Token::Word(Word::literal("a2")));
        assert!(matches!(
            tokens[2],
            Token::Redirect {
                source: RedirectSource::Stdout,
                ..
            }
        ));
    }

    #[test]
    fn test_comment() {
        let tokens = lex("echo hi # a comment\necho a#b");
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[4], Token::Word(Word::literal("a#b")));
    }

    #[test]
    fn test_line_continuation() {
        assert_eq!(words("echo a \\\n b").len(), 3);
        assert_eq!(words("ec\\\nho")[0], Word::literal("echo"));
    }

    #[test]
    fn test_segments() {
        let segs = segments("ls -l | grep x > out; echo done");
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[1], vec![Word::literal("grep"), Word::literal("x")]);
        assert_eq!(segs[2].len(), 2);
    }
}
