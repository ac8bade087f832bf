//! Word expansion
//!
//! Phases run in a fixed order over a whole argument list: parameters (with
//! tilde), command substitution, field assembly and splitting, brace
//! expansion, pathname expansion. Between assembly and the last phase a
//! field is kept in escaped form, where `\c` means a literal `c`, so quoted
//! text survives brace and glob expansion untouched.

use std::future::Future;
use std::pin::Pin;

use crate::ast::{ParamOp, Quote, Word, WordPart};
use crate::environment::{read_env, write_env};
use crate::error::ShellResult;
use crate::parser::parse_with_depth;
use crate::process::pipe;

use super::braces::expand_braces_limited;
use super::glob::{expand_glob, has_glob_chars, unescape};
use super::{ExecContext, Flow, Interpreter};

const DEFAULT_HOME: &str = "/home/user";

/// A word part after the parameter phase.
enum Piece {
    Text {
        text: String,
        quote: Quote,
        /// Produced by an expansion, so subject to field splitting
        expanded: bool,
    },
    Sub {
        command: String,
        quote: Quote,
    },
}

fn escape_all(text: &str, out: &mut String) {
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '?' | '[' | ']' | '{' | '}' | ',') {
            out.push('\\');
        }
        out.push(c);
    }
}

fn escape_char(c: char, specials: &[char], out: &mut String) {
    if specials.contains(&c) {
        out.push('\\');
    }
    out.push(c);
}

/// Split points and escaping for one word.
#[derive(Default)]
struct Fields {
    done: Vec<String>,
    current: String,
    /// The current field exists even if empty (`""`)
    touched: bool,
}

impl Fields {
    fn push_quoted(&mut self, text: &str) {
        escape_all(text, &mut self.current);
        self.touched = true;
    }

    fn push_literal(&mut self, text: &str) {
        for c in text.chars() {
            escape_char(c, &['\\'], &mut self.current);
        }
        self.touched |= !text.is_empty();
    }

    /// Unquoted expansion result: split on whitespace, globs stay active.
    fn push_split(&mut self, text: &str) {
        for c in text.chars() {
            if c.is_whitespace() {
                self.end_field();
            } else {
                escape_char(c, &['\\', '{', '}', ','], &mut self.current);
                self.touched = true;
            }
        }
    }

    fn end_field(&mut self) {
        if self.touched {
            self.done.push(std::mem::take(&mut self.current));
            self.touched = false;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.end_field();
        self.done
    }
}

fn is_quoted_positional(word: &Word) -> bool {
    matches!(
        word.parts.as_slice(),
        [WordPart::Variable { name, op: None, quote: Quote::Double }] if name == "@"
    )
}

impl Interpreter {
    /// Expand an argument list into argv.
    pub(crate) async fn expand_words(
        &self,
        words: &[Word],
        ctx: &ExecContext,
    ) -> ShellResult<Vec<String>> {
        // Parameters for every word first, then substitutions
        let mut resolved: Vec<Option<Vec<Piece>>> = Vec::with_capacity(words.len());
        for word in words {
            if is_quoted_positional(word) {
                resolved.push(None);
            } else {
                resolved.push(Some(self.resolve_parameters(word, ctx).await?));
            }
        }
        for pieces in resolved.iter_mut().flatten() {
            self.run_substitutions(pieces, ctx).await?;
        }

        let cwd = read_env(&self.env).cwd.clone();
        let mut argv = Vec::new();
        for pieces in resolved {
            let Some(pieces) = pieces else {
                let positional = read_env(&self.env).positional.clone();
                argv.extend(positional.into_iter().skip(1));
                continue;
            };
            for field in assemble(pieces) {
                for pattern in expand_braces_limited(&field, self.options.max_brace_expansion) {
                    if has_glob_chars(&pattern) {
                        argv.extend(expand_glob(self.fs.as_ref(), &cwd, &pattern).await);
                    } else {
                        argv.push(unescape(&pattern));
                    }
                }
            }
        }
        tracing::trace!(?argv, "expanded words");
        Ok(argv)
    }

    /// Expand one word to one string: no splitting, braces or globs.
    /// Used for assignment values and parameter operands.
    pub(crate) fn expand_word_single<'a>(
        &'a self,
        word: &'a Word,
        ctx: &'a ExecContext,
    ) -> Pin<Box<dyn Future<Output = ShellResult<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut pieces = self.resolve_parameters(word, ctx).await?;
            self.run_substitutions(&mut pieces, ctx).await?;
            let mut out = String::new();
            for piece in pieces {
                if let Piece::Text { text, .. } = piece {
                    out.push_str(&text);
                }
            }
            Ok(out)
        })
    }

    async fn resolve_parameters(&self, word: &Word, ctx: &ExecContext) -> ShellResult<Vec<Piece>> {
        let mut pieces = Vec::with_capacity(word.parts.len());
        for (index, part) in word.parts.iter().enumerate() {
            match part {
                WordPart::Literal { text, quote } => {
                    let text = if index == 0 && *quote == Quote::Unquoted {
                        self.expand_tilde(text, word.parts.len() == 1)
                    } else {
                        text.clone()
                    };
                    pieces.push(Piece::Text {
                        text,
                        quote: *quote,
                        expanded: false,
                    });
                }
                WordPart::Variable { name, op, quote } => {
                    let text = self.expand_parameter(name, op.as_deref(), ctx).await?;
                    pieces.push(Piece::Text {
                        text,
                        quote: *quote,
                        expanded: true,
                    });
                }
                WordPart::CommandSub { command, quote } => pieces.push(Piece::Sub {
                    command: command.clone(),
                    quote: *quote,
                }),
            }
        }
        Ok(pieces)
    }

    fn expand_tilde(&self, text: &str, whole_word: bool) -> String {
        let rest = match text.strip_prefix('~') {
            Some("") if whole_word => "",
            Some(rest) if rest.starts_with('/') => rest,
            _ => return text.to_string(),
        };
        let home = read_env(&self.env)
            .get_var("HOME")
            .unwrap_or(DEFAULT_HOME)
            .to_string();
        format!("{home}{rest}")
    }

    async fn expand_parameter(
        &self,
        name: &str,
        op: Option<&ParamOp>,
        ctx: &ExecContext,
    ) -> ShellResult<String> {
        let value = read_env(&self.env).lookup(name).filter(|v| !v.is_empty());
        Ok(match op {
            None => value.unwrap_or_default(),
            Some(ParamOp::Length) => value.map_or(0, |v| v.chars().count()).to_string(),
            Some(ParamOp::Default(word)) => match value {
                Some(v) => v,
                None => self.expand_word_single(word, ctx).await?,
            },
            Some(ParamOp::Alternative(word)) => match value {
                Some(_) => self.expand_word_single(word, ctx).await?,
                None => String::new(),
            },
            Some(ParamOp::Assign(word)) => match value {
                Some(v) => v,
                None => {
                    let assigned = self.expand_word_single(word, ctx).await?;
                    write_env(&self.env).set_var(name, &assigned);
                    assigned
                }
            },
        })
    }

    async fn run_substitutions(&self, pieces: &mut [Piece], ctx: &ExecContext) -> ShellResult<()> {
        for piece in pieces.iter_mut() {
            if let Piece::Sub { command, quote } = piece {
                let quote = *quote;
                let text = self.command_substitution(command, ctx).await?;
                *piece = Piece::Text {
                    text,
                    quote,
                    expanded: true,
                };
            }
        }
        Ok(())
    }

    /// Run `command` and capture its stdout, minus one trailing newline.
    ///
    /// The command runs against a copy of the environment; only its exit
    /// status flows back, as `$?`.
    async fn command_substitution(&self, command: &str, ctx: &ExecContext) -> ShellResult<String> {
        let depth = ctx.depth + 1;
        if depth > self.options.max_depth {
            let _ = ctx.stderr.writeln("vsh: maximum nesting depth exceeded").await;
            self.set_status(2);
            return Ok(String::new());
        }
        let script = match parse_with_depth(command, self.options.max_depth) {
            Ok(script) => script,
            Err(err) => {
                let _ = ctx.stderr.writeln(&format!("vsh: {err}")).await;
                self.set_status(2);
                return Ok(String::new());
            }
        };

        let sub = self.isolated();
        let (stdout, mut captured) = pipe();
        let sub_ctx = ExecContext {
            stdout,
            stderr: ctx.stderr.clone(),
            depth,
            loops: 0,
        };
        let runner = async {
            let result = sub.run_statements(&script.statements, &sub_ctx).await;
            drop(sub_ctx);
            result
        };
        let (result, output) = tokio::join!(runner, captured.read_to_end());

        let status = match result? {
            Flow::Exit(code) => code,
            _ => sub.last_status(),
        };
        self.set_status(status);

        let mut text = String::from_utf8_lossy(&output).into_owned();
        if text.ends_with('\n') {
            text.pop();
        }
        tracing::trace!(command, status, "command substitution");
        Ok(text)
    }
}

fn assemble(pieces: Vec<Piece>) -> Vec<String> {
    let mut fields = Fields::default();
    for piece in pieces {
        match piece {
            Piece::Text { text, quote, .. } if quote.is_quoted() => fields.push_quoted(&text),
            Piece::Text {
                text,
                expanded: false,
                ..
            } => fields.push_literal(&text),
            Piece::Text { text, .. } => fields.push_split(&text),
            // Substitutions have all run by now
            Piece::Sub { .. } => {}
        }
    }
    fields.finish()
}
