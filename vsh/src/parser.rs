//! Parser for vsh
//!
//! Parses the lexer's token stream into a [`Script`]. Reserved words are
//! plain unquoted words; they only act as keywords where the grammar expects
//! one, and a simple command may not start with one.

use chumsky::error::SimpleReason;
use chumsky::prelude::*;
use thiserror::Error;

use crate::ast::*;
use crate::environment::is_valid_name;
use crate::lexer::{tokenize_with_depth, Token, DEFAULT_MAX_DEPTH};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("syntax error near unexpected token `{0}'")]
    UnexpectedToken(String),

    #[error("syntax error: unexpected end of file")]
    UnexpectedEof,

    #[error("syntax error: {0}")]
    Syntax(String),

    /// `break` or `continue` outside a loop body
    #[error("{0}: only meaningful in a `for' or `while' loop")]
    LoopControl(String),
}

impl ParseError {
    pub fn exit_code(&self) -> i32 {
        2
    }

    fn from_simple(err: &Simple<Token>) -> Self {
        if let SimpleReason::Custom(msg) = err.reason() {
            return Self::Syntax(msg.clone());
        }
        match err.found() {
            Some(tok) => Self::UnexpectedToken(tok.to_string()),
            None => Self::UnexpectedEof,
        }
    }
}

/// Parse a line or script with the default nesting limit.
pub fn parse(input: &str) -> Result<Script, ParseError> {
    parse_with_depth(input, DEFAULT_MAX_DEPTH)
}

pub fn parse_with_depth(input: &str, max_depth: usize) -> Result<Script, ParseError> {
    let tokens = tokenize_with_depth(input, max_depth);
    let script = parser().parse(tokens).map_err(|errs| {
        errs.first()
            .map_or(ParseError::UnexpectedEof, ParseError::from_simple)
    })?;
    check_loop_control(&script.statements, 0)?;
    Ok(script)
}

/// Parse a token stream into a Script AST
pub fn parser() -> impl Parser<Token, Script, Error = Simple<Token>> {
    let pipeline = recursive(|pipeline| {
        let list = statement_list(pipeline);
        let compound = choice((
            if_clause(list.clone()),
            for_clause(list.clone()),
            while_clause(list),
        ))
        .map(Element::Compound);
        let element = compound.or(simple_command().map(Element::Simple));

        element
            .separated_by(just(Token::Pipe).then_ignore(newlines()))
            .at_least(1)
            .try_map(build_pipeline)
    });

    statement_list(pipeline)
        .then_ignore(end())
        .map(|statements| Script { statements })
}

enum Element {
    Simple(Segment),
    Compound(ScriptNode),
}

enum Item {
    Word(Word),
    Redirect(Redirection),
}

fn newlines() -> impl Parser<Token, (), Error = Simple<Token>> + Clone {
    just(Token::Newline).repeated().ignored()
}

fn separator() -> impl Parser<Token, Token, Error = Simple<Token>> + Clone {
    filter(|t| matches!(t, Token::Semicolon | Token::Newline))
}

/// `and_or { sep and_or }`, each statement tagged with what followed it.
fn statement_list(
    pipeline: impl Parser<Token, ScriptNode, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, Vec<Statement>, Error = Simple<Token>> + Clone {
    let op = choice((
        just(Token::AndAnd).to(ControlOp::And),
        just(Token::OrOr).to(ControlOp::Or),
    ));

    let and_or = pipeline
        .clone()
        .then(op.then_ignore(newlines()).then(pipeline).repeated())
        .then(separator().repeated().at_least(1).or_not())
        .map(|((first, rest), sep)| {
            let mut statements = Vec::with_capacity(rest.len() + 1);
            let mut node = first;
            for (terminator, next) in rest {
                statements.push(Statement { node, terminator });
                node = next;
            }
            let terminator = if sep.is_some() {
                ControlOp::Sequence
            } else {
                ControlOp::End
            };
            statements.push(Statement { node, terminator });
            statements
        });

    separator()
        .repeated()
        .ignore_then(and_or.repeated())
        .map(|chains: Vec<Vec<Statement>>| chains.into_iter().flatten().collect())
}

fn keyword(name: &'static str) -> impl Parser<Token, (), Error = Simple<Token>> + Clone {
    filter_map(move |span, tok| {
        if matches!(&tok, Token::Word(w) if w.is_keyword(name)) {
            Ok(())
        } else {
            Err(Simple::expected_input_found(span, None, Some(tok)))
        }
    })
}

fn word() -> impl Parser<Token, Word, Error = Simple<Token>> + Clone {
    filter_map(|span, tok| match tok {
        Token::Word(w) => Ok(w),
        _ => Err(Simple::expected_input_found(span, None, Some(tok))),
    })
}

/// A word that may start a simple command
fn command_word() -> impl Parser<Token, Word, Error = Simple<Token>> + Clone {
    filter_map(|span, tok| match tok {
        Token::Word(w) if !w.is_reserved() => Ok(w),
        _ => Err(Simple::expected_input_found(span, None, Some(tok))),
    })
}

fn name() -> impl Parser<Token, String, Error = Simple<Token>> + Clone {
    filter_map(|span, tok| match tok {
        Token::Word(w) => match w.as_unquoted_literal() {
            Some(s) if is_valid_name(s) => Ok(s.to_string()),
            _ => Err(Simple::custom(span, format!("`{w}': not a valid identifier"))),
        },
        other => Err(Simple::expected_input_found(span, None, Some(other))),
    })
}

fn redirection() -> impl Parser<Token, Redirection, Error = Simple<Token>> + Clone {
    let dup = filter_map(|span, tok| match tok {
        Token::Redirect {
            source,
            mode,
            fd: Some(fd),
        } => Ok(Redirection {
            source,
            mode,
            target: RedirectTarget::Fd(fd),
        }),
        _ => Err(Simple::expected_input_found(span, None, Some(tok))),
    });

    let file = filter_map(|span, tok| match tok {
        Token::Redirect {
            source,
            mode,
            fd: None,
        } => Ok((source, mode)),
        _ => Err(Simple::expected_input_found(span, None, Some(tok))),
    })
    .then(word())
    .map(|((source, mode), target)| Redirection {
        source,
        mode,
        target: RedirectTarget::Path(target),
    });

    dup.or(file)
}

fn simple_command() -> impl Parser<Token, Segment, Error = Simple<Token>> + Clone {
    let first = choice((
        redirection().map(Item::Redirect),
        command_word().map(Item::Word),
    ));
    let rest = choice((redirection().map(Item::Redirect), word().map(Item::Word))).repeated();

    first.then(rest).map(|(first, rest)| {
        let mut segment = Segment::default();
        for item in std::iter::once(first).chain(rest) {
            match item {
                Item::Redirect(r) => segment.redirections.push(r),
                Item::Word(w) => {
                    if segment.words.is_empty() {
                        if let Some(assignment) = split_assignment(&w) {
                            segment.assignments.push(assignment);
                            continue;
                        }
                    }
                    segment.words.push(w);
                }
            }
        }
        segment
    })
}

/// `NAME=value` when the word starts with an unquoted `NAME=`.
fn split_assignment(word: &Word) -> Option<Assignment> {
    let (first, rest) = word.parts.split_first()?;
    let WordPart::Literal {
        text,
        quote: Quote::Unquoted,
    } = first
    else {
        return None;
    };
    let (name, value) = text.split_once('=')?;
    if !is_valid_name(name) {
        return None;
    }

    let mut parts = Vec::with_capacity(rest.len() + 1);
    if !value.is_empty() {
        parts.push(WordPart::Literal {
            text: value.to_string(),
            quote: Quote::Unquoted,
        });
    }
    parts.extend(rest.iter().cloned());
    Some(Assignment {
        name: name.to_string(),
        value: Word { parts },
    })
}

fn build_pipeline(
    elements: Vec<Element>,
    span: std::ops::Range<usize>,
) -> Result<ScriptNode, Simple<Token>> {
    if elements.len() == 1 {
        return Ok(match elements.into_iter().next() {
            Some(Element::Simple(segment)) => simple_node(segment),
            Some(Element::Compound(node)) => node,
            None => return Err(Simple::custom(span, "empty pipeline")),
        });
    }

    let mut segments = Vec::with_capacity(elements.len());
    for element in elements {
        match element {
            Element::Simple(segment) => segments.push(segment),
            Element::Compound(_) => {
                return Err(Simple::custom(
                    span,
                    "compound commands cannot be used in a pipeline",
                ))
            }
        }
    }
    Ok(ScriptNode::Pipeline(Pipeline { segments }))
}

/// `break`, `continue` and `exit` are statements, not commands, whatever
/// assignments or redirections surround them.
fn simple_node(segment: Segment) -> ScriptNode {
    match segment.words.first().and_then(Word::as_unquoted_literal) {
        Some("break") => ScriptNode::Break(ControlCommand::from_segment(segment)),
        Some("continue") => ScriptNode::Continue(ControlCommand::from_segment(segment)),
        Some("exit") => ScriptNode::Exit(ControlCommand::from_segment(segment)),
        _ => ScriptNode::Command(segment),
    }
}

fn if_clause(
    list: impl Parser<Token, Vec<Statement>, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, ScriptNode, Error = Simple<Token>> + Clone {
    // if cond; then body; [elif cond; then body;]* [else body;] fi
    keyword("if")
        .ignore_then(list.clone())
        .then_ignore(keyword("then"))
        .then(list.clone())
        .then(
            keyword("elif")
                .ignore_then(list.clone())
                .then_ignore(keyword("then"))
                .then(list.clone())
                .map(|(condition, body)| ElifClause { condition, body })
                .repeated(),
        )
        .then(keyword("else").ignore_then(list).or_not())
        .then_ignore(keyword("fi"))
        .map(|(((condition, then_body), elif_clauses), else_body)| {
            ScriptNode::If(IfStatement {
                condition,
                then_body,
                elif_clauses,
                else_body,
            })
        })
}

fn for_clause(
    list: impl Parser<Token, Vec<Statement>, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, ScriptNode, Error = Simple<Token>> + Clone {
    // for var [in items...]; do body; done
    keyword("for")
        .ignore_then(name())
        .then(keyword("in").ignore_then(word().repeated()).or_not())
        .then_ignore(separator().repeated())
        .then_ignore(keyword("do"))
        .then(list)
        .then_ignore(keyword("done"))
        .map(|((variable, items), body)| {
            // Without `in`, iterate over "$@"
            let items = items.unwrap_or_else(|| {
                vec![Word {
                    parts: vec![WordPart::Variable {
                        name: "@".to_string(),
                        op: None,
                        quote: Quote::Double,
                    }],
                }]
            });
            ScriptNode::For(ForLoop {
                variable,
                items,
                body,
            })
        })
}

fn while_clause(
    list: impl Parser<Token, Vec<Statement>, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, ScriptNode, Error = Simple<Token>> + Clone {
    // while cond; do body; done
    keyword("while")
        .ignore_then(list.clone())
        .then_ignore(keyword("do"))
        .then(list)
        .then_ignore(keyword("done"))
        .map(|(condition, body)| ScriptNode::While(WhileLoop { condition, body }))
}

fn check_loop_control(statements: &[Statement], loops: usize) -> Result<(), ParseError> {
    for statement in statements {
        match &statement.node {
            ScriptNode::Break(_) if loops == 0 => {
                return Err(ParseError::LoopControl("break".to_string()))
            }
            ScriptNode::Continue(_) if loops == 0 => {
                return Err(ParseError::LoopControl("continue".to_string()))
            }
            ScriptNode::If(stmt) => {
                check_loop_control(&stmt.condition, loops)?;
                check_loop_control(&stmt.then_body, loops)?;
                for elif in &stmt.elif_clauses {
                    check_loop_control(&elif.condition, loops)?;
                    check_loop_control(&elif.body, loops)?;
                }
                if let Some(body) = &stmt.else_body {
                    check_loop_control(body, loops)?;
                }
            }
            ScriptNode::For(stmt) => check_loop_control(&stmt.body, loops + 1)?,
            ScriptNode::While(stmt) => {
                check_loop_control(&stmt.condition, loops + 1)?;
                check_loop_control(&stmt.body, loops + 1)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Vec<Statement> {
        parse(input).unwrap().statements
    }

    fn words(segment: &Segment) -> Vec<String> {
        segment.words.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_simple_command() {
        let stmts = parse_ok("echo hello world");
        assert_eq!(stmts.len(), 1);
        let ScriptNode::Command(seg) = &stmts[0].node else {
            panic!("expected command");
        };
        assert_eq!(words(seg), vec!["echo", "hello", "world"]);
        assert_eq!(stmts[0].terminator, ControlOp::End);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_ok("").is_empty());
        assert!(parse_ok("\n;\n").is_empty());
        assert!(parse_ok("# only a comment").is_empty());
    }

    #[test]
    fn test_pipeline() {
        let stmts = parse_ok("ls | grep foo | wc -l");
        let ScriptNode::Pipeline(p) = &stmts[0].node else {
            panic!("expected pipeline");
        };
        assert_eq!(p.segments.len(), 3);
        assert_eq!(words(&p.segments[2]), vec!["wc", "-l"]);
    }

    #[test]
    fn test_control_operators() {
        let stmts = parse_ok("a && b || c; d");
        let ops: Vec<ControlOp> = stmts.iter().map(|s| s.terminator).collect();
        assert_eq!(
            ops,
            vec![ControlOp::And, ControlOp::Or, ControlOp::Sequence, ControlOp::End]
        );
    }

    #[test]
    fn test_redirections_removed_from_argv() {
        let stmts = parse_ok("cmd a > out 2>&1 b");
        let ScriptNode::Command(seg) = &stmts[0].node else {
            panic!("expected command");
        };
        assert_eq!(words(seg), vec!["cmd", "a", "b"]);
        assert_eq!(seg.redirections.len(), 2);
        assert_eq!(
            seg.redirections[0],
            Redirection {
                source: RedirectSource::Stdout,
                mode: RedirectMode::Write,
                target: RedirectTarget::Path(Word::literal("out")),
            }
        );
        assert_eq!(seg.redirections[1].target, RedirectTarget::Fd(1));
    }

    #[test]
    fn test_missing_redirect_target() {
        assert!(parse("echo hi >").is_err());
    }

    #[test]
    fn test_assignments() {
        let stmts = parse_ok("FOO=bar BAZ= cmd X=1");
        let ScriptNode::Command(seg) = &stmts[0].node else {
            panic!("expected command");
        };
        assert_eq!(seg.assignments.len(), 2);
        assert_eq!(seg.assignments[0].name, "FOO");
        assert_eq!(seg.assignments[0].value, Word::literal("bar"));
        assert_eq!(seg.assignments[1].value, Word::empty());
        assert_eq!(words(seg), vec!["cmd", "X=1"]);
    }

    #[test]
    fn test_quoted_assignment_is_a_word() {
        let stmts = parse_ok("'A=1'");
        let ScriptNode::Command(seg) = &stmts[0].node else {
            panic!("expected command");
        };
        assert!(seg.assignments.is_empty());
        assert_eq!(seg.words.len(), 1);
    }

    #[test]
    fn test_if_elif_else() {
        let stmts = parse_ok("if false; then echo a; elif true; then echo b; else echo c; fi");
        let ScriptNode::If(stmt) = &stmts[0].node else {
            panic!("expected if");
        };
        assert_eq!(stmt.condition.len(), 1);
        assert_eq!(stmt.elif_clauses.len(), 1);
        assert!(stmt.else_body.is_some());
    }

    #[test]
    fn test_multiline_if() {
        let stmts = parse_ok("if true\nthen\n  echo yes\nfi\necho after");
        assert_eq!(stmts.len(), 2);
        assert!(matches!(stmts[0].node, ScriptNode::If(_)));
    }

    #[test]
    fn test_for_loop() {
        let stmts = parse_ok("for x in a b c; do echo $x; done");
        let ScriptNode::For(stmt) = &stmts[0].node else {
            panic!("expected for");
        };
        assert_eq!(stmt.variable, "x");
        assert_eq!(stmt.items.len(), 3);
        assert_eq!(stmt.body.len(), 1);
    }

    #[test]
    fn test_nested_loops() {
        let stmts = parse_ok("for a in 1 2; do for b in x y; do echo $a$b; done; done");
        let ScriptNode::For(outer) = &stmts[0].node else {
            panic!("expected for");
        };
        assert!(matches!(outer.body[0].node, ScriptNode::For(_)));
    }

    #[test]
    fn test_while_with_break_and_continue() {
        let stmts = parse_ok("while true; do if true; then break; fi; continue; done");
        let ScriptNode::While(stmt) = &stmts[0].node else {
            panic!("expected while");
        };
        assert_eq!(stmt.body.len(), 2);
        assert!(matches!(stmt.body[1].node, ScriptNode::Continue(_)));
    }

    #[test]
    fn test_keywords_as_arguments() {
        let stmts = parse_ok("echo if then done");
        let ScriptNode::Command(seg) = &stmts[0].node else {
            panic!("expected command");
        };
        assert_eq!(words(seg), vec!["echo", "if", "then", "done"]);
    }

    #[test]
    fn test_exit_statement() {
        let stmts = parse_ok("exit 3");
        assert_eq!(
            stmts[0].node,
            ScriptNode::Exit(ControlCommand::new(vec![Word::literal("3")]))
        );
        assert_eq!(
            parse_ok("exit")[0].node,
            ScriptNode::Exit(ControlCommand::default())
        );
    }

    #[test]
    fn test_exit_keeps_redirections_and_assignments() {
        let stmts = parse_ok("X=1 exit 3 2>/dev/null");
        let ScriptNode::Exit(cmd) = &stmts[0].node else {
            panic!("expected exit");
        };
        assert_eq!(cmd.args, vec![Word::literal("3")]);
        assert_eq!(cmd.assignments.len(), 1);
        assert_eq!(cmd.redirections.len(), 1);
    }

    #[test]
    fn test_break_with_operand() {
        let stmts = parse_ok("for a in 1; do for b in 2; do break 2 >&2; done; done");
        let ScriptNode::For(outer) = &stmts[0].node else {
            panic!("expected for");
        };
        let ScriptNode::For(inner) = &outer.body[0].node else {
            panic!("expected inner for");
        };
        let ScriptNode::Break(cmd) = &inner.body[0].node else {
            panic!("expected break");
        };
        assert_eq!(cmd.args, vec![Word::literal("2")]);
        assert_eq!(cmd.redirections.len(), 1);
    }

    #[test]
    fn test_exit_inside_pipeline_is_a_command() {
        let stmts = parse_ok("true | exit 4");
        assert!(matches!(stmts[0].node, ScriptNode::Pipeline(_)));
    }

    #[test]
    fn test_break_outside_loop() {
        assert_eq!(
            parse("echo a; break"),
            Err(ParseError::LoopControl("break".to_string()))
        );
        assert!(matches!(
            parse("if true; then continue; fi"),
            Err(ParseError::LoopControl(_))
        ));
    }

    #[test]
    fn test_unterminated_if() {
        assert!(parse("if true; then echo x").is_err());
        assert!(parse("done").is_err());
    }

    #[test]
    fn test_background_is_rejected() {
        assert_eq!(
            parse("sleep 1 &"),
            Err(ParseError::UnexpectedToken("&".to_string()))
        );
    }

    #[test]
    fn test_compound_in_pipeline_rejected() {
        assert!(parse("for x in a; do echo $x; done | cat").is_err());
    }
}
