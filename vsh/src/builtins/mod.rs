//! Builtin command providers
//!
//! Each group is one [`CommandProvider`] that dispatches on `argv[0]`, and
//! [`register_defaults`] installs all of them into a registry.

use std::collections::HashSet;
use std::sync::Arc;

use crate::registry::{CommandContext, CommandError, CommandRegistry};

mod fs;
mod shell;
mod text;

pub use fs::FsBuiltins;
pub use shell::ShellBuiltins;
pub use text::TextBuiltins;

pub const SHELL_COMMANDS: &[&str] = &[
    "true", "false", "cd", "pwd", "export", "unset", "env", "test", "[", "sleep", "sh", "source",
    ".", "exit",
];

pub const FS_COMMANDS: &[&str] = &["ls", "cat", "mkdir", "rm", "touch"];

pub const TEXT_COMMANDS: &[&str] = &[
    "echo", "printf", "grep", "wc", "head", "tail", "sort", "uniq", "tee", "seq", "yes",
];

/// Install every builtin into `registry`.
pub fn register_defaults(registry: &mut CommandRegistry) {
    registry.register_all(SHELL_COMMANDS, Arc::new(ShellBuiltins));
    registry.register_all(FS_COMMANDS, Arc::new(FsBuiltins));
    registry.register_all(TEXT_COMMANDS, Arc::new(TextBuiltins));
}

/// Single-letter flags followed by operands. `--` ends the flags and a lone
/// `-` is an operand.
#[derive(Debug)]
pub(crate) struct Flags {
    set: HashSet<char>,
    pub operands: Vec<String>,
}

impl Flags {
    pub(crate) fn parse(cmd: &str, args: &[String], allowed: &str) -> Result<Self, CommandError> {
        let mut set = HashSet::new();
        let mut operands = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--" {
                operands.extend(iter.cloned());
                break;
            }
            match arg.strip_prefix('-') {
                Some(letters) if !letters.is_empty() && operands.is_empty() => {
                    for c in letters.chars() {
                        if !allowed.contains(c) {
                            return Err(CommandError::usage(format!(
                                "{cmd}: invalid option -- '{c}'"
                            )));
                        }
                        set.insert(c);
                    }
                }
                _ => operands.push(arg.clone()),
            }
        }
        Ok(Self { set, operands })
    }

    pub(crate) fn has(&self, flag: char) -> bool {
        self.set.contains(&flag)
    }
}

/// One input of a text command.
pub(crate) struct Source {
    /// File operand, `None` for stdin
    pub name: Option<String>,
    pub text: String,
}

/// Read every operand, or stdin when there are none. Unreadable operands
/// are reported on stderr and flip the returned status to 1.
pub(crate) async fn read_sources(
    cmd: &str,
    operands: &[String],
    ctx: &mut CommandContext,
) -> (Vec<Source>, i32) {
    if operands.is_empty() {
        let text = ctx.stdin.read_to_string().await;
        return (vec![Source { name: None, text }], 0);
    }

    let mut sources = Vec::with_capacity(operands.len());
    let mut status = 0;
    for operand in operands {
        if operand == "-" {
            let text = ctx.stdin.read_to_string().await;
            sources.push(Source { name: None, text });
            continue;
        }
        let path = ctx.resolve_path(operand);
        match ctx.fs.read_file(&path).await {
            Ok(data) => sources.push(Source {
                name: Some(operand.clone()),
                text: String::from_utf8_lossy(&data).into_owned(),
            }),
            Err(err) => {
                ctx.write_err(&format!("{cmd}: {operand}: {err}")).await;
                status = 1;
            }
        }
    }
    (sources, status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flags_combined_and_operands() {
        let flags = Flags::parse("ls", &args(&["-la", "dir", "-x"]), "al").unwrap();
        assert!(flags.has('a'));
        assert!(flags.has('l'));
        assert_eq!(flags.operands, vec!["dir", "-x"]);
    }

    #[test]
    fn test_flags_double_dash_and_stdin() {
        let flags = Flags::parse("cat", &args(&["--", "-n", "-"]), "").unwrap();
        assert_eq!(flags.operands, vec!["-n", "-"]);
        let flags = Flags::parse("cat", &args(&["-"]), "").unwrap();
        assert_eq!(flags.operands, vec!["-"]);
    }

    #[test]
    fn test_flags_reject_unknown() {
        let err = Flags::parse("rm", &args(&["-z"]), "rf").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "rm: invalid option -- 'z'");
    }

    #[test]
    fn test_default_registry() {
        let mut registry = CommandRegistry::new();
        register_defaults(&mut registry);
        for name in SHELL_COMMANDS.iter().chain(FS_COMMANDS).chain(TEXT_COMMANDS) {
            assert!(registry.contains(name), "{name} missing");
        }
    }
}
