//! vsh - Embeddable POSIX-style shell over a virtual filesystem
//!
//! This crate provides:
//! - A tokenizer, parser and evaluator for a POSIX-like command language
//!   (pipelines, `&&`/`||`, `if`/`for`/`while`, redirections, substitutions)
//! - Brace, parameter, command-substitution and glob expansion
//! - Cooperative processes connected by in-memory streams, with
//!   callback-based signal delivery
//! - A per-shell command registry with builtin providers (ls, cat, grep, ...)
//!
//! ```no_run
//! # async fn demo() -> vsh::ShellResult<()> {
//! let shell = vsh::Shell::new();
//! let result = shell.run("printf 'pear\\napple\\n' | sort | head -n 1").await?;
//! assert_eq!(result.stdout, "apple\n");
//! assert!(result.success());
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod builtins;
pub mod environment;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod process;
pub mod registry;
pub mod shell;
pub mod vfs;

pub use error::{ShellError, ShellResult};
pub use eval::{expand_braces, ExecOptions};
pub use parser::{parse, ParseError};
pub use process::{ExitStatus, InputStream, OutputStream, Signal};
pub use registry::{CommandContext, CommandError, CommandProvider, CommandRegistry, CommandResult};
pub use shell::{ExecutionResult, OutputCallbacks, Shell, ShellBuilder};
pub use vfs::{FileSystem, FsError, MemoryFs};
