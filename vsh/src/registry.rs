//! Command registry
//!
//! Every command a pipeline stage can run is a [`CommandProvider`] registered
//! by name. A registry belongs to one shell; nothing is global.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::environment::SharedEnvironment;
use crate::process::{ExitStatus, InputStream, OutputStream, Signal, SignalChannel, StreamClosed};
use crate::vfs::{resolve_path, FileSystem, FsError};

/// Failure reported by a provider instead of an exit status.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Message for stderr and the status to report
    #[error("{message}")]
    Failed { message: String, code: i32 },

    /// Bad arguments; status 2
    #[error("{0}")]
    Usage(String),

    /// Stdout reader went away; silent, status 141
    #[error(transparent)]
    BrokenPipe(#[from] StreamClosed),

    #[error("{}", .0.describe())]
    Fs(#[from] FsError),
}

impl CommandError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            code: 1,
        }
    }

    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self::Failed {
            message: message.into(),
            code,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Failed { code, .. } => *code,
            Self::Usage(_) => 2,
            Self::BrokenPipe(_) => 141,
            Self::Fs(_) => 1,
        }
    }

    /// Diagnostic line for stderr, `None` when the failure is silent.
    pub fn diagnostic(&self, command: &str) -> Option<String> {
        match self {
            Self::BrokenPipe(_) => None,
            Self::Fs(_) => Some(format!("{command}: {self}")),
            Self::Failed { message, .. } | Self::Usage(message) => Some(message.clone()),
        }
    }
}

pub type CommandResult = Result<ExitStatus, CommandError>;

/// What a script-running provider may ask the interpreter to do.
pub struct ScriptRequest {
    /// Script name as given (becomes `$0`)
    pub name: String,
    pub source: String,
    pub args: Vec<String>,
    /// Run against the caller's environment instead of a copy
    pub shared_env: bool,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub depth: usize,
}

/// Entry point back into the interpreter, used by `sh` and `source`.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn run_script(&self, request: ScriptRequest) -> ExitStatus;
}

/// Everything a provider sees while it runs.
pub struct CommandContext {
    pub stdin: InputStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    /// Working directory when the stage started
    pub cwd: String,
    /// Variable snapshot including prefix assignments
    pub env: HashMap<String, String>,
    pub signals: SignalChannel,
    pub fs: Arc<dyn FileSystem>,
    /// Live session state, for builtins such as `cd` and `export`
    pub environment: SharedEnvironment,
    pub host: Arc<dyn ScriptHost>,
    /// Nesting depth of the statement running this stage
    pub depth: usize,
}

impl CommandContext {
    pub fn resolve_path(&self, path: &str) -> String {
        resolve_path(&self.cwd, path)
    }

    pub fn on_signal(&self, handler: impl Fn(Signal) + Send + Sync + 'static) {
        self.signals.on_signal(handler);
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    pub async fn write_out(&self, s: &str) -> Result<(), CommandError> {
        Ok(self.stdout.write_str(s).await?)
    }

    pub async fn writeln(&self, s: &str) -> Result<(), CommandError> {
        Ok(self.stdout.writeln(s).await?)
    }

    /// Diagnostics never fail the command; a closed stderr is ignored.
    pub async fn write_err(&self, msg: &str) {
        let _ = self.stderr.writeln(msg).await;
    }
}

#[async_trait]
pub trait CommandProvider: Send + Sync {
    /// Run one invocation. `argv[0]` is the command name.
    async fn execute(&self, argv: &[String], ctx: &mut CommandContext) -> CommandResult;
}

#[derive(Default, Clone)]
pub struct CommandRegistry {
    providers: HashMap<String, Arc<dyn CommandProvider>>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under `name`, replacing any previous provider.
    pub fn register(&mut self, name: &str, provider: Arc<dyn CommandProvider>) {
        self.providers.insert(name.to_string(), provider);
    }

    /// Register one provider under several names.
    pub fn register_all(&mut self, names: &[&str], provider: Arc<dyn CommandProvider>) {
        for name in names {
            self.register(name, provider.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.providers.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    #[async_trait]
    impl CommandProvider for Nop {
        async fn execute(&self, _argv: &[String], _ctx: &mut CommandContext) -> CommandResult {
            Ok(ExitStatus::SUCCESS)
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = CommandRegistry::new();
        registry.register_all(&["b", "a"], Arc::new(Nop));
        assert!(registry.contains("a"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.unregister("a"));
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_registries_are_independent() {
        let mut first = CommandRegistry::new();
        let second = CommandRegistry::new();
        first.register("only-here", Arc::new(Nop));
        assert!(!second.contains("only-here"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CommandError::failed("x").exit_code(), 1);
        assert_eq!(CommandError::usage("x").exit_code(), 2);
        assert_eq!(CommandError::from(StreamClosed).exit_code(), 141);
        assert!(CommandError::from(StreamClosed).diagnostic("yes").is_none());

        let err = CommandError::from(FsError::not_found("/nope"));
        assert_eq!(
            err.diagnostic("cat").as_deref(),
            Some("cat: /nope: No such file or directory")
        );
    }
}
