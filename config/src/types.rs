use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VshConfig {
    pub shell: ShellConfig,
    pub limits: LimitsConfig,
    pub execution: ExecutionConfig,
    /// Files written into the in-memory filesystem at start
    pub seed: Vec<SeedFile>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Home directory inside the virtual filesystem
    pub home: String,
    /// Prompt template. `{cwd}`, `{status}` and `{user}` are substituted.
    pub prompt: String,
    /// Initial shell variables
    pub env: HashMap<String, String>,
    pub history: HistoryConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            home: "/home/user".to_string(),
            prompt: "vsh:{cwd}$ ".to_string(),
            env: HashMap::new(),
            history: HistoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Host path, `~` is expanded
    pub file: String,
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: "~/.vsh_history".to_string(),
            max_entries: 10000,
        }
    }
}

impl HistoryConfig {
    /// History file on the host with `~` and `$VAR` expanded.
    pub fn path(&self) -> PathBuf {
        match shellexpand::full(&self.file) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => PathBuf::from(shellexpand::tilde(&self.file).as_ref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Nesting cap for `$(...)` and `sh` scripts
    pub max_substitution_depth: usize,
    /// Words produced by one brace expansion
    pub max_brace_expansion: usize,
    /// Iterations per loop, 0 for unlimited
    pub max_loop_iterations: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_substitution_depth: 32,
            max_brace_expansion: 10_000,
            max_loop_iterations: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Report the last failing pipeline stage instead of the last stage
    pub pipefail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFile {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Extra `tracing` directives, e.g. `vsh::eval=trace`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            filter: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl VshConfig {
    /// Reject values the shell cannot run with.
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        if !self.shell.home.starts_with('/') {
            return Err(crate::ConfigError::InvalidValue(format!(
                "shell.home must be an absolute path, got '{}'",
                self.shell.home
            )));
        }
        if self.limits.max_substitution_depth == 0 {
            return Err(crate::ConfigError::InvalidValue(
                "limits.max_substitution_depth must be at least 1".to_string(),
            ));
        }
        if let Some(file) = self.seed.iter().find(|f| !f.path.starts_with('/')) {
            return Err(crate::ConfigError::InvalidValue(format!(
                "seed path must be absolute, got '{}'",
                file.path
            )));
        }
        Ok(())
    }
}
