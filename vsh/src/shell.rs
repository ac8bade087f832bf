//! Public run surface
//!
//! A [`Shell`] owns one interpreter, its command registry and its session
//! environment. Each [`Shell::run`] call parses a command line, executes it
//! and returns the collected output, optionally streaming chunks to
//! [`OutputCallbacks`] as stages produce them.

use std::fmt;
use std::sync::{Arc, RwLock};

use vsh_config::VshConfig;

use crate::builtins::register_defaults;
use crate::environment::{read_env, Environment, SharedEnvironment};
use crate::error::{ShellError, ShellResult};
use crate::eval::{ExecContext, ExecOptions, Interpreter};
use crate::parser::parse_with_depth;
use crate::process::{pipe, InputStream, JobTable, Signal};
use crate::registry::{CommandProvider, CommandRegistry};
use crate::vfs::{normalize_path, FileSystem, MemoryFs};

pub const DEFAULT_HOME: &str = "/home/user";

type ChunkFn = Box<dyn Fn(&str) + Send + Sync>;

/// Collected result of one [`Shell::run`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
    /// The line ran `exit`; an interactive caller should stop
    pub exited: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Per-chunk output hooks for streaming runs.
#[derive(Default)]
pub struct OutputCallbacks {
    stdout: Option<ChunkFn>,
    stderr: Option<ChunkFn>,
}

impl OutputCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stdout(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.stdout = Some(Box::new(f));
        self
    }

    pub fn on_stderr(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.stderr = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for OutputCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputCallbacks")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Split off the longest valid UTF-8 prefix, keeping an incomplete trailing
/// sequence for the next chunk.
fn take_text(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(_) => pending.len(),
    };
    let rest = pending.split_off(valid);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

async fn collect(mut input: InputStream, callback: Option<&ChunkFn>) -> String {
    let mut collected = String::new();
    let mut pending = Vec::new();
    while let Some(chunk) = input.read_chunk().await {
        pending.extend_from_slice(&chunk);
        let text = take_text(&mut pending);
        if text.is_empty() {
            continue;
        }
        if let Some(callback) = callback {
            callback(&text);
        }
        collected.push_str(&text);
    }
    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        if let Some(callback) = callback {
            callback(&text);
        }
        collected.push_str(&text);
    }
    collected
}

pub struct Shell {
    interpreter: Interpreter,
    jobs: Arc<JobTable>,
    fs: Arc<dyn FileSystem>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell")
            .field("cwd", &self.cwd())
            .field("options", self.interpreter.options())
            .finish_non_exhaustive()
    }
}

impl Shell {
    /// Shell over a fresh in-memory filesystem with the default builtins.
    pub fn new() -> Self {
        ShellBuilder::new().build()
    }

    pub fn builder() -> ShellBuilder {
        ShellBuilder::new()
    }

    /// Run one command line and collect its output.
    pub async fn run(&self, line: &str) -> ShellResult<ExecutionResult> {
        self.run_with(line, None).await
    }

    /// Run one command line, streaming output chunks to `callbacks` as they
    /// are produced. Only interpreter defects are returned as `Err`.
    pub async fn run_with(
        &self,
        line: &str,
        callbacks: Option<&OutputCallbacks>,
    ) -> ShellResult<ExecutionResult> {
        let on_stdout = callbacks.and_then(|c| c.stdout.as_ref());
        let on_stderr = callbacks.and_then(|c| c.stderr.as_ref());
        self.jobs.reset();

        let script = match parse_with_depth(line, self.interpreter.options().max_depth) {
            Ok(script) => script,
            Err(err) => {
                tracing::debug!(error = %err, "parse failed");
                let stderr = format!("vsh: {err}\n");
                if let Some(callback) = on_stderr {
                    callback(&stderr);
                }
                let code = err.exit_code();
                self.interpreter.set_status(code);
                return Ok(ExecutionResult {
                    stdout: String::new(),
                    stderr,
                    code,
                    exited: false,
                });
            }
        };

        let (out_tx, out_rx) = pipe();
        let (err_tx, err_rx) = pipe();
        let ctx = ExecContext {
            stdout: out_tx,
            stderr: err_tx,
            depth: 0,
            loops: 0,
        };
        let runner = async move {
            let result = self.interpreter.execute(&script, &ctx).await;
            drop(ctx);
            result
        };
        let (result, stdout, mut stderr) = tokio::join!(
            runner,
            collect(out_rx, on_stdout),
            collect(err_rx, on_stderr)
        );

        let (code, exited) = match result {
            Ok(done) => (done.code, done.exited),
            Err(err @ ShellError::Internal(_)) => {
                tracing::error!(error = %err, "interpreter failed");
                return Err(err);
            }
            Err(err) => {
                let message = format!("vsh: {err}\n");
                if let Some(callback) = on_stderr {
                    callback(&message);
                }
                stderr.push_str(&message);
                let code = err.exit_code();
                self.interpreter.set_status(code);
                (code, false)
            }
        };
        Ok(ExecutionResult {
            stdout,
            stderr,
            code,
            exited,
        })
    }

    /// Deliver a cooperative signal to every running stage. Statements that
    /// have not started yet are skipped. Returns how many stages were running.
    pub fn signal(&self, signal: Signal) -> usize {
        let delivered = self.jobs.signal(signal);
        tracing::debug!(%signal, delivered, "signal fanned out");
        delivered
    }

    pub fn environment(&self) -> &SharedEnvironment {
        self.interpreter.environment()
    }

    pub fn cwd(&self) -> String {
        read_env(self.interpreter.environment()).cwd.clone()
    }

    pub fn var(&self, name: &str) -> Option<String> {
        read_env(self.interpreter.environment()).lookup(name)
    }

    pub fn last_status(&self) -> i32 {
        self.interpreter.last_status()
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Handle for delivering signals from another task.
    pub fn jobs(&self) -> &Arc<JobTable> {
        &self.jobs
    }
}

/// Builder for [`Shell`]. Building never fails; seed files that cannot be
/// written are logged and skipped.
pub struct ShellBuilder {
    fs: Option<Arc<dyn FileSystem>>,
    home: String,
    cwd: Option<String>,
    vars: Vec<(String, String)>,
    providers: Vec<(String, Arc<dyn CommandProvider>)>,
    options: ExecOptions,
    seeds: Vec<(String, Vec<u8>)>,
}

impl Default for ShellBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellBuilder {
    pub fn new() -> Self {
        Self {
            fs: None,
            home: DEFAULT_HOME.to_string(),
            cwd: None,
            vars: Vec::new(),
            providers: Vec::new(),
            options: ExecOptions::default(),
            seeds: Vec::new(),
        }
    }

    /// Use `fs` instead of a fresh [`MemoryFs`].
    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn home(mut self, home: impl Into<String>) -> Self {
        self.home = home.into();
        self
    }

    /// Starting directory, defaults to the home directory.
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((name.into(), value.into()));
        self
    }

    /// Register `provider` under `name`, replacing a builtin of that name.
    pub fn provider(mut self, name: impl Into<String>, provider: Arc<dyn CommandProvider>) -> Self {
        self.providers.push((name.into(), provider));
        self
    }

    pub fn pipefail(mut self, enabled: bool) -> Self {
        self.options.pipefail = enabled;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.options.max_depth = depth;
        self
    }

    pub fn options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }

    /// File written into the default in-memory filesystem at build time.
    pub fn seed(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.seeds.push((path.into(), content.into()));
        self
    }

    pub fn config(mut self, config: &VshConfig) -> Self {
        self.home.clone_from(&config.shell.home);
        let mut env: Vec<(&String, &String)> = config.shell.env.iter().collect();
        env.sort();
        self.vars
            .extend(env.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self.options = ExecOptions {
            pipefail: config.execution.pipefail,
            max_depth: config.limits.max_substitution_depth,
            max_brace_expansion: config.limits.max_brace_expansion,
            max_loop_iterations: config.limits.max_loop_iterations,
        };
        self.seeds.extend(
            config
                .seed
                .iter()
                .map(|file| (file.path.clone(), file.content.clone().into_bytes())),
        );
        self
    }

    pub fn build(self) -> Shell {
        let home = normalize_path(&self.home);
        let fs: Arc<dyn FileSystem> = match self.fs {
            Some(fs) => {
                if !self.seeds.is_empty() {
                    tracing::warn!(
                        count = self.seeds.len(),
                        "seed files ignored for a custom filesystem"
                    );
                }
                fs
            }
            None => {
                let memory = MemoryFs::new();
                if let Err(err) = memory.create_dir_all(&home) {
                    tracing::warn!(%home, error = %err, "cannot create home directory");
                }
                for (path, content) in self.seeds {
                    let path = normalize_path(&path);
                    if let Err(err) = memory.insert_file(&path, content) {
                        tracing::warn!(%path, error = %err, "cannot seed file");
                    }
                }
                Arc::new(memory)
            }
        };

        let cwd = self.cwd.map_or_else(|| home.clone(), |cwd| normalize_path(&cwd));
        let mut environment = Environment::new(cwd);
        environment.set_var("HOME", &home);
        for (name, value) in &self.vars {
            environment.set_var(name, value);
        }

        let mut registry = CommandRegistry::new();
        register_defaults(&mut registry);
        for (name, provider) in self.providers {
            registry.register(&name, provider);
        }

        let jobs = Arc::new(JobTable::new());
        let interpreter = Interpreter::new(
            Arc::new(registry),
            fs.clone(),
            Arc::new(RwLock::new(environment)),
            jobs.clone(),
            self.options,
        );
        Shell {
            interpreter,
            jobs,
            fs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_text_keeps_partial_sequence() {
        let mut pending = "é".as_bytes()[..1].to_vec();
        assert_eq!(take_text(&mut pending), "");
        pending.push("é".as_bytes()[1]);
        assert_eq!(take_text(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_builder_defaults() {
        let shell = Shell::new();
        assert_eq!(shell.cwd(), DEFAULT_HOME);
        assert_eq!(shell.var("HOME").as_deref(), Some(DEFAULT_HOME));
        assert!(shell.fs().stat(DEFAULT_HOME).await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_builder_seed_and_env() {
        let shell = Shell::builder()
            .home("/root")
            .cwd("/tmp")
            .env("GREETING", "hi")
            .seed("/tmp/note.txt", "hello\n")
            .build();
        assert_eq!(shell.cwd(), "/tmp");
        let result = shell.run("cat note.txt; echo $GREETING").await.unwrap();
        assert_eq!(result.stdout, "hello\nhi\n");
    }

    #[tokio::test]
    async fn test_parse_error_reports_syntax() {
        let shell = Shell::new();
        let result = shell.run("if true; then echo x").await.unwrap();
        assert_eq!(result.code, 2);
        assert!(result.stdout.is_empty());
        assert!(result.stderr.starts_with("vsh: syntax error"));
        assert_eq!(shell.last_status(), 2);
    }

    #[tokio::test]
    async fn test_config_applies_limits() {
        let mut config = VshConfig::default();
        config.execution.pipefail = true;
        config.shell.home = "/users/me".to_string();
        let shell = Shell::builder().config(&config).build();
        assert!(shell.interpreter.options().pipefail);
        assert_eq!(shell.cwd(), "/users/me");
    }
}
