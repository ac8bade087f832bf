//! Evaluator for vsh scripts
//!
//! [`Interpreter`] walks the statement list of a [`Script`], short-circuits
//! `&&` / `||`, and hands commands and pipelines to the pipeline engine.
//! Control flow that must cross statement boundaries (`break`, `continue`,
//! `exit`) travels back up as a [`Flow`] value.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::ast::{ControlCommand, ControlOp, Script, ScriptNode, Statement};
use crate::environment::{read_env, write_env, SharedEnvironment};
use crate::error::ShellResult;
use crate::lexer::DEFAULT_MAX_DEPTH;
use crate::parser::parse_with_depth;
use crate::process::{ExitStatus, InputStream, JobTable, OutputStream};
use crate::registry::{CommandRegistry, ScriptHost, ScriptRequest};
use crate::vfs::FileSystem;

pub mod braces;
mod control_flow;
mod expansion;
pub mod glob;
mod pipeline;
mod redirect;

pub use braces::expand_braces;

use redirect::Descriptors;

/// Tunables of one interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Report the last failing stage instead of the last stage
    pub pipefail: bool,
    /// Cap on substitution and `sh` nesting
    pub max_depth: usize,
    pub max_brace_expansion: usize,
    /// 0 means unlimited
    pub max_loop_iterations: usize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            pipefail: false,
            max_depth: DEFAULT_MAX_DEPTH,
            max_brace_expansion: braces::DEFAULT_MAX_EXPANSION,
            max_loop_iterations: 0,
        }
    }
}

/// Streams a statement writes to, plus its nesting depth.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub depth: usize,
    /// Loops enclosing the statement
    pub loops: usize,
}

impl ExecContext {
    /// Context for the condition and body of a loop.
    pub(crate) fn enter_loop(&self) -> Self {
        Self {
            loops: self.loops + 1,
            ..self.clone()
        }
    }

    pub async fn write_err(&self, msg: &str) {
        let _ = self.stderr.writeln(msg).await;
    }
}

/// How a statement list ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Normal,
    /// Leave this many enclosing loops
    Break(usize),
    /// Leave `n - 1` loops, then start the next iteration of the one after
    Continue(usize),
    Exit(i32),
}

/// How a script finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub code: i32,
    /// An `exit` statement ended it
    pub exited: bool,
}

/// Reading of `exit`'s operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExitArgs {
    Code(i32),
    /// The code is not a number; exits with 2
    NotNumeric(String),
    TooMany,
}

impl ExitArgs {
    /// No operand means 0. Codes wrap modulo 256.
    pub(crate) fn parse(args: &[String]) -> Self {
        let Some(arg) = args.first() else {
            return Self::Code(0);
        };
        let Ok(code) = arg.trim().parse::<i64>() else {
            return Self::NotNumeric(arg.clone());
        };
        if args.len() > 1 {
            return Self::TooMany;
        }
        Self::Code(i32::try_from(code.rem_euclid(256)).unwrap_or(0))
    }

    pub(crate) fn diagnostic(&self) -> Option<String> {
        match self {
            Self::Code(_) => None,
            Self::NotNumeric(arg) => Some(format!("exit: {arg}: numeric argument required")),
            Self::TooMany => Some("exit: too many arguments".to_string()),
        }
    }
}

/// Levels named by the operand of `break` or `continue`.
fn loop_count(keyword: &str, args: &[String]) -> Result<usize, String> {
    match args {
        [] => Ok(1),
        [arg] => match arg.trim().parse::<i64>() {
            Ok(n) if n >= 1 => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
            Ok(_) => Err(format!("vsh: {keyword}: {arg}: loop count out of range")),
            Err(_) => Err(format!("vsh: {keyword}: {arg}: numeric argument required")),
        },
        _ => Err(format!("vsh: {keyword}: too many arguments")),
    }
}

#[derive(Clone)]
pub struct Interpreter {
    registry: Arc<CommandRegistry>,
    fs: Arc<dyn FileSystem>,
    env: SharedEnvironment,
    jobs: Arc<JobTable>,
    options: Arc<ExecOptions>,
}

impl Interpreter {
    pub fn new(
        registry: Arc<CommandRegistry>,
        fs: Arc<dyn FileSystem>,
        env: SharedEnvironment,
        jobs: Arc<JobTable>,
        options: ExecOptions,
    ) -> Self {
        Self {
            registry,
            fs,
            env,
            jobs,
            options: Arc::new(options),
        }
    }

    /// Same collaborators, different session state.
    pub fn with_environment(&self, env: SharedEnvironment) -> Self {
        Self {
            env,
            ..self.clone()
        }
    }

    /// Interpreter over a private copy of the current environment.
    pub(crate) fn isolated(&self) -> Self {
        let copy = read_env(&self.env).clone();
        self.with_environment(Arc::new(RwLock::new(copy)))
    }

    pub fn environment(&self) -> &SharedEnvironment {
        &self.env
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    pub(crate) fn last_status(&self) -> i32 {
        read_env(&self.env).last_status
    }

    pub(crate) fn set_status(&self, code: i32) {
        write_env(&self.env).last_status = code;
    }

    /// Run a whole script.
    pub async fn execute(&self, script: &Script, ctx: &ExecContext) -> ShellResult<Completion> {
        match self.run_statements(&script.statements, ctx).await? {
            Flow::Exit(code) => {
                self.set_status(code);
                Ok(Completion {
                    code,
                    // A pending signal stops the script the same way
                    exited: self.jobs.pending().is_none(),
                })
            }
            Flow::Normal | Flow::Break(_) | Flow::Continue(_) => Ok(Completion {
                code: self.last_status(),
                exited: false,
            }),
        }
    }

    pub(crate) fn run_statements<'a>(
        &'a self,
        statements: &'a [Statement],
        ctx: &'a ExecContext,
    ) -> Pin<Box<dyn Future<Output = ShellResult<Flow>> + Send + 'a>> {
        Box::pin(async move {
            let mut previous = ControlOp::Sequence;
            for statement in statements {
                if let Some(signal) = self.jobs.pending() {
                    tracing::debug!(%signal, "stopping script after signal");
                    return Ok(Flow::Exit(ExitStatus::from_signal(signal).code));
                }
                let status = self.last_status();
                let skip = match previous {
                    ControlOp::And => status != 0,
                    ControlOp::Or => status == 0,
                    ControlOp::Sequence | ControlOp::End => false,
                };
                previous = statement.terminator;
                if skip {
                    continue;
                }
                match self.run_node(&statement.node, ctx).await? {
                    Flow::Normal => {}
                    flow => return Ok(flow),
                }
            }
            Ok(Flow::Normal)
        })
    }

    async fn run_node(&self, node: &ScriptNode, ctx: &ExecContext) -> ShellResult<Flow> {
        match node {
            ScriptNode::Command(segment) => {
                let status = self.run_pipeline(std::slice::from_ref(segment), ctx).await?;
                self.set_status(status.code);
                Ok(Flow::Normal)
            }
            ScriptNode::Pipeline(pipeline) => {
                let status = self.run_pipeline(&pipeline.segments, ctx).await?;
                self.set_status(status.code);
                Ok(Flow::Normal)
            }
            ScriptNode::If(stmt) => self.run_if(stmt, ctx).await,
            ScriptNode::For(stmt) => self.run_for(stmt, ctx).await,
            ScriptNode::While(stmt) => self.run_while(stmt, ctx).await,
            ScriptNode::Break(cmd) => self.run_loop_control("break", cmd, ctx).await,
            ScriptNode::Continue(cmd) => self.run_loop_control("continue", cmd, ctx).await,
            ScriptNode::Exit(cmd) => self.run_exit(cmd, ctx).await,
        }
    }

    /// Expand the operands of a control statement and set up its
    /// redirected stderr. Prefix assignments persist in the session. A
    /// failed redirection is reported here and yields `None` with status 1.
    async fn prepare_control(
        &self,
        cmd: &ControlCommand,
        ctx: &ExecContext,
    ) -> ShellResult<Option<ControlStreams>> {
        for assignment in &cmd.assignments {
            let value = self.expand_word_single(&assignment.value, ctx).await?;
            write_env(&self.env).set_var(&assignment.name, &value);
        }
        let args = self.expand_words(&cmd.args, ctx).await?;
        let cwd = read_env(&self.env).cwd.clone();

        let fds = Descriptors::new(InputStream::empty(), ctx.stdout.clone(), ctx.stderr.clone());
        match self
            .apply_redirections(&cmd.redirections, &cwd, fds, ctx)
            .await
        {
            Ok(fds) => Ok(Some(ControlStreams {
                args,
                stderr: fds.stderr,
                sinks: fds.sinks,
            })),
            Err(message) => {
                ctx.write_err(&message).await;
                self.set_status(1);
                Ok(None)
            }
        }
    }

    /// Close the statement's streams and flush redirected files.
    async fn finish_control(&self, streams: ControlStreams) {
        let ControlStreams { stderr, sinks, .. } = streams;
        drop(stderr);
        Descriptors::drain_sinks(sinks, &self.fs).await;
    }

    /// A bad operand is reported with status 2 and leaves every enclosing
    /// loop. The count is capped at the loops actually enclosing `ctx`.
    async fn run_loop_control(
        &self,
        keyword: &str,
        cmd: &ControlCommand,
        ctx: &ExecContext,
    ) -> ShellResult<Flow> {
        let Some(streams) = self.prepare_control(cmd, ctx).await? else {
            return Ok(Flow::Normal);
        };
        let enclosing = ctx.loops.max(1);
        let flow = match loop_count(keyword, &streams.args) {
            Ok(levels) if keyword == "break" => {
                self.set_status(0);
                Flow::Break(levels.min(enclosing))
            }
            Ok(levels) => {
                self.set_status(0);
                Flow::Continue(levels.min(enclosing))
            }
            Err(message) => {
                let _ = streams.stderr.writeln(&message).await;
                self.set_status(2);
                Flow::Break(enclosing)
            }
        };
        self.finish_control(streams).await;
        Ok(flow)
    }

    /// `exit` stops on a bad code but only complains about extra arguments.
    async fn run_exit(&self, cmd: &ControlCommand, ctx: &ExecContext) -> ShellResult<Flow> {
        let Some(streams) = self.prepare_control(cmd, ctx).await? else {
            return Ok(Flow::Normal);
        };
        let parsed = ExitArgs::parse(&streams.args);
        if let Some(message) = parsed.diagnostic() {
            let _ = streams.stderr.writeln(&format!("vsh: {message}")).await;
        }
        let flow = match parsed {
            ExitArgs::Code(code) => Flow::Exit(code),
            ExitArgs::NotNumeric(_) => Flow::Exit(2),
            ExitArgs::TooMany => {
                self.set_status(2);
                Flow::Normal
            }
        };
        self.finish_control(streams).await;
        Ok(flow)
    }
}

/// Expanded operands and redirected stderr of a control statement.
struct ControlStreams {
    args: Vec<String>,
    stderr: OutputStream,
    sinks: Vec<redirect::FileSink>,
}

#[async_trait]
impl ScriptHost for Interpreter {
    async fn run_script(&self, request: ScriptRequest) -> ExitStatus {
        let ScriptRequest {
            name,
            source,
            args,
            shared_env,
            stdout,
            stderr,
            depth,
        } = request;
        let ctx = ExecContext {
            stdout,
            stderr,
            depth: depth + 1,
            loops: 0,
        };
        if ctx.depth > self.options.max_depth {
            ctx.write_err("vsh: maximum nesting depth exceeded").await;
            return ExitStatus::code(2);
        }
        let script = match parse_with_depth(&source, self.options.max_depth) {
            Ok(script) => script,
            Err(err) => {
                ctx.write_err(&format!("vsh: {name}: {err}")).await;
                return ExitStatus::code(err.exit_code());
            }
        };

        tracing::debug!(script = %name, shared_env, depth = ctx.depth, "running script");
        let (runner, saved_positional) = if shared_env {
            let saved = (!args.is_empty()).then(|| {
                let mut env = write_env(&self.env);
                let mut positional = vec![env.positional.first().cloned().unwrap_or_default()];
                positional.extend(args.iter().cloned());
                std::mem::replace(&mut env.positional, positional)
            });
            (self.clone(), saved)
        } else {
            let env = read_env(&self.env).isolated(&name, &args);
            (self.with_environment(Arc::new(RwLock::new(env))), None)
        };

        let result = runner.execute(&script, &ctx).await;
        if let Some(positional) = saved_positional {
            write_env(&self.env).positional = positional;
        }
        match result {
            Ok(done) => ExitStatus::code(done.code),
            Err(err) => {
                tracing::error!(script = %name, error = %err, "script failed");
                ctx.write_err(&format!("vsh: {err}")).await;
                ExitStatus::FAILURE
            }
        }
    }
}
