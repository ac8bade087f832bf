//! Pipeline engine
//!
//! All stages of a pipeline are futures joined on the current task. Stage
//! `i` writes into a pipe that stage `i + 1` reads; a stage's streams close
//! when its provider returns, which ends its neighbour's input.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;

use crate::ast::{Segment, WordPart};
use crate::environment::{read_env, write_env};
use crate::error::ShellResult;
use crate::process::{pipe, ExitStatus, InputStream, OutputStream};
use crate::registry::{CommandContext, ScriptHost};

use super::redirect::Descriptors;
use super::{ExecContext, Interpreter};

pub(crate) const NOT_FOUND: i32 = 127;

impl Interpreter {
    pub(crate) async fn run_pipeline(
        &self,
        segments: &[Segment],
        ctx: &ExecContext,
    ) -> ShellResult<ExitStatus> {
        let single = segments.len() == 1;
        let mut stages = Vec::with_capacity(segments.len());
        let mut next_input = InputStream::empty();
        for (index, segment) in segments.iter().enumerate() {
            let stdin = std::mem::replace(&mut next_input, InputStream::empty());
            let stdout = if index + 1 == segments.len() {
                ctx.stdout.clone()
            } else {
                let (tx, rx) = pipe();
                next_input = rx;
                tx
            };
            stages.push(self.run_stage(segment, stdin, stdout, ctx, single));
        }

        let mut statuses = Vec::with_capacity(stages.len());
        for result in join_all(stages).await {
            statuses.push(result?);
        }

        let last = statuses.last().copied().unwrap_or(ExitStatus::SUCCESS);
        if self.options.pipefail {
            if let Some(failed) = statuses.iter().rev().find(|s| !s.success()) {
                return Ok(*failed);
            }
        }
        Ok(last)
    }

    async fn run_stage(
        &self,
        segment: &Segment,
        stdin: InputStream,
        stdout: OutputStream,
        ctx: &ExecContext,
        single: bool,
    ) -> ShellResult<ExitStatus> {
        let cwd = read_env(&self.env).cwd.clone();
        let argv = self.expand_words(&segment.words, ctx).await?;
        let mut assignments = Vec::with_capacity(segment.assignments.len());
        for assignment in &segment.assignments {
            let value = self.expand_word_single(&assignment.value, ctx).await?;
            assignments.push((assignment.name.clone(), value));
        }

        let fds = Descriptors::new(stdin, stdout, ctx.stderr.clone());
        let fds = match self
            .apply_redirections(&segment.redirections, &cwd, fds, ctx)
            .await
        {
            Ok(fds) => fds,
            Err(message) => {
                ctx.write_err(&message).await;
                return Ok(ExitStatus::FAILURE);
            }
        };
        let Descriptors {
            stdin,
            stdout,
            stderr,
            sinks,
        } = fds;

        let Some(name) = argv.first().cloned() else {
            drop((stdin, stdout, stderr));
            Descriptors::drain_sinks(sinks, &self.fs).await;
            return Ok(self.assign_only(segment, assignments, single));
        };

        tracing::debug!(command = %name, ?argv, %cwd, "running stage");

        // A path runs as a script through the `sh` provider
        let (provider, argv) = if name.contains('/') {
            let mut script_argv = Vec::with_capacity(argv.len() + 1);
            script_argv.push("sh".to_string());
            script_argv.extend(argv);
            (self.registry.get("sh"), script_argv)
        } else {
            (self.registry.get(&name), argv)
        };
        let Some(provider) = provider else {
            tracing::warn!(command = %name, "command not found");
            let _ = stderr
                .writeln(&format!("vsh: {name}: command not found"))
                .await;
            drop((stdin, stdout, stderr));
            Descriptors::drain_sinks(sinks, &self.fs).await;
            return Ok(ExitStatus::code(NOT_FOUND));
        };

        let guard = self.jobs.spawn(&name);
        let process = guard.process().clone();
        let mut env = read_env(&self.env).vars.clone();
        env.extend(assignments);
        let host: Arc<dyn ScriptHost> = Arc::new(self.clone());

        let mut cctx = CommandContext {
            stdin,
            stdout,
            stderr,
            cwd,
            env,
            signals: process.signals.clone(),
            fs: self.fs.clone(),
            environment: self.env.clone(),
            host,
            depth: ctx.depth,
        };

        let runner = async move {
            let outcome = AssertUnwindSafe(provider.execute(&argv, &mut cctx))
                .catch_unwind()
                .await;
            let status = match outcome {
                Ok(Ok(status)) => status,
                Ok(Err(err)) => {
                    if let Some(message) = err.diagnostic(&argv[0]) {
                        tracing::warn!(command = %name, error = %message, "command failed");
                        cctx.write_err(&message).await;
                    }
                    ExitStatus::code(err.exit_code())
                }
                Err(_) => {
                    tracing::error!(command = %name, "provider panicked");
                    cctx.write_err(&format!("vsh: {name}: internal error")).await;
                    ExitStatus::FAILURE
                }
            };
            drop(cctx);
            status
        };
        let (status, ()) = tokio::join!(runner, Descriptors::drain_sinks(sinks, &self.fs));

        process.set_exit(status);
        drop(guard);
        Ok(status)
    }

    /// A stage with no command word. Assignments stick only when the stage
    /// is the whole statement.
    fn assign_only(
        &self,
        segment: &Segment,
        assignments: Vec<(String, String)>,
        single: bool,
    ) -> ExitStatus {
        if single {
            let mut env = write_env(&self.env);
            for (name, value) in &assignments {
                env.set_var(name, value);
            }
        }
        let substituted = segment
            .assignments
            .iter()
            .any(|a| a.value.parts.iter().any(|p| matches!(p, WordPart::CommandSub { .. })));
        if substituted {
            ExitStatus::code(self.last_status())
        } else {
            ExitStatus::SUCCESS
        }
    }
}
