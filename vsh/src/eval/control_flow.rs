use crate::ast::{ForLoop, IfStatement, WhileLoop};
use crate::environment::{read_env, write_env};
use crate::error::ShellResult;

use super::{ExecContext, Flow, Interpreter};

/// Where a loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    EvaluatingCondition,
    RunningBody,
    Completed,
    Broken,
}

impl Interpreter {
    pub(crate) async fn run_if(&self, stmt: &IfStatement, ctx: &ExecContext) -> ShellResult<Flow> {
        let branches = std::iter::once((&stmt.condition, &stmt.then_body))
            .chain(stmt.elif_clauses.iter().map(|c| (&c.condition, &c.body)));

        for (condition, body) in branches {
            match self.run_statements(condition, ctx).await? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
            if self.last_status() == 0 {
                return self.run_statements(body, ctx).await;
            }
        }

        match &stmt.else_body {
            Some(body) => self.run_statements(body, ctx).await,
            None => {
                self.set_status(0);
                Ok(Flow::Normal)
            }
        }
    }

    /// The item list is expanded once, up front. The loop variable is
    /// restored to its previous value when the loop ends.
    pub(crate) async fn run_for(&self, stmt: &ForLoop, ctx: &ExecContext) -> ShellResult<Flow> {
        let items = self.expand_words(&stmt.items, ctx).await?;
        let saved = read_env(&self.env)
            .get_var(&stmt.variable)
            .map(str::to_string);

        let body_ctx = ctx.enter_loop();
        let mut items = items.into_iter();
        let mut state = LoopState::EvaluatingCondition;
        let mut status = 0;
        let mut iterations = 0usize;
        let mut escape = None;

        while !matches!(state, LoopState::Completed | LoopState::Broken) {
            state = match state {
                LoopState::EvaluatingCondition => match items.next() {
                    None => LoopState::Completed,
                    Some(item) => {
                        if self.enter_iteration(&mut iterations, ctx).await {
                            write_env(&self.env).set_var(&stmt.variable, &item);
                            LoopState::RunningBody
                        } else {
                            status = 1;
                            LoopState::Completed
                        }
                    }
                },
                LoopState::RunningBody => {
                    let flow = self.run_statements(&stmt.body, &body_ctx).await?;
                    self.after_body(flow, &mut status, &mut escape)
                }
                LoopState::Completed | LoopState::Broken => state,
            };
        }

        {
            let mut env = write_env(&self.env);
            match saved {
                Some(value) => env.set_var(&stmt.variable, &value),
                None => {
                    env.unset_var(&stmt.variable);
                }
            }
        }
        Ok(self.finish_loop(status, escape))
    }

    pub(crate) async fn run_while(&self, stmt: &WhileLoop, ctx: &ExecContext) -> ShellResult<Flow> {
        let body_ctx = ctx.enter_loop();
        let mut state = LoopState::EvaluatingCondition;
        let mut status = 0;
        let mut iterations = 0usize;
        let mut escape = None;

        while !matches!(state, LoopState::Completed | LoopState::Broken) {
            state = match state {
                LoopState::EvaluatingCondition => {
                    match self.run_statements(&stmt.condition, &body_ctx).await? {
                        Flow::Normal | Flow::Continue(1) if self.last_status() != 0 => {
                            LoopState::Completed
                        }
                        Flow::Normal | Flow::Continue(1) => {
                            if self.enter_iteration(&mut iterations, ctx).await {
                                LoopState::RunningBody
                            } else {
                                status = 1;
                                LoopState::Completed
                            }
                        }
                        flow => self.after_body(flow, &mut status, &mut escape),
                    }
                }
                LoopState::RunningBody => {
                    let flow = self.run_statements(&stmt.body, &body_ctx).await?;
                    self.after_body(flow, &mut status, &mut escape)
                }
                LoopState::Completed | LoopState::Broken => state,
            };
        }

        Ok(self.finish_loop(status, escape))
    }

    /// Count an iteration against the configured limit and give other
    /// tasks a turn. Returns false once the limit is hit.
    async fn enter_iteration(&self, iterations: &mut usize, ctx: &ExecContext) -> bool {
        tokio::task::yield_now().await;
        let limit = self.options.max_loop_iterations;
        if limit > 0 && *iterations >= limit {
            tracing::warn!(limit, "loop iteration limit exceeded");
            ctx.write_err(&format!("vsh: loop iteration limit ({limit}) exceeded"))
                .await;
            return false;
        }
        *iterations += 1;
        true
    }

    /// Flows aimed past this loop are parked in `escape` and end it.
    fn after_body(&self, flow: Flow, status: &mut i32, escape: &mut Option<Flow>) -> LoopState {
        match flow {
            Flow::Normal | Flow::Continue(0 | 1) => {
                *status = self.last_status();
                LoopState::EvaluatingCondition
            }
            Flow::Break(0 | 1) => {
                *status = self.last_status();
                LoopState::Broken
            }
            Flow::Break(levels) => {
                *escape = Some(Flow::Break(levels - 1));
                LoopState::Broken
            }
            Flow::Continue(levels) => {
                *escape = Some(Flow::Continue(levels - 1));
                LoopState::Broken
            }
            Flow::Exit(code) => {
                *escape = Some(Flow::Exit(code));
                LoopState::Broken
            }
        }
    }

    fn finish_loop(&self, status: i32, escape: Option<Flow>) -> Flow {
        match escape {
            Some(flow) => flow,
            None => {
                self.set_status(status);
                Flow::Normal
            }
        }
    }
}
