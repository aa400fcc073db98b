//! Unified "compiled runnable" surface over `App`/`AppRunner`.
//!
//! `App::invoke` already wraps a throwaway `AppRunner` for the common case;
//! these methods generalize that same pattern into the full
//! `invoke`/`stream`/`get_state`/`list_states`/`update_state`/`resume`
//! surface, all driven from one `RunConfig` instead of one bespoke method
//! signature per concern.

use rustc_hash::FxHashMap;

use crate::app::App;
use crate::event_bus::{EventBus, EventSink, EventStream};
use crate::node::NodePartial;
use crate::runtimes::checkpointer::Checkpoint;
use crate::runtimes::runner::{PausedReason, RunnerError, StepOptions, StepResult};
use crate::runtimes::{AppRunner, CheckpointerType};
use crate::state::VersionedState;
use crate::types::NodeKind;

/// Run-scoped configuration recognized by the compiled-runnable operations.
///
/// Unlike `RuntimeConfig` (which describes how an `App` is wired up once at
/// compile time), `RunConfig` is passed fresh to each `invoke`/`stream`/
/// `resume` call and scopes that one execution.
#[derive(Default)]
pub struct RunConfig {
    /// Identifies the session to run or resume. Required for `resume` and
    /// `update_state`; if omitted for `invoke`/`stream` the `App`'s
    /// `RuntimeConfig::session_id` (or a generated fallback) is used.
    pub thread_id: Option<String>,
    /// Starts the run from a specific, possibly non-head, checkpoint instead
    /// of the thread's latest one.
    pub checkpoint_id: Option<String>,
    /// Pause before any of these nodes runs.
    pub interrupt_before: Vec<NodeKind>,
    /// Pause after any of these nodes runs.
    pub interrupt_after: Vec<NodeKind>,
    /// Caps the number of supersteps this call will run before returning
    /// `RunnerError::RecursionLimitExceeded`. Defaults to the `App`'s
    /// `RuntimeConfig::recursion_limit`.
    pub step_cap: Option<u64>,
    /// Extra event sinks for this run only, replacing the `App`'s default
    /// `EventBusConfig` sinks for the lifetime of the returned runner.
    pub callbacks: Vec<Box<dyn EventSink>>,
    /// Opaque values surfaced to node handlers via `NodeContext::configurable`.
    pub configurable: FxHashMap<String, serde_json::Value>,
    /// Value handed to the frontier nodes via `NodeContext::resume_value`
    /// for this call only. The usual reason to set this is re-entering a
    /// thread that suspended at an interrupt to await human input: `resume`
    /// passes it straight through to `StepOptions::resume_value`.
    pub resume_value: Option<serde_json::Value>,
}

impl RunConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    #[must_use]
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    #[must_use]
    pub fn with_interrupt_before(mut self, nodes: Vec<NodeKind>) -> Self {
        self.interrupt_before = nodes;
        self
    }

    #[must_use]
    pub fn with_interrupt_after(mut self, nodes: Vec<NodeKind>) -> Self {
        self.interrupt_after = nodes;
        self
    }

    #[must_use]
    pub fn with_step_cap(mut self, step_cap: u64) -> Self {
        self.step_cap = Some(step_cap);
        self
    }

    #[must_use]
    pub fn with_callback(mut self, sink: Box<dyn EventSink>) -> Self {
        self.callbacks.push(sink);
        self
    }

    #[must_use]
    pub fn with_configurable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configurable.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_resume_value(mut self, value: serde_json::Value) -> Self {
        self.resume_value = Some(value);
        self
    }
}

/// A thread id plus the checkpoint it paused at, handed back when a run
/// stops short of completion because it hit an interrupt.
#[derive(Debug, Clone)]
pub struct Suspension {
    pub thread_id: String,
    /// The checkpoint the paused session was saved at, if a checkpointer is
    /// configured. `resume` with this id continues from exactly this point.
    pub checkpoint_id: Option<String>,
    pub reason: PausedReason,
}

/// Result of `invoke`/`resume`: either the run completed, or it paused at an
/// interrupt and handed back a [`Suspension`] the caller can act on (inspect
/// state, collect human input, then call `resume`).
#[derive(Debug, Clone)]
pub enum InvokeOutcome {
    Completed(VersionedState),
    Suspended(Suspension),
}

impl App {
    async fn runner_for(&self, callbacks: Vec<Box<dyn EventSink>>) -> AppRunner {
        let checkpointer_type = self
            .runtime_config()
            .checkpointer
            .clone()
            .unwrap_or(CheckpointerType::InMemory);
        if callbacks.is_empty() {
            AppRunner::new(self.clone(), checkpointer_type).await
        } else {
            let bus = EventBus::with_sinks(callbacks);
            AppRunner::with_options_and_bus(self.clone(), checkpointer_type, true, bus, true).await
        }
    }

    fn resolve_thread_id(&self, config: &RunConfig) -> String {
        config.thread_id.clone().unwrap_or_else(|| {
            self.runtime_config()
                .session_id
                .clone()
                .unwrap_or_else(|| "temp_invoke_session".to_string())
        })
    }

    /// Drive `thread_id` forward from wherever `run_step` leaves it until it
    /// completes, hits an interrupt, or exceeds `config.step_cap`.
    async fn drive(
        &self,
        runner: &mut AppRunner,
        thread_id: &str,
        config: &RunConfig,
    ) -> Result<InvokeOutcome, RunnerError> {
        let limit = config
            .step_cap
            .unwrap_or(self.runtime_config().recursion_limit);
        // Only the first superstep of this call should see `resume_value` —
        // it's meant for the frontier that was waiting on it, not every
        // step this call happens to run afterward.
        let mut resume_value = config.resume_value.clone();

        loop {
            let step_now = runner
                .get_session(thread_id)
                .ok_or_else(|| RunnerError::SessionNotFound {
                    session_id: thread_id.to_string(),
                })?
                .step;
            if step_now >= limit {
                return Err(RunnerError::RecursionLimitExceeded {
                    session_id: thread_id.to_string(),
                    limit,
                });
            }

            let options = StepOptions {
                interrupt_before: config.interrupt_before.clone(),
                interrupt_after: config.interrupt_after.clone(),
                interrupt_each_step: false,
                resume_value: resume_value.take(),
            };

            match runner.run_step(thread_id, options).await? {
                StepResult::Completed(report) => {
                    if report.completed {
                        let state = runner
                            .get_session(thread_id)
                            .ok_or_else(|| RunnerError::SessionNotFound {
                                session_id: thread_id.to_string(),
                            })?
                            .state
                            .clone();
                        return Ok(InvokeOutcome::Completed(state));
                    }
                }
                StepResult::Paused(paused) => {
                    let checkpoint_id = match runner.checkpointer() {
                        Some(cp) => cp.load_latest(thread_id).await.ok().flatten().map(|c| c.id),
                        None => None,
                    };
                    return Ok(InvokeOutcome::Suspended(Suspension {
                        thread_id: thread_id.to_string(),
                        checkpoint_id,
                        reason: paused.reason,
                    }));
                }
            }
        }
    }

    /// Run a graph to completion, or until it pauses at an interrupt.
    ///
    /// Generalizes [`App::invoke`] with the full `RunConfig` surface
    /// (`thread_id`, `checkpoint_id`, interrupts, `step_cap`, `callbacks`,
    /// `configurable`). Plain `invoke` remains the simple entry point for
    /// callers who don't need any of that.
    pub async fn invoke_with_config(
        &self,
        initial_state: VersionedState,
        config: RunConfig,
    ) -> Result<InvokeOutcome, RunnerError> {
        let mut config = config;
        let thread_id = self.resolve_thread_id(&config);
        config.thread_id = Some(thread_id.clone());
        let callbacks = std::mem::take(&mut config.callbacks);

        let mut runner = self.runner_for(callbacks).await;

        match &config.checkpoint_id {
            Some(checkpoint_id) => {
                runner
                    .load_session_from_checkpoint(&thread_id, checkpoint_id)
                    .await?;
            }
            None => {
                runner.create_session(thread_id.clone(), initial_state).await?;
            }
        }

        if !config.configurable.is_empty() {
            runner.set_configurable(&thread_id, config.configurable.clone())?;
        }

        self.drive(&mut runner, &thread_id, &config).await
    }

    /// Same execution as [`App::invoke_with_config`], but returns a live
    /// event stream alongside a handle for the final outcome so callers can
    /// observe events as they're produced instead of only the end result.
    ///
    /// The returned `EventStream` yields every event the run emits,
    /// including the final state; the `JoinHandle` resolves once the run
    /// completes or suspends.
    pub async fn stream(
        &self,
        initial_state: VersionedState,
        config: RunConfig,
    ) -> Result<
        (
            EventStream,
            tokio::task::JoinHandle<Result<InvokeOutcome, RunnerError>>,
        ),
        RunnerError,
    > {
        let mut config = config;
        let thread_id = self.resolve_thread_id(&config);
        config.thread_id = Some(thread_id.clone());
        let callbacks = std::mem::take(&mut config.callbacks);

        let checkpointer_type = self
            .runtime_config()
            .checkpointer
            .clone()
            .unwrap_or(CheckpointerType::InMemory);
        let bus = if callbacks.is_empty() {
            self.runtime_config().event_bus.build_event_bus()
        } else {
            EventBus::with_sinks(callbacks)
        };
        let events = bus.subscribe();

        let mut runner =
            AppRunner::with_options_and_bus(self.clone(), checkpointer_type, true, bus, true)
                .await;

        match &config.checkpoint_id {
            Some(checkpoint_id) => {
                runner
                    .load_session_from_checkpoint(&thread_id, checkpoint_id)
                    .await?;
            }
            None => {
                runner.create_session(thread_id.clone(), initial_state).await?;
            }
        }
        if !config.configurable.is_empty() {
            runner.set_configurable(&thread_id, config.configurable.clone())?;
        }

        let app = self.clone();
        let handle = tokio::spawn(async move { app.drive(&mut runner, &thread_id, &config).await });

        Ok((events, handle))
    }

    /// Fetch a single checkpoint's snapshot: the head checkpoint if
    /// `checkpoint_id` is `None`, otherwise that specific (possibly
    /// non-head) one.
    pub async fn get_state(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<Checkpoint>, RunnerError> {
        let runner = self.runner_for(Vec::new()).await;
        let checkpointer = runner.checkpointer().ok_or(RunnerError::NoCheckpointer)?;
        match checkpoint_id {
            Some(id) => checkpointer
                .load(thread_id, id)
                .await
                .map_err(RunnerError::Checkpointer),
            None => checkpointer
                .load_latest(thread_id)
                .await
                .map_err(RunnerError::Checkpointer),
        }
    }

    /// List every checkpoint recorded for a thread, oldest first, including
    /// forked branches written by `update_state`.
    pub async fn list_states(&self, thread_id: &str) -> Result<Vec<Checkpoint>, RunnerError> {
        let runner = self.runner_for(Vec::new()).await;
        let checkpointer = runner.checkpointer().ok_or(RunnerError::NoCheckpointer)?;
        checkpointer
            .list(thread_id)
            .await
            .map_err(RunnerError::Checkpointer)
    }

    /// Fork a new checkpoint from `checkpoint_id` by applying `partial`
    /// without re-running any nodes. Thin wrapper over
    /// [`AppRunner::update_state`] that builds its own throwaway runner, so
    /// callers editing history don't need to keep one around.
    pub async fn update_state(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
        partial: NodePartial,
    ) -> Result<String, RunnerError> {
        let mut runner = self.runner_for(Vec::new()).await;
        runner.update_state(thread_id, checkpoint_id, partial).await
    }

    /// Continue a suspended or previously-checkpointed thread.
    ///
    /// Resumes from `config.checkpoint_id` if set, otherwise from the
    /// thread's latest checkpoint. `config.thread_id` is overwritten with
    /// `thread_id` if set to something else.
    pub async fn resume(
        &self,
        thread_id: &str,
        config: RunConfig,
    ) -> Result<InvokeOutcome, RunnerError> {
        let mut config = config;
        config.thread_id = Some(thread_id.to_string());
        let callbacks = std::mem::take(&mut config.callbacks);

        let mut runner = self.runner_for(callbacks).await;

        match &config.checkpoint_id {
            Some(checkpoint_id) => {
                runner
                    .load_session_from_checkpoint(thread_id, checkpoint_id)
                    .await?;
            }
            None => {
                // No explicit checkpoint picked: fall back to whatever
                // `create_session` resolves (latest checkpoint if one
                // exists; a fresh empty session otherwise).
                runner
                    .create_session(thread_id.to_string(), VersionedState::new_with_messages(vec![]))
                    .await?;
            }
        }

        if !config.configurable.is_empty() {
            runner.set_configurable(thread_id, config.configurable.clone())?;
        }

        self.drive(&mut runner, thread_id, &config).await
    }
}
