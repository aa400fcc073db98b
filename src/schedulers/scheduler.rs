//! Superstep scheduling: deciding which nodes run this step, running them
//! concurrently up to a configured limit, and reporting what happened.

use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::event_bus::{Event, EventEmitter};
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Per-session scheduler state: the last-seen channel versions for each node
/// label, used to gate re-execution when nothing relevant changed.
#[derive(Clone, Debug, Default)]
pub struct SchedulerState {
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>,
}

/// Outcome of running one superstep: which nodes ran, which were skipped,
/// and their raw (unordered) outputs.
#[derive(Debug, Default)]
pub struct StepRunResult {
    pub ran_nodes: Vec<NodeKind>,
    pub skipped_nodes: Vec<NodeKind>,
    pub outputs: Vec<(NodeKind, NodePartial)>,
}

/// Errors raised while running a superstep.
#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    /// A node handler returned an error.
    #[error("node {kind:?} failed at step {step}: {source}")]
    #[diagnostic(code(weavegraph::scheduler::node_run))]
    NodeRun {
        kind: NodeKind,
        step: u64,
        #[source]
        source: NodeError,
    },

    /// A spawned node task panicked or was cancelled.
    #[error("node task join error: {0}")]
    #[diagnostic(code(weavegraph::scheduler::join))]
    Join(#[from] JoinError),

    /// The session's cancellation token fired before this superstep started.
    #[error("superstep {step} cancelled")]
    #[diagnostic(code(weavegraph::scheduler::cancelled))]
    Cancelled { step: u64 },
}

/// Runs nodes in the current frontier, honoring a concurrency limit and
/// skipping nodes whose relevant channel versions haven't changed since they
/// last ran (or that are `NodeKind::End`).
pub struct Scheduler {
    pub concurrency_limit: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    /// Label used to key `SchedulerState::versions_seen` for a node.
    fn node_label(kind: &NodeKind) -> String {
        match kind {
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
            NodeKind::Custom(name) => format!("Other(\"{name}\")"),
        }
    }

    /// Whether `id` should run against `snapshot`, given what was last seen.
    ///
    /// A node runs if it has never run before, or if either the messages or
    /// extra channel version has advanced since its last recorded run.
    #[must_use]
    pub fn should_run(&self, state: &SchedulerState, id: &str, snapshot: &StateSnapshot) -> bool {
        match state.versions_seen.get(id) {
            None => true,
            Some(seen) => {
                let seen_messages = seen.get("messages").copied().unwrap_or(0);
                let seen_extra = seen.get("extra").copied().unwrap_or(0);
                u64::from(snapshot.messages_version) > seen_messages
                    || u64::from(snapshot.extra_version) > seen_extra
            }
        }
    }

    /// Record that `id` has now observed `snapshot`'s channel versions.
    pub fn record_seen(&self, state: &mut SchedulerState, id: &str, snapshot: &StateSnapshot) {
        let entry = state.versions_seen.entry(id.to_string()).or_default();
        entry.insert("messages".to_string(), u64::from(snapshot.messages_version));
        entry.insert("extra".to_string(), u64::from(snapshot.extra_version));
    }

    /// Execute one superstep: run every frontier node that gates `should_run`
    /// and isn't `NodeKind::End`, up to `concurrency_limit` concurrently.
    pub async fn superstep(
        &self,
        state: &mut SchedulerState,
        nodes: &FxHashMap<NodeKind, Arc<dyn Node>>,
        frontier: Vec<NodeKind>,
        snapshot: StateSnapshot,
        step: u64,
        emitter: Arc<dyn EventEmitter>,
        resume_value: Option<Arc<serde_json::Value>>,
        cancellation_token: CancellationToken,
        configurable: Arc<FxHashMap<String, serde_json::Value>>,
    ) -> Result<StepRunResult, SchedulerError> {
        if cancellation_token.is_cancelled() {
            return Err(SchedulerError::Cancelled { step });
        }

        let mut result = StepRunResult::default();
        let mut to_run: Vec<NodeKind> = Vec::new();

        for kind in &frontier {
            let label = Self::node_label(kind);
            if *kind == NodeKind::End || !self.should_run(state, &label, &snapshot) {
                result.skipped_nodes.push(kind.clone());
                continue;
            }
            to_run.push(kind.clone());
        }

        // Record-seen happens regardless of whether the node is actually
        // registered, matching frontier-driven gating semantics.
        for kind in &to_run {
            self.record_seen(state, &Self::node_label(kind), &snapshot);
        }

        let mut in_flight = FuturesUnordered::new();
        let mut queue = to_run.clone().into_iter();
        let mut scheduled = 0usize;

        // Seed the first `concurrency_limit` tasks, then top up as each completes.
        while scheduled < self.concurrency_limit {
            let Some(kind) = queue.next() else { break };
            in_flight.push(spawn_node_run(
                nodes.get(&kind).cloned(),
                kind,
                snapshot.clone(),
                step,
                emitter.clone(),
                resume_value.clone(),
                cancellation_token.clone(),
                configurable.clone(),
            ));
            scheduled += 1;
        }

        while let Some(joined) = in_flight.next().await {
            let (kind, outcome) = joined?;
            match outcome {
                Some(Ok(partial)) => result.outputs.push((kind.clone(), partial)),
                Some(Err(source)) => {
                    return Err(SchedulerError::NodeRun { kind, step, source });
                }
                None => {
                    // No handler registered for this frontier node; treat as a no-op.
                    result.outputs.push((kind.clone(), NodePartial::default()));
                }
            }
            result.ran_nodes.push(kind);

            if let Some(next_kind) = queue.next() {
                in_flight.push(spawn_node_run(
                    nodes.get(&next_kind).cloned(),
                    next_kind,
                    snapshot.clone(),
                    step,
                    emitter.clone(),
                    resume_value.clone(),
                    cancellation_token.clone(),
                    configurable.clone(),
                ));
            }
        }

        // Preserve frontier scheduling order in `ran_nodes`, independent of
        // whichever task happened to finish first.
        let finished: std::collections::HashSet<_> = result.ran_nodes.iter().cloned().collect();
        result.ran_nodes = to_run.into_iter().filter(|k| finished.contains(k)).collect();

        Ok(result)
    }
}

type NodeJoinOutput = (NodeKind, Option<Result<NodePartial, NodeError>>);

async fn spawn_node_run(
    node: Option<Arc<dyn Node>>,
    kind: NodeKind,
    snapshot: StateSnapshot,
    step: u64,
    emitter: Arc<dyn EventEmitter>,
    resume_value: Option<Arc<serde_json::Value>>,
    cancellation_token: CancellationToken,
    configurable: Arc<FxHashMap<String, serde_json::Value>>,
) -> Result<NodeJoinOutput, JoinError> {
    let Some(node) = node else {
        return Ok((kind, None));
    };

    let node_id = kind.encode();
    let ctx = NodeContext {
        node_id: node_id.clone(),
        step,
        event_emitter: emitter.clone(),
        resume_value,
        cancellation_token,
        configurable,
    };
    let _ = emitter.emit(Event::node_message_with_meta(
        node_id.clone(),
        step,
        "scheduler",
        "node started",
    ));

    let handle = tokio::spawn(async move { node.run(snapshot, ctx).await });
    let outcome = handle.await?;
    Ok((kind, Some(outcome)))
}
