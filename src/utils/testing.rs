//! Test doubles shared across the scheduler and runner test suites.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Build a [`StateSnapshot`] with arbitrary message/extra versions and empty
/// contents, for tests that only care about the scheduler's version gating.
#[must_use]
pub fn create_test_snapshot(messages_version: u32, extra_version: u32) -> StateSnapshot {
    StateSnapshot {
        messages: Vec::new(),
        messages_version,
        extra: FxHashMap::default(),
        extra_version,
        errors: Vec::new(),
        errors_version: 1,
    }
}

/// A node that returns immediately with an empty `NodePartial`.
#[derive(Default)]
pub struct NoopNode;

#[async_trait]
impl Node for NoopNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::default())
    }
}

/// A node that sleeps briefly before returning, used to exercise concurrent
/// scheduling without relying on real I/O latency.
pub struct DelayedNode {
    pub delay_ms: u64,
}

impl Default for DelayedNode {
    fn default() -> Self {
        Self { delay_ms: 10 }
    }
}

#[async_trait]
impl Node for DelayedNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(NodePartial::default())
    }
}

/// A node that always fails with `NodeError::MissingInput`, used to exercise
/// the scheduler's error propagation path.
#[derive(Default)]
pub struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Err(NodeError::MissingInput { what: "test_key" })
    }
}

/// Registry with two immediate no-op nodes at `Custom("A")` / `Custom("B")`.
#[must_use]
pub fn make_test_registry() -> FxHashMap<NodeKind, Arc<dyn Node>> {
    let mut nodes: FxHashMap<NodeKind, Arc<dyn Node>> = FxHashMap::default();
    nodes.insert(NodeKind::Custom("A".into()), Arc::new(NoopNode));
    nodes.insert(NodeKind::Custom("B".into()), Arc::new(NoopNode));
    nodes
}

/// Registry with two deliberately-delayed nodes at `Custom("A")` / `Custom("B")`,
/// for asserting that concurrent execution doesn't guarantee output ordering.
#[must_use]
pub fn make_delayed_registry() -> FxHashMap<NodeKind, Arc<dyn Node>> {
    let mut nodes: FxHashMap<NodeKind, Arc<dyn Node>> = FxHashMap::default();
    nodes.insert(
        NodeKind::Custom("A".into()),
        Arc::new(DelayedNode { delay_ms: 20 }),
    );
    nodes.insert(
        NodeKind::Custom("B".into()),
        Arc::new(DelayedNode { delay_ms: 5 }),
    );
    nodes
}
