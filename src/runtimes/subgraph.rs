//! Subgraph invocation: wrap a compiled [`App`] as a single [`Node`] so a
//! parent graph can invoke a child graph as one step.

use async_trait::async_trait;
use std::sync::Arc;

use crate::app::App;
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::runtimes::{AppRunner, CheckpointerType};
use crate::state::{StateSnapshot, VersionedState};

/// Invokes a child [`App`] as a node in a parent graph.
///
/// The child receives the parent's state snapshot as its initial state
/// (messages, extra, and errors carried over verbatim) and runs to
/// completion in its own in-memory session, keyed off the parent node's id
/// and step so repeated invocations don't collide. Only what the child
/// *added* relative to its input — new messages and changed or new extra
/// keys — is returned as the `NodePartial` the parent barrier merges in;
/// the child's own checkpoint history is not exposed to the parent.
pub struct SubgraphNode {
    app: Arc<App>,
}

impl SubgraphNode {
    #[must_use]
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }
}

#[async_trait]
impl Node for SubgraphNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let initial_state = VersionedState::from_snapshot(&snapshot);
        let session_id = format!("{}::subgraph::{}", ctx.node_id, ctx.step);

        let mut runner = AppRunner::from_arc(self.app.clone(), CheckpointerType::InMemory).await;
        runner
            .create_session(session_id.clone(), initial_state)
            .await
            .map_err(|e| NodeError::Subgraph(e.to_string()))?;
        let final_state = runner
            .run_until_complete(&session_id)
            .await
            .map_err(|e| NodeError::Subgraph(e.to_string()))?;

        let final_snapshot = final_state.snapshot();
        let new_messages: Vec<_> = final_snapshot
            .messages
            .into_iter()
            .skip(snapshot.messages.len())
            .collect();

        let mut new_extra = rustc_hash::FxHashMap::default();
        for (k, v) in final_snapshot.extra.iter() {
            if snapshot.extra.get(k) != Some(v) {
                new_extra.insert(k.clone(), v.clone());
            }
        }

        Ok(NodePartial {
            messages: if new_messages.is_empty() {
                None
            } else {
                Some(new_messages)
            },
            extra: if new_extra.is_empty() {
                None
            } else {
                Some(new_extra)
            },
            errors: None,
            frontier: None,
        })
    }
}
