//! Graph compilation logic and structural validation.
//!
//! This module contains the logic for compiling a [`GraphBuilder`](super::builder::GraphBuilder)
//! into an executable [`App`], including the validation pass that catches
//! unreachable entry points and dangling edges before execution ever starts.

use std::collections::VecDeque;

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::app::App;
use crate::types::NodeKind;

/// Errors raised while compiling a [`GraphBuilder`](super::builder::GraphBuilder)
/// into an executable [`App`].
#[derive(Debug, Error, Diagnostic, PartialEq, Eq, Clone)]
pub enum GraphCompileError {
    /// No edge (static or conditional) originates from `NodeKind::Start`.
    #[error("graph has no entry point: no edge leaves NodeKind::Start")]
    #[diagnostic(code(weavegraph::graphs::missing_entry))]
    MissingEntry,

    /// A static edge targets a custom node that was never registered.
    #[error("edge from {from:?} targets unregistered node {to:?}")]
    #[diagnostic(code(weavegraph::graphs::unknown_target))]
    UnknownTarget { from: NodeKind, to: NodeKind },

    /// A conditional edge originates from a custom node that was never
    /// registered (conditional edges from `Start` are always legal).
    #[error("conditional edge originates from unregistered node {from:?}")]
    #[diagnostic(code(weavegraph::graphs::unknown_source))]
    UnknownSource { from: NodeKind },
}

/// Compilation logic for GraphBuilder.
impl super::builder::GraphBuilder {
    /// Compiles the graph into an executable application.
    ///
    /// Validates the graph configuration and converts it into an [`App`] that
    /// can execute workflows. This method performs the following checks:
    ///
    /// - At least one edge (static or conditional) must leave `NodeKind::Start`.
    /// - Every static edge target naming a custom node must have a registered
    ///   handler.
    /// - Every conditional edge must originate from `NodeKind::Start` or a
    ///   registered custom node.
    ///
    /// Nodes unreachable from `Start` are allowed to compile but are logged
    /// as a warning, since conditional routing or `Command.goto` can still
    /// reach them at runtime in ways static analysis can't see.
    ///
    /// # Errors
    ///
    /// Returns [`GraphCompileError`] if any of the structural checks above
    /// fail.
    ///
    /// # Examples
    ///
    /// ```
    /// use weavegraph::graphs::GraphBuilder;
    /// use weavegraph::types::NodeKind;
    ///
    /// # struct MyNode;
    /// # #[async_trait::async_trait]
    /// # impl weavegraph::node::Node for MyNode {
    /// #     async fn run(&self, _: weavegraph::state::StateSnapshot, _: weavegraph::node::NodeContext) -> Result<weavegraph::node::NodePartial, weavegraph::node::NodeError> {
    /// #         Ok(weavegraph::node::NodePartial::default())
    /// #     }
    /// # }
    ///
    /// let app = GraphBuilder::new()
    ///     .add_node(NodeKind::Custom("process".into()), MyNode)
    ///     .add_edge(NodeKind::Start, NodeKind::Custom("process".into()))
    ///     .add_edge(NodeKind::Custom("process".into()), NodeKind::End)
    ///     .compile()
    ///     .unwrap();
    ///
    /// // App is ready for execution
    /// ```
    pub fn compile(self) -> Result<App, GraphCompileError> {
        self.validate()?;
        let (nodes, edges, conditional_edges, runtime_config, reducer_registry) =
            self.into_parts();
        Ok(App::from_parts(
            nodes,
            edges,
            conditional_edges,
            runtime_config,
            reducer_registry,
        ))
    }

    fn validate(&self) -> Result<(), GraphCompileError> {
        let nodes = self.nodes_ref();
        let edges = self.edges_ref();
        let conditional_edges = self.conditional_edges_ref();

        let has_entry = edges.contains_key(&NodeKind::Start)
            || conditional_edges
                .iter()
                .any(|ce| *ce.from() == NodeKind::Start);
        if !has_entry {
            return Err(GraphCompileError::MissingEntry);
        }

        for (from, targets) in edges {
            for to in targets {
                if let NodeKind::Custom(_) = to {
                    if *to != NodeKind::End && !nodes.contains_key(to) {
                        return Err(GraphCompileError::UnknownTarget {
                            from: from.clone(),
                            to: to.clone(),
                        });
                    }
                }
            }
        }

        for ce in conditional_edges {
            let from = ce.from();
            if *from != NodeKind::Start && !nodes.contains_key(from) {
                return Err(GraphCompileError::UnknownSource { from: from.clone() });
            }
        }

        self.warn_unreachable_nodes(nodes, edges, conditional_edges);

        Ok(())
    }

    /// Logs (but does not fail on) custom nodes that static analysis can't
    /// reach from `Start`. Conditional edges fan out to string-named targets
    /// resolved at runtime, so this is necessarily a conservative estimate:
    /// any node with an incoming conditional edge from a reachable source is
    /// treated as reachable.
    fn warn_unreachable_nodes(
        &self,
        nodes: &rustc_hash::FxHashMap<NodeKind, std::sync::Arc<dyn crate::node::Node>>,
        edges: &rustc_hash::FxHashMap<NodeKind, Vec<NodeKind>>,
        conditional_edges: &[super::edges::ConditionalEdge],
    ) {
        let mut reachable: FxHashSet<NodeKind> = FxHashSet::default();
        let mut queue: VecDeque<NodeKind> = VecDeque::new();
        queue.push_back(NodeKind::Start);
        reachable.insert(NodeKind::Start);

        let conditional_sources: FxHashSet<NodeKind> =
            conditional_edges.iter().map(|ce| ce.from().clone()).collect();

        while let Some(current) = queue.pop_front() {
            if let Some(targets) = edges.get(&current) {
                for target in targets {
                    if reachable.insert(target.clone()) {
                        queue.push_back(target.clone());
                    }
                }
            }
            if conditional_sources.contains(&current) {
                // Any node could be the runtime target of a conditional edge
                // from a reachable source; mark all custom nodes reachable
                // from this source to avoid false positives.
                for kind in nodes.keys() {
                    if reachable.insert(kind.clone()) {
                        queue.push_back(kind.clone());
                    }
                }
            }
        }

        for kind in nodes.keys() {
            if !reachable.contains(kind) {
                tracing::warn!(?kind, "node is unreachable from NodeKind::Start");
            }
        }
    }
}
