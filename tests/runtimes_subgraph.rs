use std::sync::Arc;

use weavegraph::channels::Channel;
use weavegraph::graphs::GraphBuilder;
use weavegraph::runtimes::{
    AppRunner, CheckpointerType, SessionInit, StepOptions, StepResult, SubgraphNode,
};
use weavegraph::types::NodeKind;

mod common;
use common::*;

fn make_child_app() -> weavegraph::app::App {
    GraphBuilder::new()
        .add_node(NodeKind::Custom("child_work".into()), TestNode {
            name: "child_work",
        })
        .add_edge(NodeKind::Start, NodeKind::Custom("child_work".into()))
        .add_edge(NodeKind::Custom("child_work".into()), NodeKind::End)
        .compile()
        .unwrap()
}

#[tokio::test]
async fn test_subgraph_node_merges_child_output_into_parent() {
    let child = Arc::new(make_child_app());

    let parent = GraphBuilder::new()
        .add_node(
            NodeKind::Custom("delegate".into()),
            SubgraphNode::new(child),
        )
        .add_edge(NodeKind::Start, NodeKind::Custom("delegate".into()))
        .add_edge(NodeKind::Custom("delegate".into()), NodeKind::End)
        .compile()
        .unwrap();

    let mut runner = AppRunner::new(parent, CheckpointerType::InMemory).await;
    let initial_state = state_with_user("hello");

    assert!(matches!(
        runner
            .create_session("parent_sess".into(), initial_state)
            .await
            .unwrap(),
        SessionInit::Fresh
    ));

    let report = runner
        .run_step("parent_sess", StepOptions::default())
        .await
        .unwrap();

    let StepResult::Completed(step_report) = report else {
        panic!("expected step to complete");
    };
    assert!(
        step_report
            .ran_nodes
            .contains(&NodeKind::Custom("delegate".into()))
    );

    let sess = runner.get_session("parent_sess").unwrap();
    let messages = sess.state.messages.snapshot();
    // Original user message plus the child graph's own message output.
    assert_eq!(messages.len(), 2);
    assert!(messages[1].content.contains("child_work"));
}

#[tokio::test]
async fn test_subgraph_node_invocations_use_distinct_sessions_per_step() {
    // Two parent steps should each spin up an isolated child session rather
    // than colliding on session id.
    let child_step1 = Arc::new(make_child_app());
    let child_step2 = Arc::new(make_child_app());

    let parent = GraphBuilder::new()
        .add_node(
            NodeKind::Custom("step1".into()),
            SubgraphNode::new(child_step1),
        )
        .add_node(
            NodeKind::Custom("step2".into()),
            SubgraphNode::new(child_step2),
        )
        .add_edge(NodeKind::Start, NodeKind::Custom("step1".into()))
        .add_edge(
            NodeKind::Custom("step1".into()),
            NodeKind::Custom("step2".into()),
        )
        .add_edge(NodeKind::Custom("step2".into()), NodeKind::End)
        .compile()
        .unwrap();

    let mut runner = AppRunner::new(parent, CheckpointerType::InMemory).await;
    runner
        .create_session("multi_sess".into(), state_with_user("hi"))
        .await
        .unwrap();

    let final_state = runner.run_until_complete("multi_sess").await.unwrap();
    let messages = final_state.messages.snapshot();
    // user message + two child-graph outputs, one per delegating step.
    assert_eq!(messages.len(), 3);
}
