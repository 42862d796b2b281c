// crates/flowclient/tests/session_test.rs

mod common;

use common::{fast_config, init_tracing, pump_until, MemoryConnector};
use flowclient::{
    ChannelEvent, ChannelState, ClientError, InteractionResponse, MessageCategory, NodeRunState,
    NoticeSource, PendingInteraction, Session, SessionUpdate,
};
use flowcore::{Graph, Node, Parameter};
use serde_json::json;

fn sample_graph() -> Graph {
    let mut graph = Graph::new();
    graph.add_node(Node::new("start", "Start").with_id("start_1")).unwrap();
    graph
        .add_node(
            Node::new("input", "Input")
                .with_id("N")
                .with_parameter(Parameter::new("user_input", "").exported()),
        )
        .unwrap();
    graph
        .add_node(
            Node::new("llm", "LLM")
                .with_id("llm_1")
                .with_parameter(Parameter::new("user_prompt", "Echo {{#N.user_input#}}")),
        )
        .unwrap();
    graph.connect("start_1", "N").unwrap();
    graph.connect("N", "llm_1").unwrap();
    graph
}

#[tokio::test]
async fn test_text_interaction_round_trip() {
    init_tracing();
    let (connector, mut peers) = MemoryConnector::new();
    let mut session = Session::with_id("s1", fast_config(), connector);

    session.start_run(&sample_graph()).unwrap();
    pump_until(&mut session, |s| s.channel_state() == ChannelState::Open).await;

    let mut peer = peers.recv().await.unwrap();
    assert_eq!(peer.url, "mem://engine/s1");
    let init = peer.next_action().await;
    assert_eq!(init["action"], "init_data");
    assert_eq!(init["chat_id"], "s1");
    assert_eq!(init["data"]["nodes"].as_array().unwrap().len(), 3);

    peer.push(json!({
        "category": "user_input",
        "type": "over",
        "chat_id": "s1",
        "message": {"node_id": "N", "msg": "What should I echo?"}
    }));
    pump_until(&mut session, |s| s.pending().is_some()).await;
    assert!(matches!(
        session.pending(),
        Some(PendingInteraction::Text { node_id, variable, .. }) if node_id == "N" && variable == "user_input"
    ));

    let updates = session
        .submit(&InteractionResponse::Text("hello there".to_string()))
        .unwrap();
    assert!(session.pending().is_none());
    assert_eq!(updates.len(), 2);

    let action = peer.next_action().await;
    assert_eq!(
        action,
        json!({"action": "input", "chat_id": "s1", "data": {"N": {"user_input": "hello there"}}})
    );
    assert!(peer.received.try_recv().is_err());

    let last = session.timeline().messages().last().unwrap();
    assert_eq!(last.category, MessageCategory::User);
    assert_eq!(last.text(), Some("hello there"));
}

#[tokio::test]
async fn test_validation_blocks_run() {
    let (connector, _peers) = MemoryConnector::new();
    let mut session = Session::with_id("s1", fast_config(), connector.clone());

    let mut graph = sample_graph();
    graph.remove_node("N").unwrap();

    let err = session.start_run(&graph).unwrap_err();
    match err {
        ClientError::Validation(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].node_id, "llm_1");
            assert_eq!(errors[0].field, "user_prompt");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(session.channel_state(), ChannelState::Closed);
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn test_node_status_and_error_notices() {
    let (connector, mut peers) = MemoryConnector::new();
    let mut session = Session::with_id("s1", fast_config(), connector);
    let mut llm_state = session.subscribe_node("llm_1");

    session.start_run(&sample_graph()).unwrap();
    let peer = peers.recv().await.unwrap();

    peer.push(json!({"category": "node_run", "type": "start", "chat_id": "s1", "message": {"node_id": "llm_1"}}));
    pump_until(&mut session, |s| s.node_state("llm_1") == NodeRunState::Running).await;
    assert!(llm_state.has_changed().unwrap());
    assert_eq!(*llm_state.borrow_and_update(), NodeRunState::Running);

    let before = session.timeline().len();
    peer.push(json!({"category": "error", "type": "over", "chat_id": "s1", "message": "quota exceeded"}));
    peer.push(json!({
        "category": "node_run", "type": "over", "chat_id": "s1",
        "message": {"node_id": "llm_1", "reason": "quota exceeded"}
    }));
    pump_until(&mut session, |s| s.node_state("llm_1") == NodeRunState::Failed).await;

    assert_eq!(session.notices().len(), 1);
    assert_eq!(session.notices()[0].source, NoticeSource::Engine);
    assert_eq!(session.notices()[0].text, "quota exceeded");
    // The node-run entry is gone again; the error itself added nothing.
    assert_eq!(session.timeline().len(), before - 1);
}

#[tokio::test]
async fn test_frames_for_other_sessions_are_dropped() {
    let (connector, mut peers) = MemoryConnector::new();
    let mut session = Session::with_id("s1", fast_config(), connector);
    session.open();
    let peer = peers.recv().await.unwrap();

    peer.push(json!({"category": "output_msg", "type": "over", "chat_id": "other", "message": {"msg": "not yours"}}));
    peer.push(json!({"category": "output_msg", "type": "over", "chat_id": "s1", "message": {"msg": "yours"}}));
    pump_until(&mut session, |s| !s.timeline().is_empty()).await;

    assert_eq!(session.timeline().len(), 1);
    assert_eq!(session.timeline().messages().next().unwrap().text(), Some("yours"));
}

#[tokio::test]
async fn test_transport_close_with_reason_ends_round() {
    let (connector, mut peers) = MemoryConnector::new();
    let mut session = Session::with_id("s1", fast_config(), connector);
    session.open();
    let peer = peers.recv().await.unwrap();

    peer.push(json!({"category": "node_run", "type": "start", "message": {"node_id": "llm_1"}}));
    peer.close(Some("engine restarting"));
    let updates = pump_until(&mut session, |s| s.channel_state() == ChannelState::Closed).await;

    assert!(updates.contains(&SessionUpdate::Channel(ChannelState::Closed)));
    let messages: Vec<_> = session.timeline().messages().collect();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].category, MessageCategory::Separator);

    // Not reconnected automatically; stop on a closed channel is a no-op.
    assert!(session.stop().is_ok());
    assert_eq!(session.channel_state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_closed_session_ignores_in_flight_frames() {
    let (connector, mut peers) = MemoryConnector::new();
    let mut session = Session::with_id("s1", fast_config(), connector);
    session.open();
    pump_until(&mut session, |s| s.channel_state() == ChannelState::Open).await;
    let _peer = peers.recv().await.unwrap();

    session.close();
    let late = ChannelEvent::Frame {
        epoch: 1,
        frame: flowcore::EventFrame::parse(
            r#"{"category":"output_msg","type":"over","message":{"msg":"late"}}"#,
        ),
    };
    assert!(session.handle(late).is_empty());
    assert!(session.timeline().is_empty());
}

#[tokio::test]
async fn test_stop_is_sent_while_interaction_pending() {
    let (connector, mut peers) = MemoryConnector::new();
    let mut session = Session::with_id("s1", fast_config(), connector);
    session.start_run(&sample_graph()).unwrap();
    let mut peer = peers.recv().await.unwrap();
    peer.next_action().await;

    peer.push(json!({"category": "user_input", "type": "over", "message": {"node_id": "N"}}));
    pump_until(&mut session, |s| s.pending().is_some()).await;

    assert!(matches!(
        session.start_run(&sample_graph()),
        Err(ClientError::InteractionPending)
    ));
    session.stop().unwrap();
    assert_eq!(peer.next_action().await["action"], "stop");

    peer.push(json!({"category": "node_run", "type": "over", "message": {"node_id": "*"}}));
    peer.push(json!({"category": "processing", "type": "close"}));
    pump_until(&mut session, |s| s.pending().is_none()).await;
}

#[tokio::test]
async fn test_dropped_connection_clears_pending_interaction() {
    init_tracing();
    let (connector, mut peers) = MemoryConnector::new();
    let mut session = Session::with_id("s1", fast_config(), connector);
    session.start_run(&sample_graph()).unwrap();
    let mut peer = peers.recv().await.unwrap();
    peer.next_action().await;

    peer.push(json!({"category": "node_run", "type": "start", "chat_id": "s1", "message": {"node_id": "N"}}));
    peer.push(json!({"category": "user_input", "type": "over", "chat_id": "s1", "message": {"node_id": "N"}}));
    pump_until(&mut session, |s| s.pending().is_some()).await;
    assert_eq!(session.node_state("N"), NodeRunState::Running);

    drop(peer);
    pump_until(&mut session, |s| s.channel_state() == ChannelState::Closed).await;

    assert!(session.pending().is_none());
    assert_eq!(session.node_state("N"), NodeRunState::Idle);
    assert!(session
        .timeline()
        .messages()
        .all(|m| m.category != MessageCategory::NodeRun));
    // Not a finished round, so no separator.
    assert!(session
        .timeline()
        .messages()
        .all(|m| m.category != MessageCategory::Separator));

    // A fresh run is accepted again.
    session.start_run(&sample_graph()).unwrap();
    let mut peer = peers.recv().await.unwrap();
    assert_eq!(peer.next_action().await["action"], "init_data");
}
