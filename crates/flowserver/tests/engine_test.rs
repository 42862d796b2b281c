// crates/flowserver/tests/engine_test.rs

use flowclient::{PendingInteraction, Timeline};
use flowcore::{
    ActionFrame, EventCategory, EventFrame, EventKind, Graph, Node, Parameter, Value,
};
use flowserver::EngineRun;
use serde_json::json;

fn chat_graph() -> Graph {
    let mut graph = Graph::new();
    graph
        .add_node(
            Node::new("start", "Start")
                .with_id("start_1")
                .with_parameter(Parameter::new("guide_word", "Hi! Tell me something."))
                .with_parameter(Parameter::new(
                    "guide_question",
                    Value::from(json!(["What can you do?"])),
                )),
        )
        .unwrap();
    graph
        .add_node(
            Node::new("input", "Input")
                .with_id("input_1")
                .with_parameter(Parameter::new("user_input", "").exported()),
        )
        .unwrap();
    graph
        .add_node(
            Node::new("llm", "LLM")
                .with_id("llm_1")
                .with_parameter(Parameter::new("user_prompt", "Echo {{#input_1.user_input#}}"))
                .with_parameter(Parameter::new("output", "").exported()),
        )
        .unwrap();
    graph
        .add_node(
            Node::new("output", "Confirm")
                .with_id("output_1")
                .with_parameter(Parameter::new("message", "{{#llm_1.output#}}"))
                .with_parameter(Parameter::new("output_type", "choice"))
                .with_parameter(Parameter::new(
                    "options",
                    Value::from(json!([{"id": "yes", "label": "Looks good"}, {"id": "no", "label": "Retry"}])),
                )),
        )
        .unwrap();
    graph.add_node(Node::new("end", "End").with_id("end_1")).unwrap();

    graph.connect("start_1", "input_1").unwrap();
    graph.connect("input_1", "llm_1").unwrap();
    graph.connect("llm_1", "output_1").unwrap();
    graph.connect("output_1", "end_1").unwrap();
    graph
}

/// Frames survive the wire format unchanged.
fn over_the_wire(frames: Vec<EventFrame>) -> Vec<EventFrame> {
    frames
        .into_iter()
        .map(|f| EventFrame::parse(&f.to_json().unwrap()).unwrap())
        .collect()
}

fn kinds(frames: &[EventFrame]) -> Vec<(EventCategory, EventKind)> {
    frames.iter().map(|f| (f.category, f.kind)).collect()
}

#[test]
fn test_run_pauses_at_input() {
    let mut run = EngineRun::new("c1");
    let frames = over_the_wire(run.handle(&ActionFrame::init_data(&chat_graph().export())));

    assert_eq!(
        kinds(&frames),
        vec![
            (EventCategory::NodeRun, EventKind::Start),
            (EventCategory::GuideQuestion, EventKind::Over),
            (EventCategory::OutputMsg, EventKind::Over),
            (EventCategory::NodeRun, EventKind::Over),
            (EventCategory::NodeRun, EventKind::Start),
            (EventCategory::UserInput, EventKind::Over),
        ]
    );
    assert!(frames.iter().all(|f| f.chat_id.as_deref() == Some("c1")));
    assert_eq!(frames[5].node_id(), Some("input_1"));
    assert!(run.is_waiting());
}

#[test]
fn test_full_round_through_timeline() {
    let mut run = EngineRun::new("c1");
    let mut timeline = Timeline::new();
    let mut feed = |frames: Vec<EventFrame>, timeline: &mut Timeline| {
        for frame in over_the_wire(frames) {
            timeline.apply(&frame);
        }
    };

    feed(run.handle(&ActionFrame::init_data(&chat_graph().export())), &mut timeline);
    assert_eq!(timeline.guide_questions(), ["What can you do?"]);
    assert!(matches!(timeline.pending(), Some(PendingInteraction::Text { .. })));

    feed(
        run.handle(&ActionFrame::input_value("input_1", "user_input", "hi there")),
        &mut timeline,
    );
    assert_eq!(run.value("llm_1", "output"), Some("Echo hi there"));

    let texts: Vec<_> = timeline.messages().filter_map(|m| m.text()).collect();
    assert_eq!(texts, vec!["Hi! Tell me something.", "Echo hi there", "Echo hi there"]);
    match timeline.pending() {
        Some(PendingInteraction::Choice { node_id, variable, options, .. }) => {
            assert_eq!(node_id, "output_1");
            assert_eq!(variable, "output_result");
            assert_eq!(options.len(), 2);
        }
        other => panic!("unexpected interaction: {:?}", other),
    }

    let frames = run.handle(&ActionFrame::input_value("output_1", "output_result", "yes"));
    assert_eq!(frames.last().unwrap().kind, EventKind::Close);
    feed(frames, &mut timeline);
    assert!(timeline.pending().is_none());
    assert!(!run.is_waiting());
}

#[test]
fn test_stream_chunks_concatenate_to_reply() {
    let mut run = EngineRun::new("c1");
    run.handle(&ActionFrame::init_data(&chat_graph().export()));
    let frames = run.handle(&ActionFrame::input_value("input_1", "user_input", "one two"));

    let chunks: Vec<String> = frames
        .iter()
        .filter(|f| f.kind == EventKind::Stream)
        .filter_map(|f| f.text())
        .collect();
    assert_eq!(chunks, vec!["Echo ", "one ", "two"]);
}

#[test]
fn test_input_for_wrong_node_is_rejected() {
    let mut run = EngineRun::new("c1");
    run.handle(&ActionFrame::init_data(&chat_graph().export()));

    let frames = run.handle(&ActionFrame::input_value("llm_1", "user_input", "x"));
    assert_eq!(kinds(&frames), vec![(EventCategory::Error, EventKind::Over)]);
    assert!(run.is_waiting());
}

#[test]
fn test_stop_resets_everything() {
    let mut run = EngineRun::new("c1");
    run.handle(&ActionFrame::init_data(&chat_graph().export()));

    let frames = run.handle(&ActionFrame::stop());
    assert_eq!(
        kinds(&frames),
        vec![
            (EventCategory::NodeRun, EventKind::Over),
            (EventCategory::Processing, EventKind::Close),
        ]
    );
    assert!(frames[0].is_wildcard());
    assert!(!run.is_waiting());
}

#[test]
fn test_unknown_node_type_fails_node_and_continues() {
    let mut graph = Graph::new();
    graph.add_node(Node::new("start", "Start").with_id("start_1")).unwrap();
    graph.add_node(Node::new("rag", "Retriever").with_id("rag_1")).unwrap();
    graph.add_node(Node::new("end", "End").with_id("end_1")).unwrap();
    graph.connect("start_1", "rag_1").unwrap();
    graph.connect("rag_1", "end_1").unwrap();

    let mut run = EngineRun::new("c1");
    let frames = run.handle(&ActionFrame::init_data(&graph.export()));

    let error = frames.iter().find(|f| f.category == EventCategory::Error).unwrap();
    assert!(error.text().unwrap().contains("rag"));
    let failed = frames
        .iter()
        .find(|f| f.category == EventCategory::NodeRun && f.kind == EventKind::Over && f.node_id() == Some("rag_1"))
        .unwrap();
    assert!(failed.failure_reason().is_some());
    assert_eq!(frames.last().unwrap().kind, EventKind::Close);
}

#[test]
fn test_input_before_init_is_rejected() {
    let mut run = EngineRun::new("c1");
    let frames = run.handle(&ActionFrame::input_value("input_1", "user_input", "hi"));
    assert_eq!(kinds(&frames), vec![(EventCategory::Error, EventKind::Over)]);
}

#[test]
fn test_cyclic_graph_is_rejected() {
    let mut graph = chat_graph();
    graph.connect("end_1", "input_1").unwrap();

    let mut run = EngineRun::new("c1");
    let frames = run.handle(&ActionFrame::init_data(&graph.export()));
    assert_eq!(
        kinds(&frames),
        vec![
            (EventCategory::Error, EventKind::Over),
            (EventCategory::Processing, EventKind::Close),
        ]
    );
}
