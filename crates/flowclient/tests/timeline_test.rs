// crates/flowclient/tests/timeline_test.rs

use flowclient::{
    InteractionResponse, MessageCategory, Payload, PendingInteraction, Timeline, TimelineChange,
};
use flowcore::EventFrame;
use serde_json::{json, Value as JsonValue};

fn frame(value: JsonValue) -> EventFrame {
    EventFrame::parse(&value.to_string()).unwrap()
}

fn chunk(text: &str) -> EventFrame {
    frame(json!({
        "category": "stream_msg",
        "type": "stream",
        "message": {"unique_id": "m1", "output_key": "o", "msg": text}
    }))
}

fn over(msg: &str) -> EventFrame {
    frame(json!({
        "category": "stream_msg",
        "type": "over",
        "message": {"unique_id": "m1", "output_key": "o", "msg": msg}
    }))
}

fn node_run(kind: &str, node_id: &str) -> EventFrame {
    frame(json!({
        "category": "node_run",
        "type": kind,
        "message": {"node_id": node_id, "name": "LLM"}
    }))
}

#[test]
fn test_streamed_chunks_merge_into_one_message() {
    let mut timeline = Timeline::new();

    let changes = timeline.apply(&chunk("Hel"));
    assert_eq!(changes, vec![TimelineChange::Appended("m1-o".to_string())]);
    assert!(!timeline.get("m1-o").unwrap().complete);

    let changes = timeline.apply(&chunk("lo"));
    assert_eq!(changes, vec![TimelineChange::Updated("m1-o".to_string())]);

    let changes = timeline.apply(&over(""));
    assert_eq!(changes, vec![TimelineChange::Completed("m1-o".to_string())]);

    assert_eq!(timeline.len(), 1);
    let message = timeline.get("m1-o").unwrap();
    assert_eq!(message.text(), Some("Hello"));
    assert!(message.complete);
    assert_eq!(message.category, MessageCategory::BotOutput);
}

#[test]
fn test_chunking_does_not_change_result() {
    let chunkings: [&[&str]; 3] = [&["Hello, world"], &["Hel", "lo, ", "world"], &["H", "e", "llo, wor", "ld"]];

    for chunks in chunkings {
        let mut timeline = Timeline::new();
        for piece in chunks {
            timeline.apply(&chunk(piece));
        }
        timeline.apply(&over(""));
        assert_eq!(timeline.get("m1-o").unwrap().text(), Some("Hello, world"));
        assert_eq!(timeline.len(), 1);
    }
}

#[test]
fn test_final_text_replaces_streamed_text() {
    let mut timeline = Timeline::new();
    timeline.apply(&chunk("draft"));
    timeline.apply(&over("final answer"));
    assert_eq!(timeline.get("m1-o").unwrap().text(), Some("final answer"));
}

#[test]
fn test_completed_message_is_frozen() {
    let mut timeline = Timeline::new();
    timeline.apply(&chunk("done"));
    timeline.apply(&over(""));

    assert!(timeline.apply(&chunk(" and more")).is_empty());
    assert!(timeline.apply(&over("rewritten")).is_empty());
    assert_eq!(timeline.get("m1-o").unwrap().text(), Some("done"));
    assert_eq!(timeline.len(), 1);
}

#[test]
fn test_node_run_entries_are_ephemeral() {
    let mut timeline = Timeline::new();
    timeline.push_user("hi");
    let before = timeline.len();

    let changes = timeline.apply(&node_run("start", "llm_1"));
    assert_eq!(changes, vec![TimelineChange::Appended("node-run:llm_1".to_string())]);
    assert_eq!(timeline.len(), before + 1);

    // A repeated start replaces rather than duplicates.
    timeline.apply(&node_run("start", "llm_1"));
    assert_eq!(timeline.len(), before + 1);

    let changes = timeline.apply(&node_run("over", "llm_1"));
    assert_eq!(changes, vec![TimelineChange::Removed("node-run:llm_1".to_string())]);
    assert_eq!(timeline.len(), before);
    assert!(timeline.get("node-run:llm_1").is_none());
}

#[test]
fn test_node_run_progress_keeps_running_entry() {
    let mut timeline = Timeline::new();
    timeline.apply(&node_run("start", "llm_1"));

    let progress = frame(json!({
        "category": "node_run",
        "type": "stream",
        "message": {"node_id": "llm_1", "msg": "50%"}
    }));
    assert!(timeline.apply(&progress).is_empty());
    assert!(timeline.get("node-run:llm_1").is_some());

    timeline.apply(&node_run("over", "llm_1"));
    assert!(timeline.is_empty());
}

#[test]
fn test_node_run_entry_keeps_its_place() {
    let mut timeline = Timeline::new();
    timeline.apply(&node_run("start", "llm_1"));
    timeline.apply(&chunk("partial"));

    let categories: Vec<_> = timeline.messages().map(|m| m.category).collect();
    assert_eq!(categories, vec![MessageCategory::NodeRun, MessageCategory::BotOutput]);
    match &timeline.messages().next().unwrap().payload {
        Payload::NodeRun { node_id, name } => {
            assert_eq!(node_id, "llm_1");
            assert_eq!(name.as_deref(), Some("LLM"));
        }
        other => panic!("unexpected payload: {:?}", other),
    };
}

#[test]
fn test_error_frame_leaves_timeline_alone() {
    let mut timeline = Timeline::new();
    timeline.apply(&chunk("partial"));

    let changes = timeline.apply(&frame(json!({
        "category": "error", "type": "over", "message": "model unavailable"
    })));
    assert!(changes.is_empty());
    assert_eq!(timeline.len(), 1);
    assert!(!timeline.get("m1-o").unwrap().complete);
}

#[test]
fn test_choice_request_sets_pending() {
    let mut timeline = Timeline::new();
    let changes = timeline.apply(&frame(json!({
        "category": "output_with_choose_msg",
        "type": "over",
        "message": {
            "node_id": "output_1",
            "unique_id": "u7",
            "output_key": "output_result",
            "msg": "Pick one",
            "options": [{"id": "a", "label": "Apples"}, {"id": "b", "label": "Pears"}]
        }
    })));

    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0], TimelineChange::Appended("u7-output_result".to_string()));
    let message = timeline.get("u7-output_result").unwrap();
    assert_eq!(message.category, MessageCategory::ChoiceInteraction);
    assert!(message.complete);

    let pending = timeline.pending().unwrap();
    match pending {
        PendingInteraction::Choice { node_id, variable, options, .. } => {
            assert_eq!(node_id, "output_1");
            assert_eq!(variable, "output_result");
            assert_eq!(options.len(), 2);
        }
        other => panic!("unexpected interaction: {:?}", other),
    }

    let answer = pending.answer(&InteractionResponse::Choice("b".to_string())).unwrap();
    assert_eq!(answer.transcript, "Pears");
    assert_eq!(answer.action.data, json!({"output_1": {"output_result": "b"}}));
    assert!(pending
        .answer(&InteractionResponse::Choice("z".to_string()))
        .is_err());
}

#[test]
fn test_form_request_requires_fields() {
    let mut timeline = Timeline::new();
    let changes = timeline.apply(&frame(json!({
        "category": "user_input",
        "type": "over",
        "message": {
            "node_id": "input_1",
            "input_schema": {
                "tab": "form_input",
                "value": [
                    {"key": "city", "label": "City", "required": true},
                    {"key": "note"}
                ]
            }
        }
    })));
    assert!(matches!(changes.as_slice(), [TimelineChange::InteractionRequested(PendingInteraction::Form { .. })]));
    assert!(timeline.is_empty());

    let pending = timeline.pending().unwrap();
    let mut values = std::collections::BTreeMap::new();
    values.insert("note".to_string(), "window seat".to_string());
    assert!(pending.answer(&InteractionResponse::Form(values.clone())).is_err());

    values.insert("city".to_string(), "Lisbon".to_string());
    let answer = pending.answer(&InteractionResponse::Form(values)).unwrap();
    assert_eq!(
        answer.action.data,
        json!({"input_1": {"city": "Lisbon", "note": "window seat"}})
    );
    assert!(pending.answer(&InteractionResponse::Text("x".to_string())).is_err());
}

#[test]
fn test_round_over_cleans_up() {
    let mut timeline = Timeline::new();
    timeline.apply(&node_run("start", "llm_1"));
    timeline.apply(&frame(json!({
        "category": "user_input",
        "type": "over",
        "message": {"node_id": "input_1"}
    })));
    assert!(timeline.pending().is_some());

    let changes = timeline.apply(&frame(json!({"category": "processing", "type": "close"})));

    assert!(changes.contains(&TimelineChange::Removed("node-run:llm_1".to_string())));
    assert!(changes.contains(&TimelineChange::InteractionCleared));
    assert!(timeline.pending().is_none());
    assert_eq!(timeline.len(), 1);
    assert_eq!(
        timeline.messages().next().unwrap().category,
        MessageCategory::Separator
    );
}

#[test]
fn test_guide_questions_replace_previous() {
    let mut timeline = Timeline::new();
    timeline.apply(&frame(json!({
        "category": "guide_question",
        "type": "over",
        "message": {"guide_question": ["What can you do?"]}
    })));
    timeline.apply(&frame(json!({
        "category": "guide_question",
        "type": "over",
        "message": {"guide_question": ["Plan a trip", "Write a poem"]}
    })));
    assert_eq!(timeline.guide_questions(), ["Plan a trip", "Write a poem"]);
    assert!(timeline.is_empty());
}
