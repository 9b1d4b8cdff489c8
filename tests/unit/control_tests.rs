//! Unit tests for outbound control-message wire shapes.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use agent_relay::session::control::ControlMessage;

/// The initial user message nests role and content under `message`.
#[test]
fn user_message_wire_shape() {
    let msg = ControlMessage::user("fix the failing test");
    let value = serde_json::to_value(&msg).expect("serialise");

    assert_eq!(
        value,
        json!({
            "type": "user",
            "message": { "role": "user", "content": "fix the failing test" }
        })
    );
}

/// Permission responses carry the tool-use id and the boolean verdict.
#[test]
fn permission_response_wire_shape() {
    let msg = ControlMessage::PermissionResponse {
        tool_use_id: "toolu_01".into(),
        allowed: false,
    };
    let value = serde_json::to_value(&msg).expect("serialise");

    assert_eq!(
        value,
        json!({
            "type": "permission_response",
            "tool_use_id": "toolu_01",
            "allowed": false
        })
    );
}

/// Question responses carry the id → answer mapping verbatim.
#[test]
fn question_response_wire_shape() {
    let mut answers: BTreeMap<String, Value> = BTreeMap::new();
    answers.insert("q1".into(), json!("option a"));
    answers.insert("q2".into(), json!(42));

    let msg = ControlMessage::QuestionResponse { answers };
    let value = serde_json::to_value(&msg).expect("serialise");

    assert_eq!(
        value,
        json!({
            "type": "question_response",
            "answers": { "q1": "option a", "q2": 42 }
        })
    );
}

/// The continue signal is a bare tagged object.
#[test]
fn continue_wire_shape() {
    let value = serde_json::to_value(ControlMessage::Continue).expect("serialise");
    assert_eq!(value, json!({ "type": "continue" }));
}

/// Compact serialisation never embeds a newline, so a message plus the
/// appended delimiter is always exactly one line on the wire.
#[test]
fn serialised_messages_are_single_line() {
    let messages = vec![
        ControlMessage::user("line one\nline two"),
        ControlMessage::PermissionResponse {
            tool_use_id: "toolu_02".into(),
            allowed: true,
        },
        ControlMessage::Continue,
    ];

    for msg in messages {
        let text = serde_json::to_string(&msg).expect("serialise");
        assert!(
            !text.contains('\n'),
            "serialised control message must be single-line: {text}"
        );
    }
}
