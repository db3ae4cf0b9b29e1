use beamcast::protocol::messages::{MessageData, PresenceData, PusherMessage};
use serde_json::{Value, json};
use std::collections::HashMap;

// Helper function to serialize message and parse as JSON for testing
fn message_to_json(message: &PusherMessage) -> Value {
    serde_json::to_value(message).expect("Failed to serialize message")
}

#[test]
fn test_connection_established_format() {
    // data is a String (JSON-encoded object), nested per the protocol
    let message = PusherMessage::connection_established("test-socket-123".to_string());
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher.connection_established");

    assert!(json.get("data").is_some(), "Should have 'data' field");
    assert!(
        json["data"].is_string(),
        "Data field should be a String (JSON-encoded)"
    );

    let data_str = json["data"].as_str().expect("Data should be a string");
    let parsed_data: Value =
        serde_json::from_str(data_str).expect("Data string should contain valid JSON");

    assert_eq!(parsed_data["socket_id"], "test-socket-123");
    assert_eq!(parsed_data["activity_timeout"], 30);
}

#[test]
fn test_error_format() {
    let message = PusherMessage::error(4001, "Could not find app key `abc`.".to_string(), None);
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher.error");

    assert!(json["data"].is_object(), "Data field should be an Object");
    let data = json["data"].as_object().expect("Data should be an object");
    assert_eq!(data["code"], 4001);
    assert_eq!(data["message"], "Could not find app key `abc`.");

    // No channel field on connection-scoped errors
    assert!(json.get("channel").is_none());
}

#[test]
fn test_channel_scoped_error_format() {
    let message = PusherMessage::error(
        4009,
        "Invalid signature".to_string(),
        Some("private-room".to_string()),
    );
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher.error");
    assert_eq!(json["channel"], "private-room");
    assert_eq!(json["data"]["code"], 4009);
}

#[test]
fn test_pong_format() {
    // No data field at all
    let message = PusherMessage::pong();
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher.pong");
    assert!(
        json.get("data").is_none(),
        "Pong should not have 'data' field"
    );
}

#[test]
fn test_ping_format() {
    let message = PusherMessage::ping();
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher:ping");
    assert!(
        json.get("data").is_none(),
        "Ping should not have 'data' field"
    );
}

#[test]
fn test_subscription_succeeded_format() {
    // Presence channels carry the roster as a JSON-encoded string
    let mut hash = HashMap::new();
    hash.insert("user1".to_string(), Some(json!({"name": "Alice"})));
    hash.insert("user2".to_string(), Some(json!({"name": "Bob"})));

    let presence_data = PresenceData {
        ids: vec!["user1".to_string(), "user2".to_string()],
        hash,
        count: 2,
    };

    let message =
        PusherMessage::subscription_succeeded("presence-room".to_string(), Some(presence_data));
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher_internal:subscription_succeeded");
    assert_eq!(json["channel"], "presence-room");
    assert!(
        json["data"].is_string(),
        "Data field should be a String (JSON-encoded)"
    );

    let data_str = json["data"].as_str().expect("Data should be a string");
    let parsed_data: Value =
        serde_json::from_str(data_str).expect("Data string should contain valid JSON");

    let presence = &parsed_data["presence"];
    assert_eq!(presence["count"], 2);
    assert_eq!(presence["hash"]["user1"], json!({"name": "Alice"}));
    assert_eq!(presence["hash"]["user2"], json!({"name": "Bob"}));
    let ids = presence["ids"].as_array().expect("ids should be an array");
    assert_eq!(ids.len(), 2);
}

#[test]
fn test_subscription_succeeded_non_presence_format() {
    // Non-presence channels get an empty object as string
    let message = PusherMessage::subscription_succeeded("private-channel".to_string(), None);
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher_internal:subscription_succeeded");
    assert_eq!(json["channel"], "private-channel");

    let data_str = json["data"].as_str().expect("Data should be a string");
    let parsed_data: Value =
        serde_json::from_str(data_str).expect("Data string should contain valid JSON");
    assert_eq!(parsed_data, json!({}));
}

#[test]
fn test_member_added_format() {
    let user_info = json!({"name": "Alice", "email": "alice@example.com"});

    let message = PusherMessage::member_added(
        "presence-room".to_string(),
        "user123".to_string(),
        Some(user_info.clone()),
    );
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher_internal:member_added");
    assert_eq!(json["channel"], "presence-room");
    assert!(
        json["data"].is_string(),
        "Data field should be a String (JSON-encoded)"
    );

    let data_str = json["data"].as_str().expect("Data should be a string");
    let parsed_data: Value =
        serde_json::from_str(data_str).expect("Data string should contain valid JSON");

    assert_eq!(parsed_data["user_id"], "user123");
    assert_eq!(parsed_data["user_info"], user_info);
}

#[test]
fn test_member_removed_format() {
    let message = PusherMessage::member_removed("presence-room".to_string(), "user123".to_string());
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher_internal:member_removed");
    assert_eq!(json["channel"], "presence-room");

    let data_str = json["data"].as_str().expect("Data should be a string");
    let parsed_data: Value =
        serde_json::from_str(data_str).expect("Data string should contain valid JSON");

    assert_eq!(parsed_data["user_id"], "user123");
    assert!(
        parsed_data.get("user_info").is_none(),
        "Should not have user_info"
    );
}

#[test]
fn test_channel_event_format() {
    let event_data = json!({"message": "Hello", "timestamp": 1234567890});

    let message = PusherMessage::channel_event("my-event", "my-channel", event_data.clone());
    let json = message_to_json(&message);

    assert_eq!(json["event"], "my-event");
    assert_eq!(json["channel"], "my-channel");
    assert!(json["data"].is_string(), "Data field should be a String");

    let data_str = json["data"].as_str().expect("Data should be a string");
    let parsed_data: Value =
        serde_json::from_str(data_str).expect("Data string should contain valid JSON");
    assert_eq!(parsed_data, event_data);
}

#[test]
fn test_dispatch_reply_event_names() {
    let response = PusherMessage::event_response("order.place", None, json!({"ok": true}));
    assert_eq!(message_to_json(&response)["event"], "order.place:response");

    let progress = PusherMessage::event_progress("order.place", None, json!({"pct": 50}));
    assert_eq!(message_to_json(&progress)["event"], "order.place:progress");

    let error = PusherMessage::event_error("order.place", None, json!({"message": "nope"}));
    assert_eq!(message_to_json(&error)["event"], "order.place:error");
}

#[test]
fn test_dispatch_reply_carries_originating_channel() {
    let response = PusherMessage::event_response(
        "order.place",
        Some("orders".to_string()),
        json!({"ok": true}),
    );
    let json = message_to_json(&response);
    assert_eq!(json["channel"], "orders");
    assert_eq!(json["data"], json!({"ok": true}));
}

#[test]
fn test_signin_success_format() {
    let message = PusherMessage::signin_success(r#"{"id":"123","name":"John"}"#.to_string());
    let json = message_to_json(&message);

    assert_eq!(json["event"], "pusher:signin_success");
    assert!(json["data"].is_object(), "Data field should be an Object");

    let data = json["data"].as_object().expect("Data should be an object");
    assert!(data.contains_key("user_data"), "Should have user_data field");
    assert!(!data.contains_key("auth"), "Should NOT have auth field");
    assert_eq!(data["user_data"], r#"{"id":"123","name":"John"}"#);
}

#[test]
fn test_client_event_accepts_string() {
    let message = PusherMessage {
        channel: Some("private-channel".to_string()),
        event: Some("client-typing".to_string()),
        data: Some(MessageData::String("user is typing...".to_string())),
        name: None,
        user_id: None,
    };

    let json = message_to_json(&message);
    assert_eq!(json["event"], "client-typing");
    assert_eq!(json["channel"], "private-channel");
    assert_eq!(json["data"], "user is typing...");
}

#[test]
fn test_client_event_accepts_json() {
    let message = PusherMessage {
        channel: Some("private-channel".to_string()),
        event: Some("client-typing".to_string()),
        data: Some(MessageData::Json(
            json!({"user": "alice", "status": "typing"}),
        )),
        name: None,
        user_id: None,
    };

    let json = message_to_json(&message);
    assert_eq!(json["event"], "client-typing");
    assert_eq!(json["data"]["user"], "alice");
    assert_eq!(json["data"]["status"], "typing");
}

#[test]
fn test_channel_event_with_user_id() {
    // Presence client events carry the sender's user_id
    let message = PusherMessage {
        event: Some("client-hello".to_string()),
        channel: Some("presence-room".to_string()),
        data: Some(MessageData::String(json!({"hi": true}).to_string())),
        name: None,
        user_id: Some("user123".to_string()),
    };
    let json = message_to_json(&message);

    assert_eq!(json["user_id"], "user123");
}

#[test]
fn test_inbound_frames_accept_both_prefix_spellings() {
    use beamcast::protocol::constants::protocol_event_name;

    for raw in [
        r#"{"event":"pusher:subscribe","data":{"channel":"room"}}"#,
        r#"{"event":"pusher.subscribe","data":{"channel":"room"}}"#,
    ] {
        let message: PusherMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            protocol_event_name(message.event_name()),
            Some("subscribe"),
            "both pusher: and pusher. spellings must parse"
        );
    }
}
