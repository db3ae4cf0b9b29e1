//! Protocol-level constants.
//!
//! Outbound spelling is bug-compatible with the original broker: connection
//! scoped events use the `pusher.` dot form while channel subscription
//! events keep the canonical `pusher_internal:` colon form. Both `pusher:`
//! and `pusher.` are accepted on input.

/// Seconds of idle time the client is told to allow before pinging us.
pub const ACTIVITY_TIMEOUT: u64 = 30;

/// Seconds to wait for a pong after a server-initiated ping.
pub const PONG_TIMEOUT: u64 = 10;

/// Seconds a dispatched handler has to produce a terminal envelope.
pub const HANDLER_TIMEOUT: u64 = 60;

/// Seconds between reads of the shared restart marker.
pub const RESTART_CHECK_INTERVAL: u64 = 10;

/// Upper bound on admission sub-checks that consult async backends.
pub const ADMISSION_BACKEND_TIMEOUT: u64 = 2;

pub const CONNECTION_ESTABLISHED_EVENT: &str = "pusher.connection_established";
pub const PONG_EVENT: &str = "pusher.pong";
pub const ERROR_EVENT: &str = "pusher.error";
pub const SIGNIN_SUCCESS_EVENT: &str = "pusher:signin_success";
pub const SUBSCRIPTION_SUCCEEDED_EVENT: &str = "pusher_internal:subscription_succeeded";
pub const MEMBER_ADDED_EVENT: &str = "pusher_internal:member_added";
pub const MEMBER_REMOVED_EVENT: &str = "pusher_internal:member_removed";

pub const CLIENT_EVENT_PREFIX: &str = "client-";
pub const PRIVATE_CHANNEL_PREFIX: &str = "private-";
pub const PRESENCE_CHANNEL_PREFIX: &str = "presence-";

/// Pre-serialised pong reply for the ping fast path; no allocation, no
/// serde on the hot path.
pub const PRE_SERIALIZED_PONG: &str = r#"{"event":"pusher.pong"}"#;

/// Strips the reserved protocol prefix, accepting both input spellings.
/// Returns `None` for non-protocol events.
pub fn protocol_event_name(event: &str) -> Option<&str> {
    event
        .strip_prefix("pusher:")
        .or_else(|| event.strip_prefix("pusher."))
}

/// Events in the reserved `pusher:`/`pusher.`/`pusher_internal:` namespaces.
pub fn is_reserved_event(event: &str) -> bool {
    protocol_event_name(event).is_some() || event.starts_with("pusher_internal:")
}

pub fn is_client_event(event: &str) -> bool {
    event.starts_with(CLIENT_EVENT_PREFIX)
}
