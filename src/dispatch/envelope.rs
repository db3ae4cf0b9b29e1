use serde_json::Value;

/// One structured reply produced by a handler during a dispatch.
///
/// Envelopes from a single invocation reach the originating connection in
/// production order; `Success` and `Error` are terminal for the purpose of
/// the dispatch timeout.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// `<event>:response` to the originating connection.
    Success(Value),
    /// `<event>:progress` to the originating connection; any number may
    /// precede the terminal envelope.
    Progress(Value),
    /// `<event>:error` to the originating connection.
    Error(Value),
    /// Channel broadcast, excluding the sender unless `including_self`.
    /// `channel` falls back to the channel the event arrived on.
    Broadcast {
        payload: Value,
        channel: Option<String>,
        including_self: bool,
    },
    /// Targeted send to the named live sockets.
    Whisper {
        payload: Value,
        socket_ids: Vec<String>,
        channel: Option<String>,
    },
}

impl Envelope {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Envelope::Success(_) | Envelope::Error(_))
    }
}
