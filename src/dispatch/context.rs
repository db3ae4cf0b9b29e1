use crate::app::config::App;
use crate::dispatch::envelope::Envelope;
use crate::websocket::{Principal, SocketId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Scoped state of one dispatch.
///
/// Built from a snapshot of the connection at dispatch time; two concurrent
/// dispatches never share a context, so handler mutations to the principal
/// or the per-dispatch locals cannot leak across invocations.
pub struct DispatchContext {
    pub socket_id: SocketId,
    pub app: App,
    pub principal: Option<Principal>,
    /// Channel the triggering event arrived on, if any.
    pub channel: Option<String>,
    /// Full name of the triggering event.
    pub event: String,
    envelopes: mpsc::UnboundedSender<Envelope>,
    terminal_emitted: AtomicBool,
    locals: Mutex<HashMap<String, Value>>,
}

impl DispatchContext {
    pub fn new(
        socket_id: SocketId,
        app: App,
        principal: Option<Principal>,
        channel: Option<String>,
        event: String,
        envelopes: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            socket_id,
            app,
            principal,
            channel,
            event,
            envelopes,
            terminal_emitted: AtomicBool::new(false),
            locals: Mutex::new(HashMap::new()),
        }
    }

    fn emit(&self, envelope: Envelope) {
        if envelope.is_terminal() {
            self.terminal_emitted.store(true, Ordering::SeqCst);
        }
        // A closed receiver means the dispatch was abandoned; the reply is
        // discarded, which is the documented cancellation behaviour.
        let _ = self.envelopes.send(envelope);
    }

    pub fn success(&self, payload: Value) {
        self.emit(Envelope::Success(payload));
    }

    pub fn progress(&self, payload: Value) {
        self.emit(Envelope::Progress(payload));
    }

    pub fn error(&self, payload: Value) {
        self.emit(Envelope::Error(payload));
    }

    pub fn broadcast(&self, payload: Value, channel: Option<String>, including_self: bool) {
        self.emit(Envelope::Broadcast {
            payload,
            channel,
            including_self,
        });
    }

    pub fn whisper(&self, payload: Value, socket_ids: Vec<String>, channel: Option<String>) {
        self.emit(Envelope::Whisper {
            payload,
            socket_ids,
            channel,
        });
    }

    /// Whether a terminal envelope has been produced yet; drives the
    /// dispatch timeout.
    pub fn terminal_emitted(&self) -> bool {
        self.terminal_emitted.load(Ordering::SeqCst)
    }

    /// Per-dispatch scratch value, scoped to this invocation only.
    pub fn set_local(&self, key: &str, value: Value) {
        self.locals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
    }

    pub fn local(&self, key: &str) -> Option<Value> {
        self.locals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}
