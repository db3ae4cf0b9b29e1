use crate::adapter::ConnectionManager;
use crate::app::config::App;
use crate::dispatch::context::DispatchContext;
use crate::dispatch::controller::{Controller, HookFlow, Outcome};
use crate::dispatch::envelope::Envelope;
use crate::dispatch::resolver::HandlerResolver;
use crate::protocol::constants::HANDLER_TIMEOUT;
use crate::protocol::messages::{MessageData, PusherMessage};
use crate::websocket::{Principal, SocketId};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Sink for handler failures; wired to whatever error reporting the
/// deployment uses.
pub trait DispatchTelemetry: Send + Sync {
    fn handler_failed(&self, event: &str, app_id: &str, message: &str);
}

/// Snapshot of the originating connection, taken when the dispatch is
/// scheduled. Handlers only ever see this snapshot, never the live
/// connection state.
#[derive(Debug, Clone)]
pub struct DispatchOrigin {
    pub socket_id: SocketId,
    pub app: App,
    pub principal: Option<Principal>,
    pub channel: Option<String>,
}

/// Routes non-protocol events to controllers and merges their reply
/// envelopes back into the connection streams.
///
/// Each dispatch runs in its own task; the caller returns as soon as the
/// task is spawned. Envelopes are consumed by a per-dispatch merger loop,
/// which preserves the order the handler produced them in.
pub struct DispatchEngine {
    resolver: Arc<HandlerResolver>,
    connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
    handler_timeout: Duration,
    telemetry: Option<Arc<dyn DispatchTelemetry>>,
}

impl DispatchEngine {
    pub fn new(
        resolver: Arc<HandlerResolver>,
        connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
    ) -> Self {
        Self {
            resolver,
            connection_manager,
            handler_timeout: Duration::from_secs(HANDLER_TIMEOUT),
            telemetry: None,
        }
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn DispatchTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn resolver(&self) -> &Arc<HandlerResolver> {
        &self.resolver
    }

    /// Schedules a dispatch and returns immediately; replies arrive
    /// asynchronously on the origin connection.
    pub fn dispatch(
        self: &Arc<Self>,
        origin: DispatchOrigin,
        event: String,
        data: Value,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(origin, event, data).await })
    }

    async fn run(self: Arc<Self>, origin: DispatchOrigin, event: String, data: Value) {
        let (prefix, method) = split_event(&event);

        let Some(controller) = self.resolver.resolve(prefix) else {
            self.reply_error(
                &origin,
                &event,
                json!({ "message": "Event could not be associated" }),
            )
            .await;
            return;
        };

        if !controller.handles_method(method) {
            self.reply_error(
                &origin,
                &event,
                json!({ "message": "Event could not be handled" }),
            )
            .await;
            return;
        }

        let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();
        let ctx = DispatchContext::new(
            origin.socket_id.clone(),
            origin.app.clone(),
            origin.principal.clone(),
            origin.channel.clone(),
            event.clone(),
            envelope_tx,
        );

        let merger = tokio::spawn(Self::merge_envelopes(
            self.connection_manager.clone(),
            envelope_rx,
            origin.clone(),
            event.clone(),
        ));

        let ran_to_method = self
            .run_gated(&controller, &ctx, &origin, &event, method, data)
            .await;

        if ran_to_method {
            controller.unboot(&ctx).await;
        }

        // Closing the context ends the envelope stream; the merger drains
        // what is left before finishing.
        drop(ctx);
        if let Err(e) = merger.await {
            debug!("Envelope merger for `{}` ended abnormally: {}", event, e);
        }
    }

    /// Hooks, auth gate and the method itself. Returns whether execution
    /// reached the method (and `unboot` is therefore due).
    async fn run_gated(
        &self,
        controller: &Arc<dyn Controller + Send + Sync>,
        ctx: &DispatchContext,
        origin: &DispatchOrigin,
        event: &str,
        method: &str,
        data: Value,
    ) -> bool {
        match controller.boot(ctx).await {
            Ok(HookFlow::Continue) => {}
            Ok(HookFlow::Stop) => return false,
            Err(e) => {
                self.emit_handler_failure(ctx, origin, event, &e);
                return false;
            }
        }

        if controller.requires_authentication() && ctx.principal.is_none() {
            ctx.error(json!({ "message": "Unauthorized" }));
            return false;
        }

        match controller.booted(ctx).await {
            Ok(HookFlow::Continue) => {}
            Ok(HookFlow::Stop) => return false,
            Err(e) => {
                self.emit_handler_failure(ctx, origin, event, &e);
                return false;
            }
        }

        let mut call = controller.call(method, ctx, data);
        let finished = tokio::select! {
            result = &mut call => Some(result),
            _ = sleep(self.handler_timeout) => None,
        };
        let result = match finished {
            Some(result) => result,
            None => {
                if !ctx.terminal_emitted() {
                    warn!(
                        "Handler for `{}` produced no terminal envelope within {:?}",
                        event, self.handler_timeout
                    );
                    ctx.error(json!({ "message": format!("{event} timeout") }));
                }
                // The handler keeps running; late envelopes are still
                // delivered but no second timeout can fire.
                call.await
            }
        };

        match result {
            Ok(Outcome::Value(value)) => ctx.success(value),
            Ok(Outcome::Handled) => {}
            Err(e) => self.emit_handler_failure(ctx, origin, event, &e),
        }

        true
    }

    fn emit_handler_failure(
        &self,
        ctx: &DispatchContext,
        origin: &DispatchOrigin,
        event: &str,
        error: &crate::error::Error,
    ) {
        let message = error.client_message();
        ctx.error(json!({
            "message": message,
            "meta": { "reported": true },
        }));
        if let Some(telemetry) = &self.telemetry {
            telemetry.handler_failed(event, &origin.app.id, &message);
        }
    }

    /// Delivers envelopes in production order. Unicast envelopes go to the
    /// originating connection, broadcast/whisper envelopes fan out through
    /// the connection manager.
    async fn merge_envelopes(
        connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
        mut envelopes: mpsc::UnboundedReceiver<Envelope>,
        origin: DispatchOrigin,
        event: String,
    ) {
        while let Some(envelope) = envelopes.recv().await {
            match envelope {
                Envelope::Success(payload) => {
                    let message =
                        PusherMessage::event_response(&event, origin.channel.clone(), payload);
                    Self::send_to_origin(&connection_manager, &origin, message).await;
                }
                Envelope::Progress(payload) => {
                    let message =
                        PusherMessage::event_progress(&event, origin.channel.clone(), payload);
                    Self::send_to_origin(&connection_manager, &origin, message).await;
                }
                Envelope::Error(payload) => {
                    let message =
                        PusherMessage::event_error(&event, origin.channel.clone(), payload);
                    Self::send_to_origin(&connection_manager, &origin, message).await;
                }
                Envelope::Broadcast {
                    payload,
                    channel,
                    including_self,
                } => {
                    let Some(target) = channel.or_else(|| origin.channel.clone()) else {
                        warn!("Broadcast envelope for `{}` has no channel; dropped", event);
                        continue;
                    };
                    let message = PusherMessage::channel_event(&event, &target, payload);
                    let except = (!including_self).then_some(&origin.socket_id);
                    let mut manager = connection_manager.lock().await;
                    if let Err(e) = manager.send(&target, message, except, &origin.app.id).await {
                        warn!("Broadcast envelope for `{}` failed: {}", event, e);
                    }
                }
                Envelope::Whisper {
                    payload,
                    socket_ids,
                    channel,
                } => {
                    let message = PusherMessage {
                        event: Some(event.clone()),
                        channel,
                        data: Some(MessageData::String(payload.to_string())),
                        ..Default::default()
                    };
                    for socket_id in socket_ids {
                        let mut manager = connection_manager.lock().await;
                        if let Err(e) = manager
                            .send_message(&origin.app.id, &SocketId(socket_id), message.clone())
                            .await
                        {
                            // Whispers to departed sockets are dropped.
                            debug!("Whisper for `{}` skipped: {}", event, e);
                        }
                    }
                }
            }
        }
    }

    async fn send_to_origin(
        connection_manager: &Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
        origin: &DispatchOrigin,
        message: PusherMessage,
    ) {
        let mut manager = connection_manager.lock().await;
        if let Err(e) = manager
            .send_message(&origin.app.id, &origin.socket_id, message)
            .await
        {
            // The origin closed mid-dispatch; its replies are discarded.
            debug!("Reply to {} discarded: {}", origin.socket_id, e);
        }
    }

    async fn reply_error(&self, origin: &DispatchOrigin, event: &str, payload: Value) {
        let message = PusherMessage::event_error(event, origin.channel.clone(), payload);
        Self::send_to_origin(&self.connection_manager, origin, message).await;
    }
}

/// `foo-bar.method.extra` splits into (`foo-bar`, `method.extra`).
fn split_event(event: &str) -> (&str, &str) {
    match event.split_once('.') {
        Some((prefix, method)) => (prefix, method),
        None => (event, ""),
    }
}
