mod common;

use async_trait::async_trait;
use beamcast::dispatch::{
    Controller, DispatchContext, DispatchEngine, DispatchOrigin, DispatchTelemetry, HandlerResolver,
    HookFlow, Outcome,
};
use beamcast::error::{Error, Result};
use beamcast::websocket::{Principal, SocketId, WebSocketRef};
use common::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

struct EchoController;

#[async_trait]
impl Controller for EchoController {
    fn requires_authentication(&self) -> bool {
        false
    }

    fn handles_method(&self, method: &str) -> bool {
        method == "send"
    }

    async fn call(&self, _method: &str, _ctx: &DispatchContext, data: Value) -> Result<Outcome> {
        Ok(Outcome::Value(json!({ "echo": data })))
    }
}

struct StagedController;

#[async_trait]
impl Controller for StagedController {
    fn requires_authentication(&self) -> bool {
        false
    }

    fn handles_method(&self, method: &str) -> bool {
        method == "run"
    }

    async fn call(&self, _method: &str, ctx: &DispatchContext, _data: Value) -> Result<Outcome> {
        ctx.progress(json!({ "step": 1 }));
        ctx.progress(json!({ "step": 2 }));
        ctx.success(json!({ "done": true }));
        Ok(Outcome::Handled)
    }
}

struct BroadcastController;

#[async_trait]
impl Controller for BroadcastController {
    fn requires_authentication(&self) -> bool {
        false
    }

    fn handles_method(&self, method: &str) -> bool {
        matches!(method, "all" | "others")
    }

    async fn call(&self, method: &str, ctx: &DispatchContext, data: Value) -> Result<Outcome> {
        ctx.broadcast(data, None, method == "all");
        Ok(Outcome::Handled)
    }
}

struct WhisperController;

#[async_trait]
impl Controller for WhisperController {
    fn requires_authentication(&self) -> bool {
        false
    }

    fn handles_method(&self, method: &str) -> bool {
        method == "tell"
    }

    async fn call(&self, _method: &str, ctx: &DispatchContext, data: Value) -> Result<Outcome> {
        let targets: Vec<String> = data["to"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        ctx.whisper(json!({ "psst": true }), targets, ctx.channel.clone());
        Ok(Outcome::Handled)
    }
}

struct GuardedController;

#[async_trait]
impl Controller for GuardedController {
    fn handles_method(&self, method: &str) -> bool {
        method == "peek"
    }

    async fn call(&self, _method: &str, ctx: &DispatchContext, _data: Value) -> Result<Outcome> {
        let principal = ctx.principal.as_ref().map(|p| p.id.clone());
        Ok(Outcome::Value(json!({ "principal": principal })))
    }
}

struct StoppedController;

#[async_trait]
impl Controller for StoppedController {
    fn requires_authentication(&self) -> bool {
        false
    }

    fn handles_method(&self, method: &str) -> bool {
        method == "run"
    }

    async fn boot(&self, _ctx: &DispatchContext) -> Result<HookFlow> {
        Ok(HookFlow::Stop)
    }

    async fn call(&self, _method: &str, ctx: &DispatchContext, _data: Value) -> Result<Outcome> {
        ctx.success(json!({ "should": "never happen" }));
        Ok(Outcome::Handled)
    }
}

struct FailingController;

#[async_trait]
impl Controller for FailingController {
    fn requires_authentication(&self) -> bool {
        false
    }

    fn handles_method(&self, method: &str) -> bool {
        method == "run"
    }

    async fn call(&self, _method: &str, _ctx: &DispatchContext, _data: Value) -> Result<Outcome> {
        Err(Error::Dispatch("Insufficient funds".to_string()))
    }
}

struct SlowController;

#[async_trait]
impl Controller for SlowController {
    fn requires_authentication(&self) -> bool {
        false
    }

    fn handles_method(&self, method: &str) -> bool {
        method == "run"
    }

    async fn call(&self, _method: &str, _ctx: &DispatchContext, _data: Value) -> Result<Outcome> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(Outcome::Value(json!({ "late": true })))
    }
}

struct ScopedController;

#[async_trait]
impl Controller for ScopedController {
    fn requires_authentication(&self) -> bool {
        false
    }

    fn handles_method(&self, method: &str) -> bool {
        method == "run"
    }

    async fn call(&self, _method: &str, ctx: &DispatchContext, data: Value) -> Result<Outcome> {
        ctx.set_local("token", data);
        // Yield so concurrent dispatches interleave.
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Outcome::Value(json!({ "token": ctx.local("token") })))
    }
}

fn engine_with(
    manager: &SharedConnectionManager,
    controllers: &[(&str, Arc<dyn Controller + Send + Sync>)],
) -> Arc<DispatchEngine> {
    let resolver = Arc::new(HandlerResolver::new());
    for (name, controller) in controllers {
        resolver.register(name, controller.clone());
    }
    Arc::new(DispatchEngine::new(resolver, manager.clone()))
}

fn origin_for(ws: &WebSocketRef, app_id: &str, channel: Option<&str>) -> DispatchOrigin {
    DispatchOrigin {
        socket_id: ws.socket_id.clone(),
        app: test_app(app_id),
        principal: None,
        channel: channel.map(str::to_string),
    }
}

#[tokio::test]
async fn unknown_namespaces_reply_event_could_not_be_associated() {
    let manager = local_connection_manager();
    let engine = engine_with(&manager, &[]);
    let (alice, mut rx) = connect(&manager, "demo").await;

    engine
        .dispatch(
            origin_for(&alice, "demo", None),
            "nothing.here".to_string(),
            Value::Null,
        )
        .await
        .unwrap();

    let frame = next_json(&mut rx).await;
    assert_eq!(frame["event"], "nothing.here:error");
    assert_eq!(frame["data"]["message"], "Event could not be associated");
}

#[tokio::test]
async fn unknown_methods_reply_event_could_not_be_handled() {
    let manager = local_connection_manager();
    let engine = engine_with(&manager, &[("EchoController", Arc::new(EchoController))]);
    let (alice, mut rx) = connect(&manager, "demo").await;

    engine
        .dispatch(
            origin_for(&alice, "demo", None),
            "echo.unknown".to_string(),
            Value::Null,
        )
        .await
        .unwrap();

    let frame = next_json(&mut rx).await;
    assert_eq!(frame["event"], "echo.unknown:error");
    assert_eq!(frame["data"]["message"], "Event could not be handled");
}

#[tokio::test]
async fn plain_return_values_become_a_single_response() {
    let manager = local_connection_manager();
    let engine = engine_with(&manager, &[("EchoController", Arc::new(EchoController))]);
    let (alice, mut rx) = connect(&manager, "demo").await;

    engine
        .dispatch(
            origin_for(&alice, "demo", Some("room")),
            "echo.send".to_string(),
            json!({ "hi": 1 }),
        )
        .await
        .unwrap();

    let frame = next_json(&mut rx).await;
    assert_eq!(frame["event"], "echo.send:response");
    assert_eq!(frame["channel"], "room");
    assert_eq!(frame["data"]["echo"]["hi"], 1);
    assert_no_frame(&mut rx).await;
}

#[tokio::test]
async fn envelopes_arrive_in_production_order() {
    let manager = local_connection_manager();
    let engine = engine_with(&manager, &[("StagedController", Arc::new(StagedController))]);
    let (alice, mut rx) = connect(&manager, "demo").await;

    engine
        .dispatch(
            origin_for(&alice, "demo", None),
            "staged.run".to_string(),
            Value::Null,
        )
        .await
        .unwrap();

    let first = next_json(&mut rx).await;
    assert_eq!(first["event"], "staged.run:progress");
    assert_eq!(first["data"]["step"], 1);
    let second = next_json(&mut rx).await;
    assert_eq!(second["event"], "staged.run:progress");
    assert_eq!(second["data"]["step"], 2);
    let last = next_json(&mut rx).await;
    assert_eq!(last["event"], "staged.run:response");
    // The Handled sentinel suppressed any automatic success.
    assert_no_frame(&mut rx).await;
}

#[tokio::test]
async fn auth_gate_blocks_unauthenticated_dispatches() {
    let manager = local_connection_manager();
    let engine = engine_with(&manager, &[("GuardedController", Arc::new(GuardedController))]);
    let (alice, mut rx) = connect(&manager, "demo").await;

    engine
        .dispatch(
            origin_for(&alice, "demo", None),
            "guarded.peek".to_string(),
            Value::Null,
        )
        .await
        .unwrap();

    let frame = next_json(&mut rx).await;
    assert_eq!(frame["event"], "guarded.peek:error");
    assert_eq!(frame["data"]["message"], "Unauthorized");

    // Same dispatch with a principal succeeds.
    let mut origin = origin_for(&alice, "demo", None);
    origin.principal = Some(Principal {
        id: "u1".into(),
        info: json!({}),
    });
    engine
        .dispatch(origin, "guarded.peek".to_string(), Value::Null)
        .await
        .unwrap();

    let frame = next_json(&mut rx).await;
    assert_eq!(frame["event"], "guarded.peek:response");
    assert_eq!(frame["data"]["principal"], "u1");
}

#[tokio::test]
async fn boot_stop_halts_silently() {
    let manager = local_connection_manager();
    let engine = engine_with(
        &manager,
        &[("StoppedController", Arc::new(StoppedController))],
    );
    let (alice, mut rx) = connect(&manager, "demo").await;

    engine
        .dispatch(
            origin_for(&alice, "demo", None),
            "stopped.run".to_string(),
            Value::Null,
        )
        .await
        .unwrap();

    assert_no_frame(&mut rx).await;
}

#[tokio::test]
async fn handler_errors_become_reported_error_envelopes() {
    mockall::mock! {
        Telemetry {}
        impl DispatchTelemetry for Telemetry {
            fn handler_failed(&self, event: &str, app_id: &str, message: &str);
        }
    }

    let mut telemetry = MockTelemetry::new();
    telemetry
        .expect_handler_failed()
        .withf(|event, app_id, message| {
            event == "failing.run" && app_id == "demo" && message == "Insufficient funds"
        })
        .times(1)
        .return_const(());

    let manager = local_connection_manager();
    let resolver = Arc::new(HandlerResolver::new());
    resolver.register("FailingController", Arc::new(FailingController));
    let engine = Arc::new(
        DispatchEngine::new(resolver, manager.clone()).with_telemetry(Arc::new(telemetry)),
    );
    let (alice, mut rx) = connect(&manager, "demo").await;

    engine
        .dispatch(
            origin_for(&alice, "demo", None),
            "failing.run".to_string(),
            Value::Null,
        )
        .await
        .unwrap();

    let frame = next_json(&mut rx).await;
    assert_eq!(frame["event"], "failing.run:error");
    assert_eq!(frame["data"]["message"], "Insufficient funds");
    assert_eq!(frame["data"]["meta"]["reported"], true);
}

#[tokio::test]
async fn broadcasts_exclude_the_sender_unless_including_self() {
    let manager = local_connection_manager();
    let engine = engine_with(
        &manager,
        &[("BroadcastController", Arc::new(BroadcastController))],
    );
    let (alice, mut alice_rx) = connect(&manager, "demo").await;
    let (bob, mut bob_rx) = connect(&manager, "demo").await;

    for socket in [&alice, &bob] {
        manager
            .lock()
            .await
            .add_to_channel("demo", "room", &socket.socket_id)
            .await
            .unwrap();
    }

    engine
        .dispatch(
            origin_for(&alice, "demo", Some("room")),
            "broadcast.others".to_string(),
            json!({ "n": 1 }),
        )
        .await
        .unwrap();

    assert_eq!(next_json(&mut bob_rx).await["event"], "broadcast.others");
    assert_no_frame(&mut alice_rx).await;

    engine
        .dispatch(
            origin_for(&alice, "demo", Some("room")),
            "broadcast.all".to_string(),
            json!({ "n": 2 }),
        )
        .await
        .unwrap();

    assert_eq!(next_json(&mut bob_rx).await["event"], "broadcast.all");
    assert_eq!(next_json(&mut alice_rx).await["event"], "broadcast.all");
}

#[tokio::test]
async fn whispers_reach_only_the_named_sockets() {
    let manager = local_connection_manager();
    let engine = engine_with(
        &manager,
        &[("WhisperController", Arc::new(WhisperController))],
    );
    let (alice, mut alice_rx) = connect(&manager, "demo").await;
    let (bob, mut bob_rx) = connect(&manager, "demo").await;
    let (carol, mut carol_rx) = connect(&manager, "demo").await;

    engine
        .dispatch(
            origin_for(&alice, "demo", None),
            "whisper.tell".to_string(),
            json!({ "to": [bob.socket_id.as_str(), "999.999"] }),
        )
        .await
        .unwrap();

    let frame = next_json(&mut bob_rx).await;
    assert_eq!(frame["event"], "whisper.tell");
    assert_no_frame(&mut alice_rx).await;
    assert_no_frame(&mut carol_rx).await;
    drop(carol);
}

#[tokio::test]
async fn handlers_without_a_terminal_envelope_time_out() {
    let manager = local_connection_manager();
    let resolver = Arc::new(HandlerResolver::new());
    resolver.register("SlowController", Arc::new(SlowController));
    let engine = Arc::new(
        DispatchEngine::new(resolver, manager.clone())
            .with_handler_timeout(Duration::from_millis(50)),
    );
    let (alice, mut rx) = connect(&manager, "demo").await;

    engine
        .dispatch(
            origin_for(&alice, "demo", None),
            "slow.run".to_string(),
            Value::Null,
        )
        .await
        .unwrap();

    let timeout_frame = next_json(&mut rx).await;
    assert_eq!(timeout_frame["event"], "slow.run:error");
    assert_eq!(timeout_frame["data"]["message"], "slow.run timeout");

    // The late result is still delivered, and no second timeout fires.
    let late = next_json(&mut rx).await;
    assert_eq!(late["event"], "slow.run:response");
    assert_eq!(late["data"]["late"], true);
    assert_no_frame(&mut rx).await;
}

#[tokio::test]
async fn concurrent_dispatches_have_isolated_scoped_state() {
    let manager = local_connection_manager();
    let engine = engine_with(&manager, &[("ScopedController", Arc::new(ScopedController))]);
    let (alice, mut alice_rx) = connect(&manager, "demo").await;
    let (bob, mut bob_rx) = connect(&manager, "demo").await;

    let a = engine.dispatch(
        origin_for(&alice, "demo", None),
        "scoped.run".to_string(),
        json!("alpha"),
    );
    let b = engine.dispatch(
        origin_for(&bob, "demo", None),
        "scoped.run".to_string(),
        json!("beta"),
    );
    let _ = tokio::join!(a, b);

    assert_eq!(next_json(&mut alice_rx).await["data"]["token"], "alpha");
    assert_eq!(next_json(&mut bob_rx).await["data"]["token"], "beta");
}

#[tokio::test]
async fn resolver_supports_folder_split_names_and_caching() {
    let resolver = HandlerResolver::new();
    resolver.register("Deep/NestedController", Arc::new(EchoController));

    assert!(resolver.resolve("deep-nested").is_some());
    assert!(resolver.resolve("deep-nested").is_some());
    assert!(resolver.resolve("missing").is_none());
    assert!(resolver.resolve("missing").is_none(), "negative lookups cache too");

    let stats = resolver.stats();
    assert_eq!(stats.registered, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 2);

    resolver.clear_cache();
    let stats = resolver.stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.cached_entries, 0);

    // Hot-reload mode bypasses the cache entirely.
    resolver.set_caching_enabled(false);
    assert!(resolver.resolve("deep-nested").is_some());
    assert!(resolver.resolve("deep-nested").is_some());
    let stats = resolver.stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn preload_warms_the_cache_for_registered_names() {
    let resolver = HandlerResolver::new();
    resolver.register("ChatMessageController", Arc::new(EchoController));
    resolver.preload();

    assert!(resolver.resolve("chat-message").is_some());
    let stats = resolver.stats();
    assert_eq!(stats.hits, 1, "preload should have primed the entry");
}

#[tokio::test]
async fn replies_to_departed_connections_are_discarded() {
    let manager = local_connection_manager();
    let engine = engine_with(&manager, &[("EchoController", Arc::new(EchoController))]);
    let (alice, rx) = connect(&manager, "demo").await;
    let socket_id: SocketId = alice.socket_id.clone();

    // Remove the connection before the dispatch lands.
    drop(rx);
    manager
        .lock()
        .await
        .remove_connection(&socket_id, "demo")
        .await
        .unwrap();

    // Must complete without panicking; the output is discarded.
    engine
        .dispatch(
            origin_for(&alice, "demo", None),
            "echo.send".to_string(),
            json!({}),
        )
        .await
        .unwrap();
}
