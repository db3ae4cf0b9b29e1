use crate::dispatch::context::DispatchContext;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Hook verdict: `Stop` halts the dispatch silently, nothing is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFlow {
    Continue,
    Stop,
}

/// What a handler method hands back to the engine.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A plain value, emitted once as the automatic success envelope.
    Value(Value),
    /// The handler already produced its own envelopes; suppress the
    /// automatic success.
    Handled,
}

/// One event-namespace controller.
///
/// An inbound `foo-bar.send` resolves the controller registered for the
/// `foo-bar` namespace and invokes [`Controller::call`] with method `send`.
/// Replies are emitted through the [`DispatchContext`]; a method that emits
/// its own terminal envelope should return [`Outcome::Handled`].
#[async_trait]
pub trait Controller: Send + Sync {
    /// Whether this controller requires an authenticated principal on the
    /// connection. Defaults to yes.
    fn requires_authentication(&self) -> bool {
        true
    }

    /// Whether `method` is implemented; gates "Event could not be handled".
    fn handles_method(&self, method: &str) -> bool;

    /// Runs before the auth gate.
    async fn boot(&self, _ctx: &DispatchContext) -> Result<HookFlow> {
        Ok(HookFlow::Continue)
    }

    /// Runs after the auth gate, before the method.
    async fn booted(&self, _ctx: &DispatchContext) -> Result<HookFlow> {
        Ok(HookFlow::Continue)
    }

    /// Best-effort cleanup; runs after the method regardless of its result
    /// and can never halt anything.
    async fn unboot(&self, _ctx: &DispatchContext) {}

    async fn call(&self, method: &str, ctx: &DispatchContext, data: Value) -> Result<Outcome>;
}
