pub mod context;
pub mod controller;
pub mod engine;
pub mod envelope;
pub mod resolver;

pub use context::DispatchContext;
pub use controller::{Controller, HookFlow, Outcome};
pub use engine::{DispatchEngine, DispatchOrigin, DispatchTelemetry};
pub use envelope::Envelope;
pub use resolver::{HandlerResolver, ResolverStats};
