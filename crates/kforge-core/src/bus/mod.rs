//! The event/hook/error bus triad.
//!
//! Three related broadcast mechanisms, each with its own subscription and
//! delivery model but sharing the same exception-routing contract: a
//! handler, middleware, or adapter throw never propagates to the caller
//! of `emit` - it is routed onward as a [`error_bus::KernelError`] on the
//! error bus.
pub mod error_bus;
pub mod event;
pub mod hook;
pub mod middleware;

pub use error_bus::{ErrorBus, ErrorMeta, KernelError};
pub use event::EventBus;
pub use hook::HookBus;
pub use middleware::Middleware;
