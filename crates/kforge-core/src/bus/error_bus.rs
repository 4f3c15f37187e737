//! The error bus: typed error families with factories, and subscription by
//! `(family, kind)`.
//!
//! A dynamic-language error bus keys subscriptions on the error's
//! constructor identity. Rust has no runtime constructor to key on, so
//! this keys on the `(family, kind)` string pair instead - an explicit
//! substitution recorded in DESIGN.md - while still handing listeners a
//! strongly-typed [`KernelError`] value.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde_json::Value;

/// A routed kernel error: every bus-delivered failure (handler throws,
/// middleware throws, adapter throws, buffer overflows) takes this shape
/// before reaching an error bus listener.
#[derive(Clone)]
pub struct KernelError {
    pub family: String,
    pub kind: String,
    pub message: String,
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    pub timestamp: SystemTime,
}

impl KernelError {
    pub fn new(family: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            kind: kind.into(),
            message: message.into(),
            cause: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_cause(mut self, cause: Arc<dyn std::error::Error + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }
}

impl fmt::Debug for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelError")
            .field("family", &self.family)
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}: {}", self.family, self.kind, self.message)
    }
}

/// Contextual metadata attached to a routed error, e.g.
/// `{namespace, eventName, handlerIndex}`.
#[derive(Debug, Clone, Default)]
pub struct ErrorMeta(HashMap<String, Value>);

impl ErrorMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Builds [`KernelError`] values for a fixed family, analogous to the
/// `define_errors(family, { Kind: factory })` pattern.
pub struct ErrorFamilyFactory {
    family: String,
}

impl ErrorFamilyFactory {
    pub fn new(family: impl Into<String>) -> Self {
        Self { family: family.into() }
    }

    pub fn make(&self, kind: impl Into<String>, message: impl Into<String>) -> KernelError {
        KernelError::new(self.family.clone(), kind, message)
    }
}

pub fn define_errors(family: impl Into<String>) -> ErrorFamilyFactory {
    ErrorFamilyFactory::new(family)
}

pub type ErrorListener = Arc<dyn Fn(&KernelError, &ErrorMeta) + Send + Sync>;

/// Dispatches routed errors to listeners subscribed by `(family, kind)`.
/// Emission is synchronous and never re-enters itself: a listener panic
/// is caught and logged rather than propagated or re-routed.
#[derive(Default)]
pub struct ErrorBus {
    listeners: Mutex<HashMap<(String, String), Vec<ErrorListener>>>,
}

impl ErrorBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, family: &str, kind: &str, listener: ErrorListener) {
        self.listeners
            .lock()
            .unwrap()
            .entry((family.to_string(), kind.to_string()))
            .or_default()
            .push(listener);
    }

    pub fn emit(&self, err: KernelError, meta: ErrorMeta) {
        let key = (err.family.clone(), err.kind.clone());
        let listeners = {
            let table = self.listeners.lock().unwrap();
            table.get(&key).cloned()
        };
        match listeners {
            Some(listeners) => {
                for listener in listeners {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        listener(&err, &meta)
                    }));
                    if outcome.is_err() {
                        log::error!(
                            "error bus listener panicked handling {}::{}",
                            err.family,
                            err.kind
                        );
                    }
                }
            }
            None => {
                log::warn!("unhandled kernel error {}::{}: {}", err.family, err.kind, err.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listener_receives_matching_family_and_kind() {
        let bus = ErrorBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.on(
            "events",
            "EventHandlerError",
            Arc::new(move |_err, _meta| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.emit(
            KernelError::new("events", "EventHandlerError", "boom"),
            ErrorMeta::new().with("namespace", "ns"),
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mismatched_kind_does_not_deliver() {
        let bus = ErrorBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.on(
            "events",
            "AdapterError",
            Arc::new(move |_err, _meta| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.emit(KernelError::new("events", "EventHandlerError", "boom"), ErrorMeta::new());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_abort_emission() {
        let bus = ErrorBus::new();
        bus.on("hooks", "HookHandlerError", Arc::new(|_err, _meta| panic!("listener bug")));
        bus.emit(KernelError::new("hooks", "HookHandlerError", "boom"), ErrorMeta::new());
    }

    #[test]
    fn factory_stamps_family_on_every_kind() {
        let factory = define_errors("kernel");
        let err = factory.make("SetupFailed", "plugin blew up");
        assert_eq!(err.family, "kernel");
        assert_eq!(err.kind, "SetupFailed");
    }
}
