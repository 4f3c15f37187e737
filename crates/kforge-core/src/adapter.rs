//! Adapter interface for bridging the event bus to external reactive
//! libraries. Only the interface is specified here; concrete bindings to
//! any particular third-party library are an integration concern outside
//! this crate.

/// A pure observer of event bus activity. Adapters must not block or
/// otherwise participate in delivery; a panic inside an adapter callback
/// is caught and routed to the error bus as `AdapterError` rather than
/// propagating to the emitter.
pub trait BusAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn on_define(&self, _namespace: &str, _event_name: &str) {}

    fn on_emit(&self, _namespace: &str, _event_name: &str, _payload: &serde_json::Value) {}
}
