//! Plugin registry and API store.
//!
//! Reinterprets the reference kernel's `TypeId`-keyed component registry
//! (one concrete Rust type per slot) as a `String`-name-keyed store, since
//! plugin identity here is an author-chosen name rather than a Rust type.
//! Holds exactly one instance per name and only exposes an API while that
//! instance's state is `Active`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::plugin::{PluginApi, PluginDescriptor, PluginState};

struct PluginRecord {
    descriptor: PluginDescriptor,
    state: PluginState,
    api: Option<PluginApi>,
    resolved_options: Option<serde_json::Value>,
    activation_index: Option<usize>,
}

/// Owns every registered plugin instance and its bound API. Not `Clone`;
/// share it behind [`PluginRegistryHandle`].
#[derive(Default)]
pub struct PluginRegistry {
    records: HashMap<String, PluginRecord>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<()> {
        if self.records.contains_key(&descriptor.name) {
            return Err(Error::DuplicatePlugin(descriptor.name.clone()));
        }
        let name = descriptor.name.clone();
        self.records.insert(
            name,
            PluginRecord {
                descriptor,
                state: PluginState::Registered,
                api: None,
                resolved_options: None,
                activation_index: None,
            },
        );
        Ok(())
    }

    pub fn descriptor(&self, name: &str) -> Option<&PluginDescriptor> {
        self.records.get(name).map(|r| &r.descriptor)
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.records.get(name).map(|r| r.state)
    }

    pub fn set_state(&mut self, name: &str, state: PluginState) {
        if let Some(record) = self.records.get_mut(name) {
            record.state = state;
        }
    }

    pub fn set_resolved_options(&mut self, name: &str, options: Option<serde_json::Value>) {
        if let Some(record) = self.records.get_mut(name) {
            record.resolved_options = options;
        }
    }

    pub fn resolved_options(&self, name: &str) -> Option<serde_json::Value> {
        self.records.get(name).and_then(|r| r.resolved_options.clone())
    }

    pub fn set_activation_index(&mut self, name: &str, index: usize) {
        if let Some(record) = self.records.get_mut(name) {
            record.activation_index = Some(index);
        }
    }

    /// Binds the API returned by a plugin's `setup` and marks it `Active`.
    pub fn bind_api(&mut self, name: &str, api: PluginApi) {
        if let Some(record) = self.records.get_mut(name) {
            record.api = Some(api);
            record.state = PluginState::Active;
        }
    }

    /// Clears a plugin's bound API, making lookups fail until/unless it is
    /// rebound. Called when a plugin transitions out of `Active`.
    pub fn unbind(&mut self, name: &str) {
        if let Some(record) = self.records.get_mut(name) {
            record.api = None;
        }
    }

    pub fn get(&self, name: &str) -> Result<PluginApi> {
        let record = self
            .records
            .get(name)
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))?;
        match (&record.state, &record.api) {
            (PluginState::Active, Some(api)) => Ok(api.clone()),
            _ => Err(Error::PluginNotActive(name.to_string())),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Names currently `Active`, most-recently-activated first — the order
    /// the lifecycle engine tears down in.
    pub fn active_in_reverse_activation_order(&self) -> Vec<String> {
        let mut active: Vec<(usize, &str)> = self
            .records
            .values()
            .filter(|r| r.state == PluginState::Active)
            .filter_map(|r| r.activation_index.map(|idx| (idx, r.descriptor.name.as_str())))
            .collect();
        active.sort_by(|a, b| b.0.cmp(&a.0));
        active.into_iter().map(|(_, name)| name.to_string()).collect()
    }
}

/// Shared, lock-guarded handle to a [`PluginRegistry`], the form
/// [`crate::plugin::PluginContext`] and the lifecycle engine hold so
/// multiple async call sites can read/mutate registry state without
/// racing, mirroring the reference event dispatcher's `Arc<Mutex<..>>`
/// sharing pattern.
#[derive(Clone)]
pub struct PluginRegistryHandle(Arc<Mutex<PluginRegistry>>);

impl PluginRegistryHandle {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(PluginRegistry::new())))
    }

    /// Wraps an already-populated registry. Used by `KernelBuilder::build`,
    /// which registers plugins synchronously (no contention yet) before
    /// handing the registry to the async lifecycle engine.
    pub fn from_registry(registry: PluginRegistry) -> Self {
        Self(Arc::new(Mutex::new(registry)))
    }

    pub async fn get(&self, name: &str) -> Result<PluginApi> {
        self.0.lock().await.get(name)
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, PluginRegistry> {
        self.0.lock().await
    }
}

impl Default for PluginRegistryHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::parse_version;

    fn plugin(name: &str) -> PluginDescriptor {
        PluginDescriptor::builder(name, parse_version("1.0.0").unwrap())
            .setup(|_ctx, _opts| async { Ok(PluginApi::new(42i32)) })
            .build()
            .unwrap()
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("A")).unwrap();
        let err = registry.register(plugin("A")).unwrap_err();
        assert!(matches!(err, Error::DuplicatePlugin(name) if name == "A"));
    }

    #[test]
    fn api_only_visible_while_active() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("A")).unwrap();
        assert!(matches!(registry.get("A"), Err(Error::PluginNotActive(_))));

        registry.bind_api("A", PluginApi::new(42i32));
        let api = registry.get("A").unwrap();
        assert_eq!(*api.downcast::<i32>().unwrap(), 42);

        registry.set_state("A", PluginState::Stopped);
        registry.unbind("A");
        assert!(matches!(registry.get("A"), Err(Error::PluginNotActive(_))));
    }

    #[test]
    fn unknown_plugin_is_not_found() {
        let registry = PluginRegistry::new();
        assert!(matches!(registry.get("missing"), Err(Error::PluginNotFound(_))));
    }

    #[test]
    fn reverse_activation_order_is_most_recent_first() {
        let mut registry = PluginRegistry::new();
        for name in ["A", "B", "C"] {
            registry.register(plugin(name)).unwrap();
        }
        for (idx, name) in ["A", "B", "C"].iter().enumerate() {
            registry.set_activation_index(name, idx);
            registry.bind_api(name, PluginApi::new(()));
        }
        assert_eq!(registry.active_in_reverse_activation_order(), vec!["C", "B", "A"]);
    }
}
