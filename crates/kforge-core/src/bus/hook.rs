//! The hook bus: named hook points identified by `pluginName.hookName`,
//! with ordered subscribers, `once` semantics, and exception routing to
//! the error bus.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::bus::error_bus::{define_errors, ErrorBus, ErrorMeta};
use crate::error::{Error, Result};

pub type HookHandler = Arc<
    dyn Fn(Value) -> BoxFuture<'static, std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>>
        + Send
        + Sync,
>;

struct Subscriber {
    id: u64,
    handler: HookHandler,
    once: bool,
}

struct HookDefinition {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

pub struct HookBus {
    definitions: Mutex<HashMap<String, HookDefinition>>,
    error_bus: Arc<ErrorBus>,
}

impl HookBus {
    pub fn new(error_bus: Arc<ErrorBus>) -> Self {
        Self {
            definitions: Mutex::new(HashMap::new()),
            error_bus,
        }
    }

    pub async fn define(&self, full_name: &str) -> Result<()> {
        let mut definitions = self.definitions.lock().await;
        if definitions.contains_key(full_name) {
            return Err(Error::HookAlreadyDefined(full_name.to_string()));
        }
        definitions.insert(
            full_name.to_string(),
            HookDefinition {
                subscribers: Vec::new(),
                next_id: 0,
            },
        );
        Ok(())
    }

    pub async fn exists(&self, full_name: &str) -> bool {
        self.definitions.lock().await.contains_key(full_name)
    }

    pub async fn on(&self, full_name: &str, handler: HookHandler) -> Result<u64> {
        self.subscribe(full_name, handler, false).await
    }

    pub async fn once(&self, full_name: &str, handler: HookHandler) -> Result<u64> {
        self.subscribe(full_name, handler, true).await
    }

    async fn subscribe(&self, full_name: &str, handler: HookHandler, once: bool) -> Result<u64> {
        let mut definitions = self.definitions.lock().await;
        let def = definitions
            .get_mut(full_name)
            .ok_or_else(|| Error::UnknownHook(full_name.to_string()))?;
        let id = def.next_id;
        def.next_id += 1;
        def.subscribers.push(Subscriber { id, handler, once });
        Ok(id)
    }

    pub async fn off(&self, full_name: &str, id: u64) {
        let mut definitions = self.definitions.lock().await;
        if let Some(def) = definitions.get_mut(full_name) {
            def.subscribers.retain(|s| s.id != id);
        }
    }

    /// Runs every subscriber in order, awaiting each before moving to the
    /// next. A handler throw does not halt the sequence; it is routed to
    /// the error bus as `HookHandlerError` and processing continues.
    /// `once` subscribers are removed after this invocation regardless of
    /// outcome.
    pub async fn emit(&self, full_name: &str, payload: Value) -> Result<()> {
        let subscribers = {
            let mut definitions = self.definitions.lock().await;
            let def = definitions
                .get_mut(full_name)
                .ok_or_else(|| Error::UnknownHook(full_name.to_string()))?;
            let snapshot: Vec<(u64, HookHandler, bool)> = def
                .subscribers
                .iter()
                .map(|s| (s.id, s.handler.clone(), s.once))
                .collect();
            def.subscribers.retain(|s| !s.once);
            snapshot
        };

        for (idx, (_id, handler, _once)) in subscribers.into_iter().enumerate() {
            if let Err(e) = handler(payload.clone()).await {
                self.error_bus.emit(
                    define_errors("hooks").make("HookHandlerError", e.to_string()),
                    ErrorMeta::new()
                        .with("eventName", full_name)
                        .with("handlerIndex", idx as i64),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn redefining_a_hook_fails() {
        let bus = HookBus::new(Arc::new(ErrorBus::new()));
        bus.define("p.boom").await.unwrap();
        assert!(matches!(bus.define("p.boom").await, Err(Error::HookAlreadyDefined(_))));
    }

    #[tokio::test]
    async fn emitting_undefined_hook_fails() {
        let bus = HookBus::new(Arc::new(ErrorBus::new()));
        assert!(matches!(bus.emit("missing", Value::Null).await, Err(Error::UnknownHook(_))));
    }

    #[tokio::test]
    async fn once_handler_fires_exactly_once() {
        let bus = HookBus::new(Arc::new(ErrorBus::new()));
        bus.define("p.boom").await.unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.once(
            "p.boom",
            Arc::new(move |_payload| {
                let count = count_clone.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .await
        .unwrap();
        bus.emit("p.boom", Value::Null).await.unwrap();
        bus.emit("p.boom", Value::Null).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_exception_is_routed_with_metadata_and_does_not_halt_others() {
        let error_bus = Arc::new(ErrorBus::new());
        let routed = Arc::new(StdMutex::new(Vec::new()));
        let routed_clone = routed.clone();
        error_bus.on(
            "hooks",
            "HookHandlerError",
            Arc::new(move |_err, meta| {
                routed_clone
                    .lock()
                    .unwrap()
                    .push(meta.get("eventName").and_then(|v| v.as_str()).unwrap().to_string());
            }),
        );
        let bus = HookBus::new(error_bus);
        bus.define("p.boom").await.unwrap();

        let second_ran = Arc::new(AtomicUsize::new(0));
        let second_ran_clone = second_ran.clone();
        bus.on("p.boom", Arc::new(|_payload| Box::pin(async move { Err("kaboom".into()) })))
            .await
            .unwrap();
        bus.on(
            "p.boom",
            Arc::new(move |_payload| {
                let second_ran = second_ran_clone.clone();
                Box::pin(async move {
                    second_ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .await
        .unwrap();

        bus.emit("p.boom", Value::Null).await.unwrap();

        assert_eq!(routed.lock().unwrap().clone(), vec!["p.boom".to_string()]);
        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
    }
}
