//! The event bus: namespaced event definitions with sync/async delivery,
//! startup buffering, and an onion-model middleware chain per namespace.
//!
//! Grounded in the reference event dispatcher's `Arc<Mutex<..>>`-guarded
//! subscriber table and its handler-list dispatch loop, extended with
//! namespaces, a startup-buffer/replay policy, and middleware.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::adapter::BusAdapter;
use crate::bus::error_bus::{define_errors, ErrorBus, ErrorMeta};
use crate::bus::middleware::{run_chain, Middleware, MiddlewareErrorSink, TerminalFn};
use crate::error::{Error, Result};
use crate::plugin::{DeliveryMode, EventDefSpec, StartupPolicy};

/// A subscriber callback. A returned `Err` is treated as the handler
/// throwing; it is caught and routed to the error bus, never propagated
/// to the emitter.
pub type EventHandler = Arc<
    dyn Fn(Value) -> BoxFuture<'static, std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>>
        + Send
        + Sync,
>;

const DEFAULT_BUFFER_CAPACITY: usize = 256;

struct EventDefinition {
    spec: EventDefSpec,
    subscribers: Vec<(u64, EventHandler)>,
    next_id: u64,
    buffer: VecDeque<Value>,
    buffer_capacity: usize,
}

impl EventDefinition {
    fn new(spec: EventDefSpec, buffer_capacity: usize) -> Self {
        Self {
            spec,
            subscribers: Vec::new(),
            next_id: 0,
            buffer: VecDeque::new(),
            buffer_capacity,
        }
    }
}

struct EventBusState {
    active: bool,
    definitions: HashMap<(String, String), EventDefinition>,
    /// Middleware is registered per namespace, not per event: every event
    /// defined under a namespace (present or future) is wrapped by that
    /// namespace's chain, in registration order.
    namespace_middleware: HashMap<String, Vec<Arc<dyn Middleware>>>,
}

pub struct EventBus {
    state: Mutex<EventBusState>,
    error_bus: Arc<ErrorBus>,
    adapters: std::sync::RwLock<Vec<Arc<dyn BusAdapter>>>,
    buffer_capacity: usize,
}

impl EventBus {
    pub fn new(error_bus: Arc<ErrorBus>) -> Self {
        Self::with_buffer_capacity(error_bus, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_buffer_capacity(error_bus: Arc<ErrorBus>, buffer_capacity: usize) -> Self {
        Self {
            state: Mutex::new(EventBusState {
                active: false,
                definitions: HashMap::new(),
                namespace_middleware: HashMap::new(),
            }),
            error_bus,
            adapters: std::sync::RwLock::new(Vec::new()),
            buffer_capacity,
        }
    }

    pub fn register_adapter(&self, adapter: Arc<dyn BusAdapter>) {
        self.adapters.write().unwrap().push(adapter);
    }

    pub async fn define(&self, namespace: &str, name: &str, spec: EventDefSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (namespace.to_string(), name.to_string());
        if state.definitions.contains_key(&key) {
            return Err(Error::EventAlreadyDefined {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        state
            .definitions
            .insert(key, EventDefinition::new(spec, self.buffer_capacity));
        drop(state);
        self.notify_adapters_define(namespace, name);
        Ok(())
    }

    /// Appends `middleware` to the ordered chain for `namespace`. Applies to
    /// every event defined under that namespace, whether already defined or
    /// defined later - there is no requirement that the namespace already
    /// have an event.
    pub async fn add_middleware(&self, namespace: &str, middleware: Arc<dyn Middleware>) {
        let mut state = self.state.lock().await;
        state
            .namespace_middleware
            .entry(namespace.to_string())
            .or_default()
            .push(middleware);
    }

    fn namespace_middleware_locked(state: &EventBusState, namespace: &str) -> Arc<Vec<Arc<dyn Middleware>>> {
        Arc::new(state.namespace_middleware.get(namespace).cloned().unwrap_or_default())
    }

    /// Subscribes `handler` to `(namespace, name)`. If the bus is already
    /// active and the event's startup policy is `Replay`, immediately
    /// replays the retained buffer to this handler alone, in FIFO order.
    pub async fn on(&self, namespace: &str, name: &str, handler: EventHandler) -> Result<u64> {
        let (id, replay_payloads, spec, middleware) = {
            let mut state = self.state.lock().await;
            let active = state.active;
            let middleware = Self::namespace_middleware_locked(&state, namespace);
            let key = (namespace.to_string(), name.to_string());
            let def = state
                .definitions
                .get_mut(&key)
                .ok_or_else(|| Error::UnknownEvent {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })?;
            let id = def.next_id;
            def.next_id += 1;
            def.subscribers.push((id, handler.clone()));
            let replay = if active && def.spec.startup == StartupPolicy::Replay {
                def.buffer.iter().cloned().collect::<Vec<_>>()
            } else {
                Vec::new()
            };
            (id, replay, def.spec.clone(), middleware)
        };
        for payload in replay_payloads {
            self.run_and_deliver(namespace, name, spec.clone(), middleware.clone(), vec![(id, handler.clone())], payload)
                .await;
        }
        Ok(id)
    }

    pub async fn off(&self, namespace: &str, name: &str, id: u64) {
        let mut state = self.state.lock().await;
        let key = (namespace.to_string(), name.to_string());
        if let Some(def) = state.definitions.get_mut(&key) {
            def.subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Emits `payload` to `(namespace, name)`. Before the kernel reaches
    /// `Active`, emissions follow the event's startup policy instead of
    /// immediate delivery. Handler failures never surface here; they are
    /// routed to the error bus.
    pub async fn emit(&self, namespace: &str, name: &str, payload: Value) -> Result<()> {
        let dispatch_job = {
            let mut state = self.state.lock().await;
            let middleware = Self::namespace_middleware_locked(&state, namespace);
            let key = (namespace.to_string(), name.to_string());
            let def = state
                .definitions
                .get_mut(&key)
                .ok_or_else(|| Error::UnknownEvent {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })?;

            if !state.active {
                match def.spec.startup {
                    StartupPolicy::Drop => return Ok(()),
                    StartupPolicy::Buffer | StartupPolicy::Replay => {
                        let mut overflowed = false;
                        if def.buffer.len() >= def.buffer_capacity {
                            def.buffer.pop_front();
                            overflowed = true;
                        }
                        def.buffer.push_back(payload);
                        if overflowed {
                            drop(state);
                            self.error_bus.emit(
                                define_errors("events").make(
                                    "EventBufferOverflow",
                                    format!("startup buffer for '{namespace}.{name}' overflowed, dropped oldest entry"),
                                ),
                                ErrorMeta::new().with("namespace", namespace).with("eventName", name),
                            );
                        }
                        return Ok(());
                    }
                }
            }
            Some((def.spec.clone(), middleware, def.subscribers.clone()))
        };

        self.notify_adapters_emit(namespace, name, &payload);

        if let Some((spec, middleware, subscribers)) = dispatch_job {
            self.run_and_deliver(namespace, name, spec, middleware, subscribers, payload)
                .await;
        }
        Ok(())
    }

    /// Transitions the bus to `Active`, flushing every buffered event
    /// exactly once to the subscribers present at flush time. `Replay`
    /// buffers are retained afterward so later subscribers still see them;
    /// plain `Buffer` buffers are drained.
    pub async fn mark_active(&self) {
        let flush_jobs = {
            let mut state = self.state.lock().await;
            state.active = true;
            let namespace_middleware = state.namespace_middleware.clone();
            let mut jobs = Vec::new();
            for ((namespace, name), def) in state.definitions.iter_mut() {
                if def.buffer.is_empty() {
                    continue;
                }
                let payloads: Vec<Value> = match def.spec.startup {
                    StartupPolicy::Buffer => std::mem::take(&mut def.buffer).into_iter().collect(),
                    StartupPolicy::Replay => def.buffer.iter().cloned().collect(),
                    StartupPolicy::Drop => continue,
                };
                let middleware = Arc::new(namespace_middleware.get(namespace).cloned().unwrap_or_default());
                jobs.push((
                    namespace.clone(),
                    name.clone(),
                    def.spec.clone(),
                    middleware,
                    def.subscribers.clone(),
                    payloads,
                ));
            }
            jobs
        };

        for (namespace, name, spec, middleware, subscribers, payloads) in flush_jobs {
            for payload in payloads {
                self.run_and_deliver(&namespace, &name, spec.clone(), middleware.clone(), subscribers.clone(), payload)
                    .await;
            }
        }
    }

    async fn run_and_deliver(
        &self,
        namespace: &str,
        name: &str,
        spec: EventDefSpec,
        middleware: Arc<Vec<Arc<dyn Middleware>>>,
        subscribers: Vec<(u64, EventHandler)>,
        payload: Value,
    ) {
        let error_bus = self.error_bus.clone();
        let ns = namespace.to_string();
        let ev = name.to_string();
        let terminal: TerminalFn = Arc::new(move |payload: Value| {
            let subscribers = subscribers.clone();
            let error_bus = error_bus.clone();
            let ns = ns.clone();
            let ev = ev.clone();
            let delivery = spec.delivery;
            Box::pin(async move {
                deliver(delivery, &ns, &ev, &subscribers, &error_bus, payload.clone()).await;
                payload
            })
        });

        let mw_error_bus = self.error_bus.clone();
        let mw_ns = namespace.to_string();
        let mw_ev = name.to_string();
        let on_error: MiddlewareErrorSink = Arc::new(move |index, err| {
            route_middleware_error(&mw_error_bus, &mw_ns, &mw_ev, index, err.as_ref());
        });

        run_chain(middleware, payload, terminal, on_error).await;
    }

    fn notify_adapters_define(&self, namespace: &str, name: &str) {
        let adapters = self.adapters.read().unwrap().clone();
        for adapter in adapters {
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| adapter.on_define(namespace, name)));
            if outcome.is_err() {
                self.route_adapter_error(adapter.name(), namespace, name);
            }
        }
    }

    fn notify_adapters_emit(&self, namespace: &str, name: &str, payload: &Value) {
        let adapters = self.adapters.read().unwrap().clone();
        for adapter in adapters {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                adapter.on_emit(namespace, name, payload)
            }));
            if outcome.is_err() {
                self.route_adapter_error(adapter.name(), namespace, name);
            }
        }
    }

    fn route_adapter_error(&self, adapter_name: &str, namespace: &str, name: &str) {
        self.error_bus.emit(
            define_errors("events").make("AdapterError", format!("adapter '{adapter_name}' panicked")),
            ErrorMeta::new().with("namespace", namespace).with("eventName", name),
        );
    }
}

async fn deliver(
    delivery: DeliveryMode,
    namespace: &str,
    name: &str,
    subscribers: &[(u64, EventHandler)],
    error_bus: &Arc<ErrorBus>,
    payload: Value,
) {
    match delivery {
        DeliveryMode::Sync => {
            for (idx, (_, handler)) in subscribers.iter().enumerate() {
                if let Err(e) = handler(payload.clone()).await {
                    route_handler_error(error_bus, namespace, name, idx, e.as_ref());
                }
            }
        }
        DeliveryMode::Async => {
            let futures: Vec<_> = subscribers
                .iter()
                .map(|(_, handler)| handler(payload.clone()))
                .collect();
            let results = futures::future::join_all(futures).await;
            for (idx, result) in results.into_iter().enumerate() {
                if let Err(e) = result {
                    route_handler_error(error_bus, namespace, name, idx, e.as_ref());
                }
            }
        }
    }
}

fn route_handler_error(
    error_bus: &Arc<ErrorBus>,
    namespace: &str,
    name: &str,
    handler_index: usize,
    cause: &(dyn std::error::Error + 'static),
) {
    error_bus.emit(
        define_errors("events").make("EventHandlerError", cause.to_string()),
        ErrorMeta::new()
            .with("namespace", namespace)
            .with("eventName", name)
            .with("handlerIndex", handler_index as i64),
    );
}

fn route_middleware_error(
    error_bus: &Arc<ErrorBus>,
    namespace: &str,
    name: &str,
    middleware_index: usize,
    cause: &(dyn std::error::Error + 'static),
) {
    error_bus.emit(
        define_errors("events").make("MiddlewareError", cause.to_string()),
        ErrorMeta::new()
            .with("namespace", namespace)
            .with("eventName", name)
            .with("middlewareIndex", middleware_index as i64),
    );
}
