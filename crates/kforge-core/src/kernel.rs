//! The kernel facade: builder, lifecycle engine, and the `Kernel`/`ActiveKernel`
//! split that drives a plugin set from registration through teardown.
//!
//! Grounded in the reference `Application`'s initialize/start/shutdown
//! sequence (`kernel::bootstrap`) and the plugin registry's topological
//! `initialize_all`/`shutdown_all` (`plugin_system::registry`): components
//! activate in dependency order and tear down in reverse, continuing past
//! individual teardown failures rather than aborting the sweep.
//!
//! Two of the distilled spec's lifecycle invariants - "`use` after `build`
//! fails with `KernelAlreadyBuilt`" and "`get` before `init` fails with
//! `KernelNotInitialized`" - are enforced here at the type level instead of
//! at runtime: `KernelBuilder::build` and `Kernel::init` each consume
//! `self`, so there is no builder left to call `use_plugin` on and no
//! pre-init `Kernel` left to call `get` on. The corresponding `Error`
//! variants remain in the public error enum for API completeness but are
//! never constructed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::adapter::BusAdapter;
use crate::bus::{ErrorBus, EventBus, HookBus};
use crate::error::{Error, Result};
use crate::options::validate_options;
use crate::plugin::{PluginApi, PluginContext, PluginDescriptor, PluginState};
use crate::registry::{PluginRegistry, PluginRegistryHandle};
use crate::resolver::resolve_order;

/// Tunables for a kernel instance, supplied to [`create_kernel`].
#[derive(Debug, Clone)]
pub struct KernelOptions {
    /// Capacity of each event's startup buffer (`buffer`/`replay` policies).
    pub event_buffer_capacity: usize,
    /// Optional deadline wrapped around every `setup`/`teardown` call. A
    /// plugin that does not complete within the deadline is treated as
    /// failed, the same as a plugin whose future resolves to `Err`.
    pub setup_deadline: Option<Duration>,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            event_buffer_capacity: 256,
            setup_deadline: None,
        }
    }
}

struct PendingPlugin {
    descriptor: PluginDescriptor,
    options_input: Option<Value>,
}

/// Accepts plugin registrations and adapters before producing an inert
/// [`Kernel`]. Construct with [`create_kernel`].
pub struct KernelBuilder {
    options: KernelOptions,
    pending: Vec<PendingPlugin>,
    adapters: Vec<Arc<dyn BusAdapter>>,
}

/// Creates a new builder. `options` defaults to [`KernelOptions::default`]
/// when absent.
pub fn create_kernel(options: Option<KernelOptions>) -> KernelBuilder {
    KernelBuilder {
        options: options.unwrap_or_default(),
        pending: Vec::new(),
        adapters: Vec::new(),
    }
}

impl KernelBuilder {
    /// Registers a plugin descriptor with no caller-supplied options input;
    /// the plugin falls back to its own `optionsSpec.defaultValue`, if any.
    pub fn use_plugin(self, descriptor: PluginDescriptor) -> Self {
        self.use_plugin_with_options(descriptor, None)
    }

    /// Registers a plugin descriptor together with the raw options value
    /// the kernel should validate against its `optionsSpec` during `init`.
    pub fn use_plugin_with_options(mut self, descriptor: PluginDescriptor, options: Option<Value>) -> Self {
        self.pending.push(PendingPlugin {
            descriptor,
            options_input: options,
        });
        self
    }

    /// Registers a bus adapter. Adapters observe event `define`/`emit`
    /// activity across every namespace; see [`BusAdapter`].
    pub fn use_adapter(mut self, adapter: Arc<dyn BusAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Registers every plugin descriptor, failing on the first duplicate
    /// name, and assembles the inert [`Kernel`]. No dependency resolution
    /// or setup happens yet; that is [`Kernel::init`]'s job.
    pub fn build(self) -> Result<Kernel> {
        let mut registry = PluginRegistry::new();
        let mut user_order = HashMap::new();
        let mut options_input = HashMap::new();
        let mut descriptors = Vec::with_capacity(self.pending.len());

        for (index, pending) in self.pending.into_iter().enumerate() {
            let name = pending.descriptor.name.clone();
            // Earlier registration ranks higher: registration order is the
            // caller's most direct expression of a priority hint short of
            // an explicit `priority` field, so it breaks resolver ties
            // before falling back to name order. See DESIGN.md.
            user_order.insert(name.clone(), -(index as i64));
            options_input.insert(name.clone(), pending.options_input);
            descriptors.push(pending.descriptor.clone());
            registry.register(pending.descriptor)?;
        }

        let error_bus = Arc::new(ErrorBus::new());
        let events = Arc::new(EventBus::with_buffer_capacity(
            error_bus.clone(),
            self.options.event_buffer_capacity,
        ));
        let hooks = Arc::new(HookBus::new(error_bus.clone()));
        for adapter in &self.adapters {
            events.register_adapter(adapter.clone());
        }

        Ok(Kernel {
            registry: PluginRegistryHandle::from_registry(registry),
            descriptors,
            user_order,
            options_input,
            events,
            hooks,
            errors: error_bus,
            setup_deadline: self.options.setup_deadline,
        })
    }
}

/// A built but not-yet-initialized kernel. Call [`Kernel::init`] to resolve
/// activation order, run every plugin's `setup`, and obtain an
/// [`ActiveKernel`].
pub struct Kernel {
    registry: PluginRegistryHandle,
    descriptors: Vec<PluginDescriptor>,
    user_order: HashMap<String, i64>,
    options_input: HashMap<String, Option<Value>>,
    events: Arc<EventBus>,
    hooks: Arc<HookBus>,
    errors: Arc<ErrorBus>,
    setup_deadline: Option<Duration>,
}

impl Kernel {
    /// Drives every registered plugin through options validation,
    /// event/hook definition, and setup, in resolved activation order.
    ///
    /// A failure during resolution, options validation, or event/hook
    /// definition aborts immediately (nothing has activated yet, so there
    /// is nothing to roll back). A `setup` failure marks the offending
    /// plugin `Failed`, tears down every previously-activated plugin in
    /// reverse order, and returns [`Error::InitAborted`] preserving the
    /// root cause and any rollback failures.
    pub async fn init(self) -> Result<ActiveKernel> {
        let order = resolve_order(&self.descriptors, &self.user_order)?;
        let by_name: HashMap<&str, &PluginDescriptor> =
            self.descriptors.iter().map(|d| (d.name.as_str(), d)).collect();

        {
            let mut guard = self.registry.lock().await;
            for name in &order {
                guard.set_state(name, PluginState::Resolved);
            }
        }

        // Options phase.
        let mut resolved_options: HashMap<String, Option<Value>> = HashMap::new();
        for name in &order {
            let descriptor = by_name[name.as_str()];
            let input = self.options_input.get(name).cloned().flatten();
            let validated = validate_options(name, descriptor.options_spec.as_ref(), input)?;
            resolved_options.insert(name.clone(), validated);
        }
        {
            let mut guard = self.registry.lock().await;
            for (name, opts) in &resolved_options {
                guard.set_resolved_options(name, opts.clone());
            }
        }

        // Definition phase: events are namespaced under the declaring
        // plugin's own name; hooks are keyed `pluginName.hookName`.
        for name in &order {
            let descriptor = by_name[name.as_str()];
            for (event_name, spec) in &descriptor.events {
                self.events.define(name, event_name, spec.clone()).await?;
            }
            for hook_name in &descriptor.hooks {
                self.hooks.define(&format!("{name}.{hook_name}")).await?;
            }
        }

        // Setup phase.
        let mut activated: Vec<String> = Vec::new();
        for (index, name) in order.iter().enumerate() {
            let descriptor = by_name[name.as_str()].clone();
            log::info!("setting up plugin '{name}'");
            {
                let mut guard = self.registry.lock().await;
                guard.set_state(name, PluginState::SettingUp);
            }

            let ctx = PluginContext {
                events: self.events.clone(),
                hooks: self.hooks.clone(),
                errors: self.errors.clone(),
                registry: self.registry.clone(),
            };
            let options = resolved_options.get(name).cloned().flatten();
            let setup_fut = (descriptor.setup)(ctx, options);
            let outcome = match self.setup_deadline {
                Some(deadline) => match tokio::time::timeout(deadline, setup_fut).await {
                    Ok(result) => result,
                    Err(_) => Err(crate::plugin::PluginSetupError::new(format!(
                        "setup for '{name}' exceeded its deadline"
                    ))),
                },
                None => setup_fut.await,
            };

            match outcome {
                Ok(api) => {
                    let mut guard = self.registry.lock().await;
                    guard.bind_api(name, api);
                    guard.set_activation_index(name, index);
                    activated.push(name.clone());
                }
                Err(setup_err) => {
                    log::error!("setup failed for plugin '{name}': {setup_err}");
                    {
                        let mut guard = self.registry.lock().await;
                        guard.set_state(name, PluginState::Failed);
                    }
                    let root_cause = Error::SetupFailed {
                        plugin: name.clone(),
                        source: setup_err,
                    };
                    let rollback_errors =
                        rollback(&self.events, &self.hooks, &self.errors, &self.registry, &activated, &by_name).await;
                    return Err(Error::InitAborted {
                        root_cause: Box::new(root_cause),
                        rollback_errors,
                    });
                }
            }
        }

        // Run phase: startup buffers flush to whoever is already subscribed.
        self.events.mark_active().await;
        log::info!("kernel active with {} plugin(s)", order.len());

        Ok(ActiveKernel {
            registry: self.registry,
            events: self.events,
            hooks: self.hooks,
            errors: self.errors,
        })
    }
}

/// Tears down `activated` plugins in reverse order, continuing past
/// individual teardown failures, the same collect-and-continue discipline
/// as `ActiveKernel::stop`.
async fn rollback(
    events: &Arc<EventBus>,
    hooks: &Arc<HookBus>,
    errors: &Arc<ErrorBus>,
    registry: &PluginRegistryHandle,
    activated: &[String],
    by_name: &HashMap<&str, &PluginDescriptor>,
) -> Vec<Error> {
    let mut failures = Vec::new();
    for name in activated.iter().rev() {
        let descriptor = by_name[name.as_str()];
        if let Some(teardown) = &descriptor.teardown {
            let ctx = PluginContext {
                events: events.clone(),
                hooks: hooks.clone(),
                errors: errors.clone(),
                registry: registry.clone(),
            };
            if let Err(e) = teardown(ctx).await {
                log::error!("rollback teardown failed for plugin '{name}': {e}");
                failures.push(Error::TeardownFailed {
                    plugin: name.clone(),
                    source: e,
                });
            }
        }
        let mut guard = registry.lock().await;
        guard.unbind(name);
        guard.set_state(name, PluginState::Stopped);
    }
    failures
}

/// A kernel whose plugins have all reached `Active`. APIs are reachable
/// through [`ActiveKernel::get`]; the three buses are live.
pub struct ActiveKernel {
    registry: PluginRegistryHandle,
    events: Arc<EventBus>,
    hooks: Arc<HookBus>,
    errors: Arc<ErrorBus>,
}

impl ActiveKernel {
    /// Looks up an `Active` plugin's API by name.
    pub async fn get(&self, name: &str) -> Result<PluginApi> {
        self.registry.get(name).await
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn hooks(&self) -> &HookBus {
        &self.hooks
    }

    pub fn errors(&self) -> &ErrorBus {
        &self.errors
    }

    /// Tears down every `Active` plugin in reverse activation order.
    /// Continues past individual teardown failures rather than aborting
    /// the sweep; if any occurred, returns them bundled as
    /// [`Error::AggregateTeardown`] rather than only the first.
    pub async fn stop(self) -> Result<()> {
        let names = { self.registry.lock().await.active_in_reverse_activation_order() };
        let mut failures = Vec::new();

        for name in names {
            {
                let mut guard = self.registry.lock().await;
                guard.set_state(&name, PluginState::Stopping);
            }
            let descriptor = { self.registry.lock().await.descriptor(&name).cloned() };

            let mut teardown_failed = false;
            if let Some(descriptor) = descriptor {
                if let Some(teardown) = &descriptor.teardown {
                    let ctx = PluginContext {
                        events: self.events.clone(),
                        hooks: self.hooks.clone(),
                        errors: self.errors.clone(),
                        registry: self.registry.clone(),
                    };
                    if let Err(e) = teardown(ctx).await {
                        log::error!("teardown failed for plugin '{name}': {e}");
                        failures.push(Error::TeardownFailed {
                            plugin: name.clone(),
                            source: e,
                        });
                        teardown_failed = true;
                    }
                }
            }

            let mut guard = self.registry.lock().await;
            guard.unbind(&name);
            guard.set_state(&name, if teardown_failed { PluginState::Failed } else { PluginState::Stopped });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::AggregateTeardown(failures))
        }
    }
}
