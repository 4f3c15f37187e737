//! Plugin descriptor types: the immutable declaration an author hands to
//! the kernel builder, plus the runtime values (`PluginApi`, `PluginContext`,
//! `PluginState`) that come into existence once the kernel drives a plugin
//! through its lifecycle.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::bus::error_bus::ErrorBus;
use crate::bus::event::EventBus;
use crate::bus::hook::HookBus;
use crate::error::{Error as KernelError, Result};
use crate::options::OptionsSpec;
use crate::registry::PluginRegistryHandle;
use crate::version::{Version, VersionConstraint};

/// An error raised by plugin-authored code (`setup`/`teardown`). Distinct
/// from the crate's own [`KernelError`] so plugin authors are not forced to
/// depend on kernel-internal error variants.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PluginSetupError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PluginSetupError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// An opaque handle to whatever value a plugin's `setup` returned. Callers
/// retrieve it through [`crate::kernel::ActiveKernel::get`] and downcast to
/// the concrete type the plugin documents.
#[derive(Clone)]
pub struct PluginApi(Arc<dyn Any + Send + Sync>);

impl PluginApi {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        PluginApi(Arc::new(value))
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginApi(..)")
    }
}

/// Handed to `setup`/`teardown`. Deliberately thin: the minimal facade a
/// plugin needs (the three buses, and lookup of other plugins' APIs by
/// name) rather than a reference to the whole kernel, so plugin instances
/// never hold a strong reference back into the kernel's own registry.
#[derive(Clone)]
pub struct PluginContext {
    pub events: Arc<EventBus>,
    pub hooks: Arc<HookBus>,
    pub errors: Arc<ErrorBus>,
    pub(crate) registry: PluginRegistryHandle,
}

impl PluginContext {
    pub async fn get(&self, name: &str) -> Result<PluginApi> {
        self.registry.get(name).await
    }
}

type SetupFn = dyn Fn(PluginContext, Option<Value>) -> BoxFuture<'static, std::result::Result<PluginApi, PluginSetupError>>
    + Send
    + Sync;
type TeardownFn =
    dyn Fn(PluginContext) -> BoxFuture<'static, std::result::Result<(), PluginSetupError>> + Send + Sync;

/// How a defined event delivers to its subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Handlers run in subscription order on the emitter's stack; emit
    /// completes only after the last handler has settled.
    Sync,
    /// Handlers are initiated in subscription order but may settle
    /// concurrently; emit completes once all have settled.
    Async,
}

/// How emissions before the kernel reaches `Active` are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPolicy {
    /// Emissions before Active are discarded.
    Drop,
    /// Emissions before Active are enqueued and replayed once, in order,
    /// to subscribers present at the time the kernel becomes Active.
    Buffer,
    /// Like `Buffer`, but payloads are retained and also replayed to any
    /// subscriber that attaches later.
    Replay,
}

/// An event a plugin declares it may emit.
#[derive(Debug, Clone)]
pub struct EventDefSpec {
    pub delivery: DeliveryMode,
    pub startup: StartupPolicy,
}

/// One entry of a plugin's `dependsOn` list.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub name: String,
    pub constraint: Option<VersionConstraint>,
    pub optional: bool,
}

impl DependencySpec {
    pub fn required(name: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            name: name.into(),
            constraint: Some(constraint),
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, constraint: Option<VersionConstraint>) -> Self {
        Self {
            name: name.into(),
            constraint,
            optional: true,
        }
    }
}

/// The immutable declaration an author hands to [`crate::kernel::KernelBuilder::use_plugin`].
///
/// Construct with [`PluginDescriptor::builder`]; the setup closure is the
/// only required field besides name and version.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: Version,
    pub depends_on: Vec<DependencySpec>,
    pub priority: i64,
    pub options_spec: Option<OptionsSpec>,
    pub events: HashMap<String, EventDefSpec>,
    pub hooks: Vec<String>,
    pub(crate) setup: Arc<SetupFn>,
    pub(crate) teardown: Option<Arc<TeardownFn>>,
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("depends_on", &self.depends_on)
            .field("priority", &self.priority)
            .finish()
    }
}

impl PluginDescriptor {
    pub fn builder(name: impl Into<String>, version: Version) -> PluginDescriptorBuilder {
        PluginDescriptorBuilder::new(name, version)
    }
}

pub struct PluginDescriptorBuilder {
    name: String,
    version: Version,
    depends_on: Vec<DependencySpec>,
    priority: i64,
    options_spec: Option<OptionsSpec>,
    events: HashMap<String, EventDefSpec>,
    hooks: Vec<String>,
    setup: Option<Arc<SetupFn>>,
    teardown: Option<Arc<TeardownFn>>,
}

impl PluginDescriptorBuilder {
    fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            depends_on: Vec::new(),
            priority: 0,
            options_spec: None,
            events: HashMap::new(),
            hooks: Vec::new(),
            setup: None,
            teardown: None,
        }
    }

    pub fn depends_on(mut self, dep: DependencySpec) -> Self {
        self.depends_on.push(dep);
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn options(mut self, spec: OptionsSpec) -> Self {
        self.options_spec = Some(spec);
        self
    }

    pub fn event(mut self, name: impl Into<String>, spec: EventDefSpec) -> Self {
        self.events.insert(name.into(), spec);
        self
    }

    pub fn hook(mut self, name: impl Into<String>) -> Self {
        self.hooks.push(name.into());
        self
    }

    pub fn setup<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PluginContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<PluginApi, PluginSetupError>> + Send + 'static,
    {
        self.setup = Some(Arc::new(move |ctx, opts| Box::pin(f(ctx, opts))));
        self
    }

    pub fn teardown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<(), PluginSetupError>> + Send + 'static,
    {
        self.teardown = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn build(self) -> std::result::Result<PluginDescriptor, KernelError> {
        let setup = self.setup.ok_or_else(|| {
            KernelError::OptionsValidationFailed {
                plugin: self.name.clone(),
                message: "plugin descriptor has no setup function".to_string(),
            }
        })?;
        Ok(PluginDescriptor {
            name: self.name,
            version: self.version,
            depends_on: self.depends_on,
            priority: self.priority,
            options_spec: self.options_spec,
            events: self.events,
            hooks: self.hooks,
            setup,
            teardown: self.teardown,
        })
    }
}

/// Runtime lifecycle state of a registered plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Registered,
    Resolved,
    SettingUp,
    Active,
    Stopping,
    Stopped,
    Failed,
}
