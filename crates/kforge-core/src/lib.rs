//! Modular application kernel: dependency resolution, plugin lifecycle,
//! and an event/hook/error bus triad.
//!
//! Compose an application from independently-authored plugins. Each plugin
//! declares its dependencies, the events and hooks it defines, and an
//! optional options schema; [`create_kernel`] resolves a valid activation
//! order, runs every plugin's `setup` in that order, and returns an
//! [`ActiveKernel`] exposing the live buses and plugin APIs.
//!
//! ```no_run
//! use kforge_core::{create_kernel, PluginApi, PluginDescriptor};
//! use kforge_core::parse_version;
//!
//! # async fn run() -> kforge_core::Result<()> {
//! let descriptor = PluginDescriptor::builder("greeter", parse_version("1.0.0")?)
//!     .setup(|_ctx, _opts| async { Ok(PluginApi::new("hello".to_string())) })
//!     .build()?;
//!
//! let active = create_kernel(None).use_plugin(descriptor).build()?.init().await?;
//! let api = active.get("greeter").await?;
//! assert_eq!(*api.downcast::<String>().unwrap(), "hello");
//! active.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod bus;
pub mod error;
pub mod kernel;
pub mod options;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod version;

pub use adapter::BusAdapter;
pub use bus::{ErrorBus, ErrorMeta, EventBus, HookBus, KernelError, Middleware};
pub use error::{Error, Result};
pub use kernel::{create_kernel, ActiveKernel, Kernel, KernelBuilder, KernelOptions};
pub use options::{validate_options, OptionsSchema, OptionsSpec};
pub use plugin::{
    DeliveryMode, DependencySpec, EventDefSpec, PluginApi, PluginContext, PluginDescriptor,
    PluginDescriptorBuilder, PluginSetupError, PluginState, StartupPolicy,
};
pub use resolver::resolve_order;
pub use version::{highest_version, parse_version, Version, VersionConstraint};
