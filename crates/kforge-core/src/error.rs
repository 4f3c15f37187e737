//! Crate-wide error type.
//!
//! Every subsystem (resolver, registry, lifecycle, buses) raises its own
//! [`thiserror`]-derived variant here rather than a private per-module enum,
//! mirroring how the kernel error type in the reference bootstrap module
//! absorbs each component's error as a `#[from]` variant. The bus triad
//! additionally needs a *runtime* error value distinct from this enum -
//! see [`crate::bus::error_bus::KernelError`] for the value plugins
//! construct and route through the error bus at delivery time. This type
//! is for calls that fail synchronously at the API boundary.

use thiserror::Error;

use crate::version::{Version, VersionConstraint};

/// Top-level result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid version string: {0}")]
    InvalidVersion(String),

    #[error("invalid version constraint: {0}")]
    InvalidConstraint(String),

    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("plugin '{consumer}' depends on unknown plugin '{dependency}'")]
    MissingDependency { consumer: String, dependency: String },

    #[error("plugin '{consumer}' requires '{dependency}' {constraint} but found {actual}")]
    VersionConflict {
        consumer: String,
        dependency: String,
        constraint: VersionConstraint,
        actual: Version,
    },

    #[error("circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("options validation failed for plugin '{plugin}': {message}")]
    OptionsValidationFailed { plugin: String, message: String },

    #[error("setup failed for plugin '{plugin}': {source}")]
    SetupFailed {
        plugin: String,
        #[source]
        source: crate::plugin::PluginSetupError,
    },

    #[error("teardown failed for plugin '{plugin}': {source}")]
    TeardownFailed {
        plugin: String,
        #[source]
        source: crate::plugin::PluginSetupError,
    },

    #[error("plugin '{0}' was not found")]
    PluginNotFound(String),

    #[error("plugin '{0}' is not active")]
    PluginNotActive(String),

    #[error("kernel has already been built")]
    KernelAlreadyBuilt,

    #[error("kernel has not been initialized")]
    KernelNotInitialized,

    #[error("event '{namespace}.{name}' is already defined")]
    EventAlreadyDefined { namespace: String, name: String },

    #[error("event '{namespace}.{name}' is not defined")]
    UnknownEvent { namespace: String, name: String },

    #[error("hook '{0}' is already defined")]
    HookAlreadyDefined(String),

    #[error("hook '{0}' is not defined")]
    UnknownHook(String),

    /// Aggregated failures collected while stopping plugins in reverse
    /// order. `stop()` always completes the full reverse-order sweep -
    /// a teardown failure never stops it from tearing down the remaining
    /// plugins, matching the reference plugin registry's `shutdown_all` -
    /// but if any teardown failed, `stop()` returns this variant rather
    /// than only the first failure encountered.
    #[error("{} plugin(s) failed during teardown", .0.len())]
    AggregateTeardown(Vec<Error>),

    /// Raised while init() is unwinding after a setup failure, if one or
    /// more of the rollback teardown calls also failed. The original
    /// setup failure is preserved as `root_cause`.
    #[error("init aborted ({root_cause}); {} rollback error(s) followed", .rollback_errors.len())]
    InitAborted {
        #[source]
        root_cause: Box<Error>,
        rollback_errors: Vec<Error>,
    },
}
