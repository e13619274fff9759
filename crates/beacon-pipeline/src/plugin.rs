//! Plugin contract.
//!
//! A plugin is a named, versioned unit implementing zero or more
//! per-event-type hooks, classified by pipeline stage. The stage determines
//! the failure policy applied by the event queue; the plugin itself only
//! reports success or failure.

use async_trait::async_trait;
use beacon_core::{Context, PipelineConfig};
use thiserror::Error;

/// Pipeline stage. Determines when a plugin's hooks run and how its
/// failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Must succeed; a failure cancels the context.
    Before,
    /// Best-effort mutation before the event is sealed.
    Enrichment,
    /// Fan-out delivery after sealing; failures are isolated per plugin.
    Destination,
    /// Lifecycle-only; no event hooks are invoked.
    Utility,
    /// Runs per event after the destination phase, off the critical path.
    After,
}

impl Stage {
    /// Stable lowercase name, used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Before => "before",
            Stage::Enrichment => "enrichment",
            Stage::Destination => "destination",
            Stage::Utility => "utility",
            Stage::After => "after",
        }
    }
}

/// Plugin descriptor.
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub stage: Stage,
    /// Critical destinations propagate load failures instead of being
    /// excluded quietly. Ignored for other stages, which always propagate.
    pub critical: bool,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>, stage: Stage) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            stage,
            critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Error returned by plugin lifecycle methods and hooks.
#[derive(Error, Debug)]
pub enum PluginError {
    /// Hook failed
    #[error("{0}")]
    Message(String),

    /// Load failed
    #[error("Load failed: {0}")]
    Load(String),

    /// Hook cancelled the context. `retryable: false` makes the drop
    /// permanent regardless of remaining attempts.
    #[error("Cancelled: {reason}")]
    Cancelled { reason: String, retryable: bool },
}

/// Result of one hook invocation.
pub type HookResult = Result<Context, PluginError>;

/// Handle to the owning pipeline instance, passed to `load`.
///
/// Replaces any ambient singleton: a plugin that needs to know which
/// instance it serves, or that instance's settings, gets them here
/// explicitly.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    instance_id: String,
    config: PipelineConfig,
}

impl PipelineHandle {
    pub fn new(instance_id: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            instance_id: instance_id.into(),
            config,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

/// A unit of the event pipeline.
///
/// Hooks take the context by value and return the context to continue with;
/// the default for every hook is a pass-through. Implementations track
/// their own load state and report it via `is_loaded`.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;

    /// Prepare the plugin. Called once at registration; a plugin
    /// participates in dispatch only after this resolves and `is_loaded`
    /// reports true.
    async fn load(&self, ctx: Context, handle: PipelineHandle) -> Result<Context, PluginError>;

    fn is_loaded(&self) -> bool;

    /// Tear down at deregistration.
    async fn unload(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Destinations gate first delivery on this; other stages are ready as
    /// soon as they are loaded.
    async fn ready(&self) -> bool {
        true
    }

    async fn track(&self, ctx: Context) -> HookResult {
        Ok(ctx)
    }

    async fn page(&self, ctx: Context) -> HookResult {
        Ok(ctx)
    }

    async fn identify(&self, ctx: Context) -> HookResult {
        Ok(ctx)
    }

    async fn group(&self, ctx: Context) -> HookResult {
        Ok(ctx)
    }

    async fn alias(&self, ctx: Context) -> HookResult {
        Ok(ctx)
    }

    async fn screen(&self, ctx: Context) -> HookResult {
        Ok(ctx)
    }
}
