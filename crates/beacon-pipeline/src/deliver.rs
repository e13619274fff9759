//! Delivery primitives: `attempt` and `ensure`.
//!
//! Every hook invocation goes through `attempt`: it times the hook, catches
//! its error, and records both on the context. Errors never escape this
//! boundary; callers branch on the returned outcome instead.

use crate::plugin::{Plugin, PluginError};
use beacon_core::{Cancellation, Context, EventType, LogLevel};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Result of one `attempt`.
pub enum AttemptOutcome {
    /// Hook succeeded (or was absent); continue with this context.
    Ok(Context),
    /// Hook failed; `ctx` is the last good context, with the failure
    /// logged and counted on it.
    Failed { ctx: Context, error: PluginError },
}

/// Result of one `ensure`.
pub enum EnsureOutcome {
    Continue(Context),
    /// Hook failed; the context has been cancelled and the caller must stop
    /// processing it.
    Cancelled(Context),
}

/// Invoke the hook matching the context's event type, timed and contained.
///
/// The hook's partial effects are discarded on failure: the returned
/// context is the one the hook started from.
pub async fn attempt(mut ctx: Context, plugin: &Arc<dyn Plugin>) -> AttemptOutcome {
    let meta = plugin.metadata();
    ctx.log(LogLevel::Debug, "plugin", Some(json!({ "plugin": meta.name })));

    let hook_ctx = ctx.clone();
    let start = Instant::now();
    let result = invoke(plugin, hook_ctx).await;
    let elapsed_ms = start.elapsed().as_millis() as f64;

    let tag = format!("plugin:{}", meta.name);
    match result {
        Ok(mut out) => {
            out.stats_mut().gauge("plugin_time", elapsed_ms, &[&tag]);
            AttemptOutcome::Ok(out)
        }
        Err(error) => {
            ctx.log(
                LogLevel::Error,
                "plugin Error",
                Some(json!({ "plugin": meta.name, "error": error.to_string() })),
            );
            ctx.stats_mut().increment("plugin_error", 1.0, &[&tag]);
            // A hook-signaled cancellation belongs on the surviving context
            if let PluginError::Cancelled { reason, retryable } = &error {
                ctx.cancel(Cancellation::new(reason.clone(), *retryable));
            }
            AttemptOutcome::Failed { ctx, error }
        }
    }
}

/// `attempt` with must-succeed semantics.
///
/// On failure the context is cancelled (retryable: the queue decides how
/// many passes it gets) and the caller must stop processing it.
pub async fn ensure(ctx: Context, plugin: &Arc<dyn Plugin>) -> EnsureOutcome {
    match attempt(ctx, plugin).await {
        AttemptOutcome::Ok(ctx) => EnsureOutcome::Continue(ctx),
        AttemptOutcome::Failed { mut ctx, error } => {
            let meta = plugin.metadata();
            ctx.log(LogLevel::Debug, "Context cancelled", None);
            ctx.stats_mut().increment("context_canceled", 1.0, &[]);
            ctx.cancel(Cancellation::new(
                format!("plugin {} failed: {}", meta.name, error),
                true,
            ));
            EnsureOutcome::Cancelled(ctx)
        }
    }
}

async fn invoke(plugin: &Arc<dyn Plugin>, ctx: Context) -> Result<Context, PluginError> {
    match ctx.event().event_type {
        EventType::Track => plugin.track(ctx).await,
        EventType::Page => plugin.page(ctx).await,
        EventType::Identify => plugin.identify(ctx).await,
        EventType::Group => plugin.group(ctx).await,
        EventType::Alias => plugin.alias(ctx).await,
        EventType::Screen => plugin.screen(ctx).await,
    }
}
