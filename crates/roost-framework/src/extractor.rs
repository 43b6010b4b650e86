//! Handler parameter injection.
//!
//! Any type implementing [`FromContext`] can be used as a handler parameter:
//!
//! ```rust,ignore
//! async fn handler(
//!     event: Event,
//!     reply: Reply,
//!     tokens: ServiceRef<TokenService>,
//!     cfg: PluginConfig<PuzzleConfig>,
//! ) -> anyhow::Result<()> {
//!     // ...
//! }
//! ```
//!
//! If an extractor fails, the handler is skipped and the error is logged at
//! debug level. `Option<T>` never fails.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use roost_core::{ExecutionContext, MessageEvent};

use crate::context::HandlerContext;
use crate::error::{ExtractError, ExtractResult};
use crate::reply::ReplyBuffer;

/// A type that can be extracted from a [`HandlerContext`].
pub trait FromContext: Sized {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self>;
}

impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

impl FromContext for Arc<ExecutionContext> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx.execution()))
    }
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// The inbound message. Derefs to [`MessageEvent`].
#[derive(Debug, Clone)]
pub struct Event(pub Arc<MessageEvent>);

impl std::ops::Deref for Event {
    type Target = MessageEvent;

    fn deref(&self) -> &MessageEvent {
        &self.0
    }
}

impl FromContext for Event {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(Event(Arc::clone(ctx.event())))
    }
}

// ─── Reply ───────────────────────────────────────────────────────────────────

/// Handle to the event's [`ReplyBuffer`].
#[derive(Debug, Clone)]
pub struct Reply(pub Arc<ReplyBuffer>);

impl std::ops::Deref for Reply {
    type Target = ReplyBuffer;

    fn deref(&self) -> &ReplyBuffer {
        &self.0
    }
}

impl FromContext for Reply {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(Reply(Arc::clone(ctx.reply())))
    }
}

// ─── ServiceRef ──────────────────────────────────────────────────────────────

/// A registered capability, usually a `dyn Trait`.
///
/// Extraction fails with [`ExtractError::ServiceNotFound`] when nothing was
/// registered for `T`.
pub struct ServiceRef<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> std::ops::Deref for ServiceRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> Clone for ServiceRef<T> {
    fn clone(&self) -> Self {
        ServiceRef(Arc::clone(&self.0))
    }
}

impl<T: ?Sized + Send + Sync + 'static> FromContext for ServiceRef<T> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(ServiceRef(ctx.get_service::<T>()?))
    }
}

// ─── PluginConfig ────────────────────────────────────────────────────────────

/// The plugin's typed config section (`plugins.<name>`).
///
/// An absent section yields `T::default()`; a section of the wrong shape
/// fails with [`ExtractError::InvalidConfig`].
///
/// ```toml
/// [plugins.puzzle]
/// concepts = [{ answer = "kettle", category = "object", description = "..." }]
/// ```
pub struct PluginConfig<T>(pub Arc<T>);

impl<T> std::ops::Deref for PluginConfig<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: DeserializeOwned + Default + Send + Sync + 'static> FromContext for PluginConfig<T> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        parse_section::<T>(ctx.config())
            .map(|t| PluginConfig(Arc::new(t)))
            .map_err(|e| ExtractError::InvalidConfig {
                plugin: ctx.plugin_name().to_string(),
                message: e.to_string(),
            })
    }
}

/// Deserializes a raw plugin section, treating `null` as `T::default()`.
pub(crate) fn parse_section<T: DeserializeOwned + Default>(value: &Value) -> serde_json::Result<T> {
    if value.is_null() {
        Ok(T::default())
    } else {
        T::deserialize(value)
    }
}
