//! Per-event context handed to handlers.
//!
//! Two layers model how one event travels through the plugins:
//!
//! - [`BaseContext`]: shared by every plugin for one event. Holds the event,
//!   the [`ExecutionContext`], the [`ReplyBuffer`], the service locator and the
//!   propagation flag.
//! - [`HandlerContext`]: the base plus one plugin's own data (name, config
//!   section and an isolated state map used by layers such as `on_command`).
//!
//! Calling [`stop_propagation`](HandlerContext::stop_propagation) writes through
//! to the base, so the dispatcher skips every remaining plugin.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use roost_core::{CoreResult, ExecutionContext, MessageEvent};

use crate::locator::ServiceLocator;
use crate::reply::ReplyBuffer;

// =============================================================================
// BaseContext
// =============================================================================

/// Shared state of one dispatch cycle.
pub struct BaseContext {
    event: Arc<MessageEvent>,
    buffer: Arc<ReplyBuffer>,
    services: ServiceLocator,
    is_propagating: AtomicBool,
}

impl BaseContext {
    pub fn new(event: Arc<MessageEvent>, buffer: Arc<ReplyBuffer>, services: ServiceLocator) -> Self {
        Self {
            event,
            buffer,
            services,
            is_propagating: AtomicBool::new(true),
        }
    }

    /// `false` once a handler stopped propagation or finished the reply.
    pub fn is_propagating(&self) -> bool {
        self.is_propagating.load(Ordering::SeqCst) && !self.buffer.is_finished()
    }

    pub fn stop_propagation(&self) {
        self.is_propagating.store(false, Ordering::SeqCst);
    }

    pub fn buffer(&self) -> &Arc<ReplyBuffer> {
        &self.buffer
    }
}

impl std::fmt::Debug for BaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseContext")
            .field("event", &self.event)
            .field("is_propagating", &self.is_propagating())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// PluginContext
// =============================================================================

/// Data owned by one plugin for one event.
#[derive(Debug)]
pub struct PluginContext {
    name: String,
    config: Arc<Value>,
    state: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl PluginContext {
    pub fn new(name: &str, config: Arc<Value>) -> Self {
        Self {
            name: name.to_string(),
            config,
            state: Mutex::new(HashMap::new()),
        }
    }
}

// =============================================================================
// HandlerContext
// =============================================================================

/// The context object passed to handlers and extractors.
///
/// ```rust,ignore
/// async fn handle(ctx: Arc<HandlerContext>) {
///     ctx.reply().write("pong");
///     ctx.stop_propagation();
/// }
/// ```
#[derive(Debug)]
pub struct HandlerContext {
    base: Arc<BaseContext>,
    plugin: PluginContext,
}

impl HandlerContext {
    pub fn new(base: Arc<BaseContext>, plugin: PluginContext) -> Self {
        Self { base, plugin }
    }

    // ─── Shared base delegation ───────────────────────────────────────────────

    pub fn event(&self) -> &Arc<MessageEvent> {
        &self.base.event
    }

    pub fn execution(&self) -> &Arc<ExecutionContext> {
        self.base.buffer.context()
    }

    /// The reply buffer of this event.
    pub fn reply(&self) -> &Arc<ReplyBuffer> {
        &self.base.buffer
    }

    pub fn services(&self) -> &ServiceLocator {
        &self.base.services
    }

    /// Looks up a capability in the service locator.
    pub fn get_service<T: ?Sized + Send + Sync + 'static>(&self) -> CoreResult<Arc<T>> {
        self.base.services.get::<T>()
    }

    /// Stops the event from reaching any further handler or plugin.
    pub fn stop_propagation(&self) {
        self.base.stop_propagation();
    }

    pub fn is_propagating(&self) -> bool {
        self.base.is_propagating()
    }

    // ─── Per-plugin state ─────────────────────────────────────────────────────

    /// Stores a value in this plugin's state map, one value per type.
    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        self.plugin
            .state
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get_state<T: Clone + 'static>(&self) -> Option<T> {
        self.plugin
            .state
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn has_state<T: 'static>(&self) -> bool {
        self.plugin.state.lock().contains_key(&TypeId::of::<T>())
    }

    pub fn take_state<T: 'static>(&self) -> Option<T> {
        self.plugin
            .state
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    // ─── Plugin-specific ──────────────────────────────────────────────────────

    pub fn plugin_name(&self) -> &str {
        &self.plugin.name
    }

    /// The plugin's raw config section (`Value::Null` when absent).
    pub fn config(&self) -> &Arc<Value> {
        &self.plugin.config
    }
}
