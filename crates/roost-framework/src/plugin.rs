//! Plugins: named, ordered handler chains with an optional service hook.
//!
//! ```rust,ignore
//! let puzzle = plugin! {
//!     name: "puzzle",
//!     desc: "Guess-the-concept game",
//!     features: ["puzzle"],
//!     requires: [dyn AskBackend],
//!     init: register_games,
//!     handlers: [
//!         on_command::<PuzzleCommand>("puzzle").feature("puzzle").handler(puzzle),
//!     ],
//! };
//! ```
//!
//! The `init` hook runs once while the service registry is still open, so a
//! plugin can register the services its handlers use. `requires` names
//! capabilities that must be registered by someone once every hook has run;
//! a missing one stops startup with [`CoreError::NotRegistered`].
//! `features` names the switches the plugin's commands check; they are
//! declared in [`FeatureFlags`](crate::FeatureFlags) so admins can toggle them.

use std::borrow::Cow;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Service};
use tracing::{debug, error};

use roost_core::{CoreError, CoreResult};

use crate::context::HandlerContext;
use crate::error::EventSkipped;
use crate::extractor::parse_section;
use crate::locator::{ServiceLocator, ServiceRegistry};

pub type BoxedHandlerService = BoxCloneSyncService<Arc<HandlerContext>, (), BoxError>;

/// Service-registration hook run during startup.
pub type InitFn =
    Arc<dyn Fn(&PluginLoadContext, &mut ServiceRegistry) -> CoreResult<()> + Send + Sync>;

// ─── PluginLoadContext ────────────────────────────────────────────────────────

/// What an `init` hook knows about its plugin.
#[derive(Clone, Debug)]
pub struct PluginLoadContext {
    name: String,
    config: Arc<Value>,
}

impl PluginLoadContext {
    pub fn new(name: &str, config: Arc<Value>) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Arc<Value> {
        &self.config
    }

    /// Deserializes the config section; an absent section is `T::default()`.
    pub fn get_config<T: DeserializeOwned + Default>(&self) -> CoreResult<T> {
        parse_section(&self.config).map_err(|e| {
            CoreError::configuration(format!("invalid config for plugin '{}': {e}", self.name))
        })
    }
}

// ─── Capability ───────────────────────────────────────────────────────────────

/// A service type a plugin cannot run without.
#[derive(Clone, Copy)]
pub struct Capability {
    name: &'static str,
    present: fn(&ServiceLocator) -> bool,
}

impl Capability {
    pub fn of<C: ?Sized + 'static>() -> Self {
        Self {
            name: std::any::type_name::<C>(),
            present: |locator| locator.contains::<C>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_present(&self, locator: &ServiceLocator) -> bool {
        (self.present)(locator)
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// A live plugin. Build with [`Plugin::builder`] or [`plugin!`](crate::plugin!).
pub struct Plugin {
    name: Cow<'static, str>,
    desc: Option<&'static str>,
    features: Vec<&'static str>,
    handlers: Vec<BoxedHandlerService>,
    requires: Vec<Capability>,
    init: Option<InitFn>,
}

impl Plugin {
    pub fn builder(name: impl Into<Cow<'static, str>>) -> PluginBuilder {
        PluginBuilder {
            plugin: Plugin {
                name: name.into(),
                desc: None,
                features: Vec::new(),
                handlers: Vec::new(),
                requires: Vec::new(),
                init: None,
            },
        }
    }

    /// Display name, also the key of the plugin's config section.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> Option<&'static str> {
        self.desc
    }

    /// Feature switches guarding this plugin's commands.
    pub fn features(&self) -> &[&'static str] {
        &self.features
    }

    pub fn requires(&self) -> &[Capability] {
        &self.requires
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Runs the `init` hook, if any.
    pub(crate) fn init(&self, ctx: &PluginLoadContext, registry: &mut ServiceRegistry) -> CoreResult<()> {
        match &self.init {
            Some(f) => f(ctx, registry),
            None => Ok(()),
        }
    }

    /// Runs the handler chain until propagation stops.
    pub(crate) async fn dispatch_event(&self, ctx: Arc<HandlerContext>) {
        for mut svc in self.handlers.iter().cloned() {
            if !ctx.is_propagating() {
                debug!(plugin = %self.name, "Propagation stopped, halting handler chain");
                break;
            }
            if let Err(e) = svc.call(Arc::clone(&ctx)).await
                && !e.is::<EventSkipped>()
            {
                error!(
                    plugin = %self.name,
                    error  = %e,
                    "Handler returned an error"
                );
            }
        }
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("features", &self.features)
            .field("handlers", &self.handlers.len())
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`Plugin::builder`].
pub struct PluginBuilder {
    plugin: Plugin,
}

impl PluginBuilder {
    pub fn desc(mut self, desc: &'static str) -> Self {
        self.plugin.desc = Some(desc);
        self
    }

    /// Declares a feature switch used by this plugin.
    pub fn feature(mut self, feature: &'static str) -> Self {
        self.plugin.features.push(feature);
        self
    }

    /// Appends a handler service. Handlers run in the order they were added.
    pub fn handler<S>(mut self, service: S) -> Self
    where
        S: Service<Arc<HandlerContext>, Response = (), Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.plugin.handlers.push(BoxCloneSyncService::new(service));
        self
    }

    /// Declares a capability that must be registered before dispatch starts.
    pub fn requires<C: ?Sized + 'static>(mut self) -> Self {
        self.plugin.requires.push(Capability::of::<C>());
        self
    }

    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginLoadContext, &mut ServiceRegistry) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.plugin.init = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Plugin {
        self.plugin
    }
}

/// Declares a [`Plugin`].
///
/// Fields must appear in this order; all but `name` are optional.
///
/// | Field | Description |
/// |-------|-------------|
/// | `name` | Display name and config-section key |
/// | `desc` | One-line description |
/// | `features` | `["name", …]` feature switches the plugin checks |
/// | `requires` | `[Type, …]` capabilities that must be registered |
/// | `init` | `fn(&PluginLoadContext, &mut ServiceRegistry) -> CoreResult<()>` |
/// | `handlers` | `[service, …]` tower handler services |
#[macro_export]
macro_rules! plugin {
    (
        name: $name:expr
        $(, desc: $desc:expr)?
        $(, features: [$($feature:expr),* $(,)?])?
        $(, requires: [$($req:ty),* $(,)?])?
        $(, init: $init:expr)?
        $(, handlers: [$($h:expr),* $(,)?])?
        $(,)?
    ) => {{
        let builder = $crate::plugin::Plugin::builder($name);
        $( let builder = builder.desc($desc); )?
        $( $( let builder = builder.feature($feature); )* )?
        $( $( let builder = builder.requires::<$req>(); )* )?
        $( let builder = builder.on_init($init); )?
        $( $( let builder = builder.handler($h); )* )?
        builder.build()
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::on_message;
    use crate::handler::ServiceBuilderExt;

    trait Clock: Send + Sync {}

    #[derive(serde::Deserialize, Default, Debug, PartialEq)]
    #[serde(default)]
    struct Settings {
        greeting: String,
    }

    async fn noop() {}

    #[test]
    fn macro_builds_plugin() {
        let plugin = crate::plugin! {
            name: "demo",
            desc: "A demo",
            features: ["demo", "extra"],
            requires: [dyn Clock],
            init: |_ctx: &PluginLoadContext, _reg: &mut ServiceRegistry| Ok(()),
            handlers: [on_message().handler(noop), on_message().handler(noop)],
        };
        assert_eq!(plugin.name(), "demo");
        assert_eq!(plugin.desc(), Some("A demo"));
        assert_eq!(plugin.handler_count(), 2);
        assert_eq!(plugin.features(), &["demo", "extra"]);
        assert!(plugin.requires()[0].name().ends_with("Clock"));
    }

    #[test]
    fn capability_presence() {
        let cap = Capability::of::<dyn Clock>();
        assert!(!cap.is_present(&ServiceRegistry::new().freeze()));
    }

    #[test]
    fn load_context_config() {
        let absent = PluginLoadContext::new("demo", Arc::new(Value::Null));
        assert_eq!(absent.get_config::<Settings>().unwrap(), Settings::default());

        let set = PluginLoadContext::new("demo", Arc::new(serde_json::json!({"greeting": "hi"})));
        assert_eq!(set.get_config::<Settings>().unwrap().greeting, "hi");

        let bad = PluginLoadContext::new("demo", Arc::new(serde_json::json!({"greeting": 3})));
        let err = bad.get_config::<Settings>().unwrap_err();
        assert_eq!(err.kind(), roost_core::ErrorKind::Configuration);
    }
}
