//! Plugin startup and event dispatch.
//!
//! [`PluginManager`] owns every plugin and the frozen [`ServiceLocator`]. It:
//!
//! - Runs each plugin's `init` hook against the open [`ServiceRegistry`] in
//!   registration order, then freezes it.
//! - Refuses to start when a plugin's required capability is missing or a
//!   hook fails; misconfiguration never reaches dispatch.
//! - Declares every plugin's feature switches in [`FeatureFlags`], when that
//!   service is registered.
//! - Implements [`Dispatcher`]: for each event it binds the
//!   [`ExecutionContext`] and a fresh [`ReplyBuffer`] to the task, runs the
//!   plugins **sequentially** until one stops propagation, then flushes the
//!   buffer.
//!
//! ```rust,ignore
//! let manager = PluginManager::builder(outbox)
//!     .registry(registry)
//!     .plugin(admin_plugin())
//!     .plugin(puzzle_plugin())
//!     .handler_timeout(Some(Duration::from_secs(30)))
//!     .build()?;
//! manager.dispatch(event).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{Instrument, Level, debug, error, info, span, warn};

use roost_core::{CoreError, CoreResult, Dispatcher, ExecutionContext, MessageEvent};

use crate::context::{BaseContext, HandlerContext, PluginContext};
use crate::features::FeatureFlags;
use crate::locator::{ServiceLocator, ServiceRegistry};
use crate::plugin::{Plugin, PluginLoadContext};
use crate::reply::{self, Outbox, ReplyBuffer};

// =============================================================================
// Builder
// =============================================================================

/// Collects plugins, services and settings before startup.
pub struct PluginManagerBuilder {
    outbox: Arc<Outbox>,
    registry: ServiceRegistry,
    plugins: Vec<Plugin>,
    plugin_configs: HashMap<String, Value>,
    handler_timeout: Option<Duration>,
}

impl PluginManagerBuilder {
    /// Uses `registry` as the starting set of services.
    pub fn registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry_mut(&mut self) -> &mut ServiceRegistry {
        &mut self.registry
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Plugin>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    /// Per-plugin config sections keyed by plugin name.
    pub fn plugin_configs(mut self, configs: HashMap<String, Value>) -> Self {
        self.plugin_configs.extend(configs);
        self
    }

    /// Upper bound for one event's handler chain; `None` disables it.
    pub fn handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Runs the init hooks, freezes the registry and checks requirements.
    pub fn build(self) -> CoreResult<PluginManager> {
        let Self {
            outbox,
            mut registry,
            plugins,
            plugin_configs,
            handler_timeout,
        } = self;

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            let name = plugin.name().to_string();
            if !seen.insert(name.clone()) {
                return Err(CoreError::configuration(format!(
                    "plugin '{name}' is registered twice"
                )));
            }
            let config = Arc::new(plugin_configs.get(&name).cloned().unwrap_or(Value::Null));
            let load_ctx = PluginLoadContext::new(&name, Arc::clone(&config));
            plugin.init(&load_ctx, &mut registry).inspect_err(|e| {
                error!(plugin = %name, error = %e, "Plugin init failed");
            })?;
            entries.push(PluginEntry {
                plugin: Arc::new(plugin),
                config,
            });
        }

        let services = registry.freeze();
        if let Ok(flags) = services.get::<FeatureFlags>() {
            for feature in entries.iter().flat_map(|e| e.plugin.features()) {
                flags.declare(feature);
            }
        }
        for entry in &entries {
            if let Some(missing) = entry
                .plugin
                .requires()
                .iter()
                .find(|cap| !cap.is_present(&services))
            {
                error!(
                    plugin = %entry.plugin.name(),
                    missing_capability = missing.name(),
                    "Plugin requirement not satisfied"
                );
                return Err(CoreError::NotRegistered {
                    capability: missing.name(),
                });
            }
            info!(
                plugin = %entry.plugin.name(),
                handlers = entry.plugin.handler_count(),
                "Plugin registered"
            );
        }

        Ok(PluginManager {
            plugins: entries,
            services,
            outbox,
            handler_timeout,
        })
    }
}

// =============================================================================
// PluginManager
// =============================================================================

struct PluginEntry {
    plugin: Arc<Plugin>,
    config: Arc<Value>,
}

/// Owner of the plugins and the dispatch loop.
pub struct PluginManager {
    plugins: Vec<PluginEntry>,
    services: ServiceLocator,
    outbox: Arc<Outbox>,
    handler_timeout: Option<Duration>,
}

impl PluginManager {
    pub fn builder(outbox: Arc<Outbox>) -> PluginManagerBuilder {
        PluginManagerBuilder {
            outbox,
            registry: ServiceRegistry::new(),
            plugins: Vec::new(),
            plugin_configs: HashMap::new(),
            handler_timeout: None,
        }
    }

    pub fn services(&self) -> &ServiceLocator {
        &self.services
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Plugin names in dispatch order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|e| e.plugin.name()).collect()
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout
    }

    async fn run_plugins(&self, base: Arc<BaseContext>) {
        let conversation = base.buffer().context().conversation_id.clone();
        for entry in &self.plugins {
            if !base.is_propagating() {
                break;
            }
            let ctx = Arc::new(HandlerContext::new(
                Arc::clone(&base),
                PluginContext::new(entry.plugin.name(), Arc::clone(&entry.config)),
            ));
            let span = span!(
                Level::DEBUG,
                "dispatch",
                conversation = %conversation,
                plugin = %entry.plugin.name()
            );
            entry.plugin.dispatch_event(ctx).instrument(span).await;
        }
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugin_names())
            .field("services", &self.services)
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

// =============================================================================
// Dispatcher impl
// =============================================================================

#[async_trait]
impl Dispatcher for PluginManager {
    /// Runs every plugin for `event`, then flushes its replies.
    ///
    /// If the handler chain outlives the timeout its replies are discarded
    /// unsent and `Err(Cancelled)` is returned. A flush failure is returned
    /// as is.
    async fn dispatch(&self, event: MessageEvent) -> CoreResult<()> {
        let event = Arc::new(event);
        let exec = Arc::new(ExecutionContext::from_event(&event));
        let buffer = Arc::new(ReplyBuffer::new(exec, Arc::clone(&self.outbox)));
        let base = Arc::new(BaseContext::new(
            Arc::clone(&event),
            Arc::clone(&buffer),
            self.services.clone(),
        ));

        debug!(
            conversation = %buffer.context().conversation_id,
            message_id = event.message_id,
            "Dispatching event"
        );

        let chain = reply::scope(Arc::clone(&buffer), self.run_plugins(base));
        match self.handler_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, chain).await.is_err() {
                    let dropped = buffer.discard();
                    warn!(
                        conversation = %buffer.context().conversation_id,
                        dropped,
                        "Handler chain timed out, replies discarded"
                    );
                    return Err(CoreError::Cancelled(format!(
                        "handler chain exceeded {}ms",
                        limit.as_millis()
                    )));
                }
            }
            None => chain.await,
        }

        buffer.flush().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::collection::vec;
    use proptest::prelude::*;
    use roost_core::{AskBackend, CoreResult, ErrorKind, ReplyTarget, context};

    use super::*;
    use crate::extractor::{Event, Reply};
    use crate::handler::ServiceBuilderExt;
    use crate::routing::{on_group, on_message, on_prefix};
    use crate::testing::{RecordingTransport, TestHarness};

    async fn echo(event: Event) -> String {
        let delay: u64 = event.plain_text().parse().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        format!("echo {}", event.group_id().map(|g| g.to_string()).unwrap_or_default())
    }

    async fn first() -> &'static str {
        "first"
    }

    async fn second() -> &'static str {
        "second"
    }

    async fn finisher(reply: Reply) -> CoreResult<()> {
        reply.finish("done").await
    }

    async fn task_local_writer() -> CoreResult<()> {
        let ctx = context::current()?;
        reply::write(format!("hello {}", ctx.sender_id))?;
        Ok(())
    }

    async fn stall(reply: Reply) {
        reply.write("never sent");
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }

    fn group_target(id: &str) -> ReplyTarget {
        ReplyTarget::Group(id.into())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn replies_reach_only_their_conversation(delays in vec(0u64..15, 1..12)) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let plugin = Plugin::builder("echo")
                    .handler(on_message().handler(echo))
                    .build();
                let harness = Arc::new(TestHarness::new(vec![plugin], ServiceRegistry::new()).unwrap());

                let mut handles = Vec::new();
                for (i, delay) in delays.iter().enumerate() {
                    let harness = Arc::clone(&harness);
                    let event = MessageEvent::group(i as u64, format!("g{i}"), "u", &delay.to_string());
                    handles.push(tokio::spawn(async move { harness.send(event).await }));
                }
                for h in handles {
                    h.await.unwrap().unwrap();
                }

                let sent = harness.transport.sent();
                assert_eq!(sent.len(), delays.len());
                for i in 0..delays.len() {
                    let gid = format!("g{i}");
                    assert_eq!(
                        harness.transport.texts_for(&group_target(&gid)),
                        vec![format!("echo {gid}")]
                    );
                }
            });
        }
    }

    #[tokio::test]
    async fn plugins_run_in_order_until_blocked() {
        let a = Plugin::builder("a").handler(on_message().handler(first)).build();
        let b = Plugin::builder("b")
            .handler(on_prefix("stop").block().handler(second))
            .build();
        let c = Plugin::builder("c").handler(on_message().handler(first)).build();
        let h = TestHarness::new(vec![a, b, c], ServiceRegistry::new()).unwrap();

        h.send(MessageEvent::group(1, "g", "u", "go")).await.unwrap();
        assert_eq!(h.transport.texts_for(&group_target("g")), vec!["first", "first"]);

        h.transport.clear();
        h.send(MessageEvent::group(2, "g", "u", "stop now")).await.unwrap();
        assert_eq!(h.transport.texts_for(&group_target("g")), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn finish_ends_the_chain() {
        let a = Plugin::builder("a")
            .handler(on_message().handler(finisher))
            .handler(on_message().handler(second))
            .build();
        let b = Plugin::builder("b").handler(on_message().handler(second)).build();
        let h = TestHarness::new(vec![a, b], ServiceRegistry::new()).unwrap();

        h.send(MessageEvent::private(1, "u", "hi")).await.unwrap();
        assert_eq!(
            h.transport.texts_for(&ReplyTarget::Private("u".into())),
            vec!["done"]
        );
    }

    #[tokio::test]
    async fn handlers_reach_context_through_task_locals() {
        let a = Plugin::builder("a")
            .handler(on_group().handler(task_local_writer))
            .build();
        let h = TestHarness::new(vec![a], ServiceRegistry::new()).unwrap();

        h.send(MessageEvent::group(1, "g", "alice", "hi")).await.unwrap();
        h.send(MessageEvent::private(2, "bob", "hi")).await.unwrap();
        assert_eq!(h.transport.texts_for(&group_target("g")), vec!["hello alice"]);
        assert!(h.transport.texts_for(&ReplyTarget::Private("bob".into())).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_discards_replies() {
        let transport = Arc::new(RecordingTransport::new());
        let manager = PluginManager::builder(Arc::new(Outbox::new(transport.clone())))
            .plugin(Plugin::builder("slow").handler(on_message().handler(stall)).build())
            .handler_timeout(Some(Duration::from_secs(1)))
            .build()
            .unwrap();

        let err = manager
            .dispatch(MessageEvent::group(1, "g", "u", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn flush_failure_is_returned() {
        let transport = Arc::new(RecordingTransport::new().fail_on(0));
        let manager = PluginManager::builder(Arc::new(Outbox::new(transport.clone())))
            .plugin(Plugin::builder("a").handler(on_message().handler(first)).build())
            .build()
            .unwrap();

        let err = manager
            .dispatch(MessageEvent::group(1, "g", "u", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }

    #[test]
    fn missing_requirement_halts_startup() {
        let plugin = Plugin::builder("needy").requires::<dyn AskBackend>().build();
        let err = TestHarness::new(vec![plugin], ServiceRegistry::new()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotRegistered);
    }

    #[test]
    fn init_hooks_register_services_and_read_config() {
        #[derive(serde::Deserialize, Default)]
        struct Cfg {
            limit: usize,
        }
        struct Limit(usize);

        let plugin = Plugin::builder("limits")
            .requires::<Limit>()
            .on_init(|ctx, registry| {
                let cfg: Cfg = ctx.get_config()?;
                registry.register(Arc::new(Limit(cfg.limit)))
            })
            .build();
        let configs = HashMap::from([("limits".to_string(), serde_json::json!({"limit": 7}))]);
        let h = TestHarness::with_configs(vec![plugin], ServiceRegistry::new(), configs).unwrap();
        assert_eq!(h.manager.services().get::<Limit>().unwrap().0, 7);
    }

    #[test]
    fn duplicate_plugin_names_are_rejected() {
        let a = Plugin::builder("same").build();
        let b = Plugin::builder("same").build();
        let err = TestHarness::new(vec![a, b], ServiceRegistry::new()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn plugin_features_are_declared() {
        let flags = Arc::new(FeatureFlags::from_map([("chess", false)]));
        let mut registry = ServiceRegistry::new();
        registry.register(Arc::clone(&flags)).unwrap();
        let a = Plugin::builder("games").feature("chess").feature("dice").build();
        let b = Plugin::builder("quiet").build();
        TestHarness::new(vec![a, b], registry).unwrap();

        assert_eq!(flags.available(), vec!["chess", "dice"]);
        assert!(!flags.is_enabled("chess"));
        assert_eq!(flags.toggle("dice"), Some(false));
        assert_eq!(flags.toggle("dices"), None);
    }
}
