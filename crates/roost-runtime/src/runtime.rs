//! Runtime assembly and the event loop.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use roost_runtime::RoostRuntime;
//!
//! let runtime = RoostRuntime::builder()
//!     .transport(Arc::new(MyTransport::connect().await?))
//!     .service::<dyn AskBackend>(Arc::new(MyBackend::new()))
//!     .plugins(builtin_plugins())
//!     .build()
//!     .await?;
//!
//! runtime.run(MySource::new()).await?;
//! ```
//!
//! `build` loads configuration (unless one is given), initializes logging,
//! registers the core services, runs every plugin's init hook and freezes
//! the service locator. `run` then pulls events until the source ends, Ctrl+C
//! arrives or [`RoostRuntime::shutdown`] is called, dispatching each event on
//! its own tracked task.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use roost_core::{
    BoxedTransport, CoreError, Dispatcher, ErrorKind, EventSource, KvStore, MessageEvent,
    Transport,
};
use roost_framework::{
    AdminList, BanList, FeatureFlags, Outbox, Plugin, PluginManager, ServiceLocator,
    ServiceRegistry, SessionPolicy, Sweep, TokenService,
};

use crate::config::{ConfigLoader, RoostConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::store::JsonFileStore;

/// A built Roost service, ready to consume events.
pub struct RoostRuntime {
    config: RoostConfig,
    manager: Arc<PluginManager>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl RoostRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &RoostConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn services(&self) -> &ServiceLocator {
        self.manager.services()
    }

    /// Asks a running [`run`](Self::run) to stop. In-flight events still
    /// finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token cancelled when the runtime stops, for host tasks that should
    /// stop with it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs every registered sweeper once and returns how many entries they
    /// removed in total.
    pub async fn sweep(&self) -> usize {
        sweep_all(self.services().sweepers()).await
    }

    /// Consumes `source` until it ends, Ctrl+C (or SIGTERM) arrives, or
    /// [`shutdown`](Self::shutdown) is called.
    pub async fn run<S: EventSource>(&self, source: S) -> RuntimeResult<()> {
        self.run_until(source, wait_for_signal()).await
    }

    /// Like [`run`](Self::run) with a custom stop signal instead of the
    /// process signals.
    pub async fn run_until<S, F>(&self, mut source: S, stop: F) -> RuntimeResult<()>
    where
        S: EventSource,
        F: Future<Output = ()>,
    {
        self.spawn_sweeper();
        info!(
            plugins = ?self.manager.plugin_names(),
            "Roost runtime is now running"
        );

        tokio::pin!(stop);
        let backoff = self.config.dispatch.reconnect_backoff();
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = &mut stop => break,
                next = source.next_event() => next,
            };

            match next {
                Ok(Some(event)) => self.spawn_dispatch(event),
                Ok(None) => {
                    info!("Event source closed");
                    break;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Event source failed, retrying"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        self.shutdown.cancel();
        self.tracker.close();
        debug!(in_flight = self.tracker.len(), "Waiting for in-flight events");
        self.tracker.wait().await;
        info!("Runtime stopped");
        Ok(())
    }

    fn spawn_dispatch(&self, event: MessageEvent) {
        let manager = Arc::clone(&self.manager);
        self.tracker.spawn(async move {
            let conversation = event.conversation_id();
            if let Err(e) = manager.dispatch(event).await {
                match e.kind() {
                    ErrorKind::Cancelled => {
                        warn!(conversation = %conversation, error = %e, "Event dispatch cancelled")
                    }
                    _ => error!(conversation = %conversation, error = %e, "Event dispatch failed"),
                }
            }
        });
    }

    fn spawn_sweeper(&self) {
        let sweepers = self.services().sweepers().to_vec();
        if sweepers.is_empty() {
            return;
        }
        let period = self.config.sweep_interval();
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep_all(&sweepers).await;
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for RoostRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoostRuntime")
            .field("manager", &self.manager)
            .field("stopped", &self.shutdown.is_cancelled())
            .finish()
    }
}

async fn sweep_all(sweepers: &[Arc<dyn Sweep>]) -> usize {
    let mut total = 0;
    for sweeper in sweepers {
        let removed = sweeper.sweep().await;
        if removed > 0 {
            debug!(sweeper = sweeper.name(), removed, "Swept expired entries");
        }
        total += removed;
    }
    total
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                return wait_for_ctrl_c().await;
            }
        };
        tokio::select! {
            _ = wait_for_ctrl_c() => {}
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Collects configuration and collaborators for [`RoostRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<RoostConfig>,
    init_logging: bool,
    transport: Option<BoxedTransport>,
    store: Option<Arc<dyn KvStore>>,
    registry: ServiceRegistry,
    registry_error: Option<CoreError>,
    plugins: Vec<Plugin>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            config: None,
            init_logging: true,
            transport: None,
            store: None,
            registry: ServiceRegistry::new(),
            registry_error: None,
            plugins: Vec::new(),
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Uses `config` as is and skips loading.
    pub fn config(mut self, config: RoostConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Leaves the global subscriber to the host.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    pub fn transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Overrides the JSON file store configured under `[storage]`.
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registers a host-provided capability, such as `dyn AskBackend`.
    ///
    /// A duplicate registration is reported by [`build`](Self::build).
    pub fn service<C>(mut self, instance: Arc<C>) -> Self
    where
        C: ?Sized + Send + Sync + 'static,
    {
        if let Err(e) = self.registry.register(instance)
            && self.registry_error.is_none()
        {
            self.registry_error = Some(e);
        }
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Plugin>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub async fn build(self) -> RuntimeResult<RoostRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_loader.load()?,
        };
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }
        if let Some(e) = self.registry_error {
            return Err(e.into());
        }

        let transport = self.transport.ok_or(RuntimeError::Missing("transport"))?;
        let store = match self.store {
            Some(store) => store,
            None => {
                let dir = config.storage.resolve_data_dir();
                debug!(dir = %dir.display(), "Using JSON file store");
                Arc::new(JsonFileStore::new(dir)) as Arc<dyn KvStore>
            }
        };

        let mut registry = self.registry;

        let tokens = Arc::new(TokenService::new(config.tokens.ttl()));
        registry.register(Arc::clone(&tokens))?;
        registry.register_sweeper(tokens);

        registry.register(Arc::new(FeatureFlags::from_map(
            config.features.iter().map(|(k, v)| (k.as_str(), *v)),
        )))?;

        let bans = Arc::new(BanList::new(Arc::clone(&store)));
        let banned = bans.load().await?;
        registry.register(bans)?;

        registry.register(Arc::new(AdminList::new(&config.admins)))?;
        registry.register(Arc::new(SessionPolicy {
            idle_timeout: config.sessions.idle_timeout(),
        }))?;

        let mut outbox = Outbox::new(Arc::clone(&transport));
        if let Some(interval) = config.outbox.min_interval() {
            outbox = outbox.with_min_interval(interval);
        }
        let outbox = Arc::new(outbox);
        registry.register(Arc::clone(&outbox))?;
        registry.register_sweeper(Arc::clone(&outbox) as Arc<dyn Sweep>);

        registry.register::<dyn Transport>(transport)?;
        registry.register::<dyn KvStore>(store)?;

        let manager = PluginManager::builder(outbox)
            .registry(registry)
            .plugins(self.plugins)
            .plugin_configs(config.plugins.clone())
            .handler_timeout(config.dispatch.handler_timeout())
            .build()?;

        info!(
            plugins = manager.plugin_count(),
            services = manager.services().len(),
            admins = config.admins.len(),
            banned,
            "Runtime initialized"
        );

        Ok(RoostRuntime {
            config,
            manager: Arc::new(manager),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use roost_core::{AskBackend, MemoryStore, ReplyTarget, UserId, channel_source};
    use roost_framework::testing::{RecordingTransport, ScriptedBackend};
    use roost_plugins::{admin_plugin, builtin_plugins};

    use super::*;

    fn test_config() -> RoostConfig {
        let mut config = RoostConfig::default();
        config.outbox.min_interval_ms = 0;
        config.admins = vec!["root".to_string()];
        config.plugins.insert(
            "puzzle".to_string(),
            json!({
                "concepts": [
                    { "answer": "Kettle", "category": "object", "description": "Boils water." }
                ]
            }),
        );
        config
    }

    fn builder(transport: &Arc<RecordingTransport>) -> RuntimeBuilder {
        RoostRuntime::builder()
            .config(test_config())
            .without_logging()
            .transport(Arc::clone(transport) as BoxedTransport)
            .store(Arc::new(MemoryStore::new()))
    }

    async fn wait_for_replies(transport: &RecordingTransport, count: usize) {
        for _ in 0..200 {
            if transport.sent().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} replies, got {:?}", transport.sent());
    }

    #[tokio::test]
    async fn runs_events_until_source_closes() {
        let transport = Arc::new(RecordingTransport::new());
        let runtime = builder(&transport)
            .service::<dyn AskBackend>(Arc::new(ScriptedBackend::new(["yes"])))
            .plugins(builtin_plugins())
            .build()
            .await
            .unwrap();
        let flags = runtime.services().get::<FeatureFlags>().unwrap();
        assert_eq!(flags.available(), vec!["puzzle", "roulette"]);
        let runtime = Arc::new(runtime);

        let (tx, source) = channel_source(8);
        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.run_until(source, std::future::pending()).await })
        };

        tx.push(MessageEvent::group(1, "g1", "alice", "/puzzle start"))
            .await
            .unwrap();
        wait_for_replies(&transport, 1).await;
        tx.push(MessageEvent::group(2, "g1", "bob", "/puzzle ask is it hot?"))
            .await
            .unwrap();
        wait_for_replies(&transport, 2).await;
        tx.push(MessageEvent::group(3, "g1", "alice", "/puzzle guess kettle"))
            .await
            .unwrap();
        drop(tx);

        task.await.unwrap().unwrap();
        let replies = transport.texts_for(&ReplyTarget::Group("g1".into()));
        assert!(replies[0].starts_with("New puzzle! Category: object."));
        assert_eq!(replies[1], "Yes. (questions: 1)");
        assert!(replies[2].starts_with("Correct! The answer is Kettle."));
    }

    #[tokio::test(start_paused = true)]
    async fn source_errors_back_off_and_continue() {
        let transport = Arc::new(RecordingTransport::new());
        let runtime = builder(&transport)
            .plugin(admin_plugin())
            .build()
            .await
            .unwrap();

        let (tx, source) = channel_source(8);
        tx.disconnect("connection reset").await.unwrap();
        tx.push(MessageEvent::private(1, "root", "/token"))
            .await
            .unwrap();
        drop(tx);

        runtime
            .run_until(source, std::future::pending())
            .await
            .unwrap();
        let replies = transport.texts_for(&ReplyTarget::Private("root".into()));
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("Your token: "));
    }

    #[tokio::test]
    async fn shutdown_stops_a_live_source() {
        let transport = Arc::new(RecordingTransport::new());
        let runtime = Arc::new(builder(&transport).build().await.unwrap());

        let (_tx, source) = channel_source(1);
        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.run_until(source, std::future::pending()).await })
        };
        tokio::task::yield_now().await;
        runtime.shutdown();

        task.await.unwrap().unwrap();
        assert!(runtime.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn registers_core_services() {
        let store = Arc::new(MemoryStore::new());
        store.save("ban_list", &json!(["eve"])).await.unwrap();

        let transport = Arc::new(RecordingTransport::new());
        let runtime = builder(&transport)
            .store(store)
            .build()
            .await
            .unwrap();
        let services = runtime.services();

        assert!(services.get::<BanList>().unwrap().is_banned(&UserId::new("eve")));
        assert!(services.get::<AdminList>().unwrap().is_admin(&UserId::new("root")));
        assert_eq!(
            services.get::<TokenService>().unwrap().default_ttl(),
            Duration::from_secs(300)
        );
        assert_eq!(
            services.get::<SessionPolicy>().unwrap().idle_timeout,
            None
        );
        assert!(services.contains::<FeatureFlags>());
        assert!(services.contains::<Outbox>());
        assert!(services.contains::<dyn Transport>());
        assert!(services.contains::<dyn KvStore>());
        assert_eq!(services.sweepers().len(), 2);
    }

    #[tokio::test]
    async fn build_errors() {
        let err = RoostRuntime::builder()
            .config(test_config())
            .without_logging()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Missing("transport")));

        let transport = Arc::new(RecordingTransport::new());
        let err = builder(&transport)
            .plugins(builtin_plugins())
            .build()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Core(CoreError::NotRegistered { .. })
        ));

        let err = builder(&transport)
            .service(Arc::new(TokenService::default()))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Core(CoreError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_purges_expired_tokens() {
        let transport = Arc::new(RecordingTransport::new());
        let runtime = builder(&transport).build().await.unwrap();
        let tokens = runtime.services().get::<TokenService>().unwrap();

        tokens.issue("root", Duration::from_secs(1));
        tokens.issue("admin", Duration::from_secs(600));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(runtime.sweep().await, 1);
        assert_eq!(tokens.outstanding(), 1);
    }
}
