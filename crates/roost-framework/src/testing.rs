//! Test doubles for the transport and backends, plus a dispatch harness.
//!
//! Shipped with the crate so plugin crates and demos can exercise handlers
//! without a real chat connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use roost_core::{
    AskBackend, CoreError, CoreResult, Dispatcher, Fragment, MessageEvent, ReplyTarget, Transport,
};

use crate::locator::ServiceRegistry;
use crate::manager::PluginManager;
use crate::plugin::Plugin;
use crate::reply::Outbox;

/// A [`Transport`] that records every delivered fragment.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ReplyTarget, Fragment)>>,
    attempts: Mutex<usize>,
    delay: Option<Duration>,
    fail_on: Option<usize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` inside every send.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails the send attempt with the given zero-based index, once.
    pub fn fail_on(mut self, attempt: usize) -> Self {
        self.fail_on = Some(attempt);
        self
    }

    /// Everything delivered so far, in delivery order.
    pub fn sent(&self) -> Vec<(ReplyTarget, Fragment)> {
        self.sent.lock().clone()
    }

    /// Text of every fragment delivered to `target`.
    pub fn texts_for(&self, target: &ReplyTarget) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, f)| f.display())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, target: &ReplyTarget, fragment: &Fragment) -> CoreResult<()> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let n = *attempts;
            *attempts += 1;
            n
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(attempt) {
            return Err(CoreError::transport("connection reset"));
        }
        self.sent.lock().push((target.clone(), fragment.clone()));
        Ok(())
    }
}

/// An [`AskBackend`] that replays scripted answers.
///
/// Once the script runs out every call fails with a backend error.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    answers: Mutex<VecDeque<CoreResult<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| Ok(a.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queues a failure.
    pub fn then_fail(self, msg: &str) -> Self {
        self.answers.lock().push_back(Err(CoreError::backend(msg)));
        self
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl AskBackend for ScriptedBackend {
    async fn ask(&self, prompt: &str) -> CoreResult<String> {
        self.prompts.lock().push(prompt.to_string());
        self.answers
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::backend("script exhausted")))
    }
}

/// A [`PluginManager`] wired to a [`RecordingTransport`].
pub struct TestHarness {
    pub transport: Arc<RecordingTransport>,
    pub manager: PluginManager,
}

impl TestHarness {
    pub fn new(plugins: Vec<Plugin>, registry: ServiceRegistry) -> CoreResult<Self> {
        Self::with_configs(plugins, registry, HashMap::new())
    }

    /// Like [`new`](Self::new) with per-plugin config sections.
    pub fn with_configs(
        plugins: Vec<Plugin>,
        registry: ServiceRegistry,
        configs: HashMap<String, Value>,
    ) -> CoreResult<Self> {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = Arc::new(Outbox::new(transport.clone()));
        let manager = PluginManager::builder(outbox)
            .registry(registry)
            .plugins(plugins)
            .plugin_configs(configs)
            .build()?;
        Ok(Self { transport, manager })
    }

    /// Dispatches one event and waits for its replies to be flushed.
    pub async fn send(&self, event: MessageEvent) -> CoreResult<()> {
        self.manager.dispatch(event).await
    }
}
