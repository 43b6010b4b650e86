//! # Roost
//!
//! The core of a multi-tenant chat-command service. One process serves many
//! group and private conversations at once; every event runs as its own task
//! with its context bound task-locally, so handlers never thread a context
//! parameter through their call chains.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────────────────────┐     ┌───────────┐
//! │ EventSource │────▶│ RoostRuntime │────▶│ PluginManager (per event):  │────▶│ Transport │
//! └─────────────┘     │  (one task   │     │  ExecutionContext + Reply-  │     └───────────┘
//!                     │   per event) │     │  Buffer bound task-locally  │           ▲
//!                     └──────────────┘     │  plugins run in order       │── flush ──┘
//!                                          └─────────────────────────────┘
//! ```
//!
//! - **Execution context**: who sent the event and where replies go
//!   ([`core::context`])
//! - **Reply buffer**: replies are collected per event and flushed in order,
//!   one conversation at a time ([`framework::reply`])
//! - **Service locator**: capabilities registered at startup, frozen before
//!   the first event ([`framework::ServiceLocator`])
//! - **Sessions**: per-room state with atomic start and mutate
//!   ([`framework::SessionManager`])
//! - **Tokens**: single-use, subject-bound, expiring
//!   ([`framework::TokenService`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use roost::prelude::*;
//!
//! async fn ping(ctx: Arc<ExecutionContext>) -> String {
//!     format!("pong, {}", ctx.sender_id)
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = RoostRuntime::builder()
//!         .transport(Arc::new(MyTransport::connect().await?))
//!         .plugin(plugin! {
//!             name: "ping",
//!             handlers: [on_prefix("/ping").handler(ping)],
//!         })
//!         .build()
//!         .await?;
//!
//!     runtime.run(MySource::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `command` *(default)*: clap-parsed commands (`on_command`, `CommandArgs`)
//! - `builtin-plugins` *(default)*: the `admin`, `puzzle` and `roulette` plugins
//! - `toml-config` *(default)*: `roost.toml` configuration files
//! - `json-log`: JSON log output

pub use roost_core as core;
pub use roost_framework as framework;
#[cfg(feature = "builtin-plugins")]
pub use roost_plugins as plugins;
pub use roost_runtime as runtime;

pub use roost_framework::plugin;

/// Commonly used types for building plugins and hosts.
///
/// ```rust,ignore
/// use roost::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use roost_runtime::{RoostConfig, RoostRuntime, RuntimeError, RuntimeResult};

    // Plugins and routing
    pub use roost_framework::plugin;
    pub use roost_framework::{
        Plugin, PluginBuilder, PluginLoadContext, ServiceBuilderExt, on, on_group, on_message,
        on_prefix, on_private,
    };

    // Extractors - for handler parameters
    pub use roost_framework::{Event, FromContext, PluginConfig, Reply, ServiceRef};

    #[cfg(feature = "command")]
    pub use roost_framework::{CommandArgs, on_command};

    // Services
    pub use roost_framework::{
        EndReason, FeatureFlags, ServiceRegistry, SessionManager, Token, TokenService, Transition,
    };

    // Core types and collaborator traits
    pub use roost_core::{
        AskBackend, CoreError, CoreResult, EventSource, ExecutionContext, Fragment, KvStore,
        Message, MessageEvent, ReplyTarget, Transport, UserId,
    };

    #[cfg(feature = "builtin-plugins")]
    pub use roost_plugins::builtin_plugins;
}
