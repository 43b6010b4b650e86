//! # Roost Framework
//!
//! The handler layer of the Roost chat-command service.
//!
//! This layer provides:
//! - Axum-style handlers with extractor parameters, composed with tower layers
//! - Convenience filters (`on_message`, `on_group`, `on_prefix`, `on_command`)
//! - Per-event reply buffering with ordered per-conversation flush
//! - The service locator, plugins and the [`PluginManager`] dispatcher
//! - Shared services used by plugins: per-room sessions, single-use tokens,
//!   feature flags and the ban list
//! - Clap-based command parsing (with the `command` feature)

pub mod access;
pub mod context;
pub mod error;
pub mod extractor;
pub mod features;
pub mod handler;
pub mod locator;
pub mod manager;
pub mod plugin;
pub mod reply;
pub mod routing;
pub mod session;
pub mod sweep;
pub mod testing;
pub mod token;

#[cfg(feature = "command")]
pub mod command;

pub use access::{AdminList, BAN_LIST_KEY, BanList};
pub use context::{BaseContext, HandlerContext, PluginContext};
pub use error::{EventSkipped, ExtractError, ExtractResult};
pub use extractor::{Event, FromContext, PluginConfig, Reply, ServiceRef};
pub use features::FeatureFlags;
pub use handler::{
    CompleteLayer, Completion, Handler, HandlerResponse, HandlerService, ServiceBuilderExt,
};
pub use locator::{ServiceLocator, ServiceRegistry};
pub use manager::{PluginManager, PluginManagerBuilder};
pub use plugin::{BoxedHandlerService, Capability, Plugin, PluginBuilder, PluginLoadContext};
pub use reply::{Outbox, ReplyBuffer};
pub use routing::{on, on_group, on_message, on_prefix, on_private};
pub use session::{EndReason, SessionInfo, SessionManager, SessionPhase, SessionPolicy, Transition};
pub use sweep::Sweep;
pub use token::{DEFAULT_TOKEN_TTL, MAX_TOKEN_TTL, Token, TokenService};

#[cfg(feature = "command")]
pub use command::{CommandArgs, CommandLayer, on_command};
