//! Roost Runtime - configuration, logging, storage and the event loop.
//!
//! This crate provides:
//! - Layered configuration (`roost.toml`, `ROOST_*` env) through [`ConfigLoader`]
//! - `tracing-subscriber` setup through [`LoggingBuilder`]
//! - A file-backed [`KvStore`](roost_core::KvStore): [`JsonFileStore`]
//! - [`RoostRuntime`], which registers the core services, starts the plugins
//!   and dispatches events from an [`EventSource`](roost_core::EventSource)
//!
//! ```ignore
//! use roost_runtime::RoostRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = RoostRuntime::builder()
//!         .transport(transport)
//!         .plugins(roost_plugins::builtin_plugins())
//!         .service::<dyn AskBackend>(backend)
//!         .build()
//!         .await?;
//!
//!     // Run until the source ends or Ctrl+C
//!     runtime.run(source).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod store;

pub use config::{ConfigError, ConfigLoader, ConfigResult, Profile, RoostConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RoostRuntime, RuntimeBuilder};
pub use store::JsonFileStore;

pub use tracing;
pub use tracing_subscriber;

/// Logging macros for host code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
