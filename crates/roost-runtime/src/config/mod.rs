//! Configuration for the Roost runtime.
//!
//! Files are TOML (`roost.toml`, `config.toml`), layered with `ROOST_*`
//! environment variables through figment. See [`ConfigLoader`] for the
//! source order and [`RoostConfig`] for the sections.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DispatchConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, OutboxConfig, RoostConfig,
    SessionConfig, SpanEventConfig, StorageConfig, TokenConfig,
};
pub use validation::validate_config;
