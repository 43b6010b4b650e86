//! Configuration validation utilities.

use std::collections::HashSet;

use roost_framework::MAX_TOKEN_TTL;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, RoostConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &RoostConfig) -> ConfigResult<()> {
    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }

    if config.outbox.sweep_interval_secs == 0 || config.sessions.sweep_interval_secs == 0 {
        return Err(ConfigError::validation(
            "Sweep intervals must be greater than 0",
        ));
    }

    if config.tokens.ttl_secs == 0 {
        return Err(ConfigError::validation(
            "tokens.ttl_secs must be greater than 0",
        ));
    }
    if config.tokens.ttl_secs > MAX_TOKEN_TTL.as_secs() {
        return Err(ConfigError::validation(format!(
            "tokens.ttl_secs must be at most {}",
            MAX_TOKEN_TTL.as_secs()
        )));
    }

    if config.sessions.idle_timeout_secs == Some(0) {
        return Err(ConfigError::validation(
            "sessions.idle_timeout_secs must be greater than 0 when set",
        ));
    }

    let mut seen = HashSet::new();
    for admin in &config.admins {
        if admin.trim().is_empty() {
            return Err(ConfigError::validation("Admin ids must not be empty"));
        }
        if !seen.insert(admin) {
            return Err(ConfigError::validation(format!(
                "Duplicate admin id: {admin}"
            )));
        }
    }

    for (name, section) in &config.plugins {
        if !section.is_object() {
            return Err(ConfigError::validation(format!(
                "plugins.{name} must be a table"
            )));
        }
    }

    Ok(())
}
