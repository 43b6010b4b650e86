//! Single-use, time-limited tokens.
//!
//! A token binds a random value to a subject (usually a user id). Issuing a
//! new token for a subject revokes the previous one, and a token is consumed
//! by its first successful validation.
//!
//! Validation outcome, checked in this order:
//!
//! | state                   | result                     |
//! |-------------------------|----------------------------|
//! | unknown value           | [`CoreError::NotFound`]    |
//! | past `expires_at`       | [`CoreError::Expired`]     |
//! | already consumed        | [`CoreError::AlreadyUsed`] |
//! | otherwise               | `Ok(subject)`, consumed    |
//!
//! Expiry is evaluated lazily against the clock; [`TokenService::purge_expired`]
//! only reclaims memory.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use roost_core::{CoreError, CoreResult};

use crate::sweep::Sweep;

/// Default lifetime of an issued token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// Longest lifetime a token can have; longer requests are clamped.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const TOKEN_BYTES: usize = 16;

/// An issued token, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub subject_id: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

#[derive(Debug)]
struct Record {
    subject_id: String,
    expires_at: Instant,
    used: bool,
}

#[derive(Debug, Default)]
struct Tables {
    by_value: HashMap<String, Record>,
    /// Subject to its most recent token value.
    by_subject: HashMap<String, String>,
}

impl Tables {
    fn unlink(&mut self, value: &str) -> Option<Record> {
        let record = self.by_value.remove(value)?;
        if self.by_subject.get(&record.subject_id).map(String::as_str) == Some(value) {
            self.by_subject.remove(&record.subject_id);
        }
        Some(record)
    }
}

/// Issues and validates tokens. All operations are atomic.
#[derive(Debug)]
pub struct TokenService {
    tables: Mutex<Tables>,
    default_ttl: Duration,
}

impl Default for TokenService {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

impl TokenService {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Issues a token for `subject_id`, revoking its previous one.
    ///
    /// `ttl` is capped at [`MAX_TOKEN_TTL`].
    pub fn issue(&self, subject_id: &str, ttl: Duration) -> Token {
        let value = URL_SAFE_NO_PAD.encode(rand::random::<[u8; TOKEN_BYTES]>());
        let issued_at = Instant::now();
        let ttl = ttl.min(MAX_TOKEN_TTL);
        let expires_at = issued_at.checked_add(ttl).unwrap_or(issued_at);

        let mut tables = self.tables.lock();
        if let Some(previous) = tables
            .by_subject
            .insert(subject_id.to_string(), value.clone())
        {
            tables.by_value.remove(&previous);
        }
        tables.by_value.insert(
            value.clone(),
            Record {
                subject_id: subject_id.to_string(),
                expires_at,
                used: false,
            },
        );
        drop(tables);

        info!(subject = subject_id, ttl_secs = ttl.as_secs(), "Token issued");
        Token {
            value,
            subject_id: subject_id.to_string(),
            issued_at,
            expires_at,
        }
    }

    /// Issues a token with the default lifetime.
    pub fn issue_default(&self, subject_id: &str) -> Token {
        self.issue(subject_id, self.default_ttl)
    }

    /// Validates and consumes `value`, returning its subject.
    pub fn validate(&self, value: &str) -> CoreResult<String> {
        self.check(value, None)
    }

    /// Validates `value` only if it was issued to `subject_id`.
    ///
    /// A token presented by someone else is reported as [`CoreError::NotFound`]
    /// and stays valid for its owner.
    pub fn validate_for(&self, value: &str, subject_id: &str) -> CoreResult<()> {
        self.check(value, Some(subject_id)).map(|_| ())
    }

    fn check(&self, value: &str, expected: Option<&str>) -> CoreResult<String> {
        let now = Instant::now();
        let mut tables = self.tables.lock();
        let record = tables.by_value.get_mut(value).ok_or(CoreError::NotFound)?;
        if expected.is_some_and(|subject| subject != record.subject_id) {
            debug!(
                subject = %record.subject_id,
                "Token presented by another subject"
            );
            return Err(CoreError::NotFound);
        }
        if now >= record.expires_at {
            return Err(CoreError::Expired);
        }
        if record.used {
            return Err(CoreError::AlreadyUsed);
        }
        record.used = true;
        info!(subject = %record.subject_id, "Token consumed");
        Ok(record.subject_id.clone())
    }

    /// Revokes the current token of `subject_id`. Returns `true` if one existed.
    pub fn revoke(&self, subject_id: &str) -> bool {
        let mut tables = self.tables.lock();
        let Some(value) = tables.by_subject.remove(subject_id) else {
            return false;
        };
        tables.by_value.remove(&value).is_some()
    }

    /// Time left on the current token of `subject_id`, if it is still usable.
    pub fn remaining(&self, subject_id: &str) -> Option<Duration> {
        let now = Instant::now();
        let tables = self.tables.lock();
        let value = tables.by_subject.get(subject_id)?;
        let record = tables.by_value.get(value)?;
        (!record.used && now < record.expires_at).then(|| record.expires_at - now)
    }

    /// Returns `true` if `subject_id` holds an unused, unexpired token.
    pub fn has_valid(&self, subject_id: &str) -> bool {
        self.remaining(subject_id).is_some()
    }

    /// Number of stored records, including used and expired ones.
    pub fn outstanding(&self) -> usize {
        self.tables.lock().by_value.len()
    }

    /// Drops expired records. Used but unexpired records are kept so a replay
    /// still reports [`CoreError::AlreadyUsed`].
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut tables = self.tables.lock();
        let expired: Vec<String> = tables
            .by_value
            .iter()
            .filter(|(_, r)| now >= r.expires_at)
            .map(|(v, _)| v.clone())
            .collect();
        for value in &expired {
            tables.unlink(value);
        }
        if !expired.is_empty() {
            debug!(purged = expired.len(), "Expired tokens purged");
        }
        expired.len()
    }
}

#[async_trait]
impl Sweep for TokenService {
    fn name(&self) -> &str {
        "tokens"
    }

    async fn sweep(&self) -> usize {
        self.purge_expired()
    }
}
