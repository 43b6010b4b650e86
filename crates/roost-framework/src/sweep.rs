//! Periodic maintenance hook.
//!
//! Services with lazily-expiring state (tokens, idle sessions, outbox gates)
//! implement [`Sweep`]; the runtime calls every registered sweeper on an
//! interval without knowing the concrete service types.

use async_trait::async_trait;

#[async_trait]
pub trait Sweep: Send + Sync + 'static {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Drops expired entries and returns how many were removed.
    async fn sweep(&self) -> usize;
}
