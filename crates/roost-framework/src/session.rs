//! Per-room session state for turn-based features.
//!
//! A [`SessionManager<S>`] holds at most one live session per room for one
//! feature. Each room has its own async lock, so rooms progress
//! independently while calls for the same room are strictly serialized.
//!
//! The state is only reachable inside a mutator closure. A mutator returns a
//! [`Transition`]: `Continue` keeps the session, `End` removes it in the same
//! critical section. A turn that detects a win can therefore end the game
//! atomically:
//!
//! ```rust,ignore
//! let outcome = games.mutate(room, |state| {
//!     state.guesses += 1;
//!     if state.is_answer(guess) {
//!         Transition::End(EndReason::Success, Outcome::Won(state.guesses))
//!     } else {
//!         Transition::Continue(Outcome::Miss)
//!     }
//! }).await?;
//! ```
//!
//! # Phases
//!
//! ```text
//! get_or_create / start ──► Created ──mutate(Continue)──► Active ──┐
//!                                                       ▲         │ Continue
//!                                                       └─────────┘
//!            mutate(End) / end() / idle timeout ──► Ended (removed)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info};

use roost_core::{CoreError, CoreResult};

use crate::sweep::Sweep;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    /// The players won.
    Success,
    /// The answer was revealed on request.
    Reveal,
    /// The game was dropped (quit, replaced, idle).
    Abandon,
}

/// Outcome of a mutator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<R> {
    /// Keep the session.
    Continue(R),
    /// Remove the session.
    End(EndReason, R),
}

impl<R> Transition<R> {
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End(..))
    }

    pub fn into_inner(self) -> R {
        match self {
            Self::Continue(r) | Self::End(_, r) => r,
        }
    }
}

/// Observable phase of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, no turn played yet.
    Created,
    /// At least one turn played.
    Active,
}

/// Metadata of a session; the state itself never leaves the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub room_id: String,
    pub phase: SessionPhase,
    pub version: u64,
    pub created_at: Instant,
    pub last_active: Instant,
    /// `true` if this call created the session.
    pub created: bool,
}

struct Session<S> {
    room_id: String,
    state: S,
    created_at: Instant,
    last_active: Instant,
    version: u64,
}

impl<S> Session<S> {
    fn new(room_id: &str, state: S, now: Instant) -> Self {
        Self {
            room_id: room_id.to_string(),
            state,
            created_at: now,
            last_active: now,
            version: 0,
        }
    }

    fn info(&self, created: bool) -> SessionInfo {
        SessionInfo {
            room_id: self.room_id.clone(),
            phase: if self.version == 0 {
                SessionPhase::Created
            } else {
                SessionPhase::Active
            },
            version: self.version,
            created_at: self.created_at,
            last_active: self.last_active,
            created,
        }
    }
}

type Slot<S> = Arc<AsyncMutex<Option<Session<S>>>>;

// =============================================================================
// SessionManager
// =============================================================================

/// Process-wide session settings, registered by the runtime so plugins can
/// build their managers from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPolicy {
    pub idle_timeout: Option<Duration>,
}

/// Keyed store of live sessions for one feature.
pub struct SessionManager<S> {
    feature: &'static str,
    slots: Mutex<HashMap<String, Slot<S>>>,
    idle_timeout: Option<Duration>,
}

impl<S: Send + 'static> SessionManager<S> {
    /// Creates a manager without idle eviction.
    pub fn new(feature: &'static str) -> Self {
        Self {
            feature,
            slots: Mutex::new(HashMap::new()),
            idle_timeout: None,
        }
    }

    /// Treats sessions untouched for `timeout` as ended.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn feature(&self) -> &'static str {
        self.feature
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    // ─── Slot bookkeeping ────────────────────────────────────────────────────

    fn slot(&self, room: &str) -> Slot<S> {
        Arc::clone(self.slots.lock().entry(room.to_string()).or_default())
    }

    fn existing(&self, room: &str) -> Option<Slot<S>> {
        self.slots.lock().get(room).cloned()
    }

    /// Drops the map entry for an empty slot nobody else is holding.
    ///
    /// Must be called with the slot guard held and the slot empty.
    fn release(&self, room: &str, slot: &Slot<S>) {
        let mut slots = self.slots.lock();
        // map + caller
        if Arc::strong_count(slot) == 2 && slots.get(room).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(room);
        }
    }

    fn is_idle(&self, session: &Session<S>, now: Instant) -> bool {
        self.idle_timeout
            .is_some_and(|t| now.duration_since(session.last_active) >= t)
    }

    /// Clears an idle session, then returns the live one or releases the slot.
    fn live<'g>(
        &self,
        room: &str,
        slot: &Slot<S>,
        guard: &'g mut Option<Session<S>>,
    ) -> CoreResult<&'g mut Session<S>> {
        if guard.as_ref().is_some_and(|s| self.is_idle(s, Instant::now())) {
            *guard = None;
            info!(feature = self.feature, room, "Session expired after idle timeout");
        }
        match guard.as_mut() {
            Some(session) => Ok(session),
            None => {
                self.release(room, slot);
                Err(CoreError::no_session(room))
            }
        }
    }

    fn commit<R>(
        &self,
        room: &str,
        slot: &Slot<S>,
        guard: &mut Option<Session<S>>,
        transition: Transition<R>,
    ) -> R {
        match transition {
            Transition::Continue(r) => {
                if let Some(session) = guard.as_mut() {
                    session.version += 1;
                    session.last_active = Instant::now();
                }
                r
            }
            Transition::End(reason, r) => {
                *guard = None;
                self.release(room, slot);
                info!(feature = self.feature, room, ?reason, "Session ended");
                r
            }
        }
    }

    // ─── Operations ──────────────────────────────────────────────────────────

    /// Returns the room's session, creating it with `factory` if absent.
    pub async fn get_or_create<F>(&self, room: &str, factory: F) -> CoreResult<SessionInfo>
    where
        F: FnOnce() -> S,
    {
        self.try_get_or_create(room, || Ok(factory())).await
    }

    /// Like [`get_or_create`](Self::get_or_create) with a fallible factory.
    ///
    /// A failing factory leaves the room without a session.
    pub async fn try_get_or_create<F>(&self, room: &str, factory: F) -> CoreResult<SessionInfo>
    where
        F: FnOnce() -> CoreResult<S>,
    {
        let slot = self.slot(room);
        let mut guard = slot.lock().await;
        let now = Instant::now();
        if guard.as_ref().is_some_and(|s| self.is_idle(s, now)) {
            *guard = None;
        }
        if let Some(session) = guard.as_ref() {
            return Ok(session.info(false));
        }
        match factory() {
            Ok(state) => {
                let session = guard.insert(Session::new(room, state, now));
                info!(feature = self.feature, room, "Session created");
                Ok(session.info(true))
            }
            Err(e) => {
                self.release(room, &slot);
                Err(e)
            }
        }
    }

    /// Starts a fresh session, replacing any running one.
    ///
    /// Returns the state of the replaced session, if one was live.
    pub async fn start(&self, room: &str, state: S) -> CoreResult<Option<S>> {
        let slot = self.slot(room);
        let mut guard = slot.lock().await;
        let now = Instant::now();
        let previous = guard
            .replace(Session::new(room, state, now))
            .filter(|s| !self.is_idle(s, now))
            .map(|s| s.state);
        info!(
            feature = self.feature,
            room,
            replaced = previous.is_some(),
            "Session started"
        );
        Ok(previous)
    }

    /// Runs `f` against the room's state under the room lock.
    ///
    /// Fails with [`CoreError::NoActiveSession`] when the room has no session.
    pub async fn mutate<R, F>(&self, room: &str, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut S) -> Transition<R>,
    {
        let slot = self.existing(room).ok_or_else(|| CoreError::no_session(room))?;
        let mut guard = slot.lock().await;
        let session = self.live(room, &slot, &mut guard)?;
        let transition = f(&mut session.state);
        Ok(self.commit(room, &slot, &mut guard, transition))
    }

    /// Like [`mutate`](Self::mutate) for mutators that await.
    ///
    /// The room stays locked for the whole future, so other calls for the
    /// same room wait until it has committed.
    pub async fn mutate_async<R, F>(&self, room: &str, f: F) -> CoreResult<R>
    where
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Transition<R>>,
    {
        let slot = self.existing(room).ok_or_else(|| CoreError::no_session(room))?;
        let mut guard = slot.lock().await;
        let session = self.live(room, &slot, &mut guard)?;
        let transition = f(&mut session.state).await;
        Ok(self.commit(room, &slot, &mut guard, transition))
    }

    /// Read-only access to the room's state.
    pub async fn inspect<R, F>(&self, room: &str, f: F) -> CoreResult<R>
    where
        F: FnOnce(&S) -> R,
    {
        let slot = self.existing(room).ok_or_else(|| CoreError::no_session(room))?;
        let mut guard = slot.lock().await;
        let session = self.live(room, &slot, &mut guard)?;
        Ok(f(&session.state))
    }

    /// Removes the room's session. Ending an absent session is a no-op.
    ///
    /// Returns `true` if a session was removed.
    pub async fn end(&self, room: &str) -> bool {
        let Some(slot) = self.existing(room) else {
            return false;
        };
        let mut guard = slot.lock().await;
        let removed = guard.take().is_some();
        self.release(room, &slot);
        if removed {
            info!(feature = self.feature, room, reason = ?EndReason::Abandon, "Session ended");
        }
        removed
    }

    /// Returns `true` if the room has a live session.
    pub async fn is_active(&self, room: &str) -> bool {
        self.inspect(room, |_| ()).await.is_ok()
    }

    /// Number of rooms with a session (busy rooms count as live).
    pub fn active_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.try_lock().map(|g| g.is_some()).unwrap_or(true))
            .count()
    }

    /// Rooms with a session, sorted.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.try_lock().map(|g| g.is_some()).unwrap_or(true))
            .map(|(room, _)| room.clone())
            .collect();
        rooms.sort_unstable();
        rooms
    }

    /// Removes sessions idle past the timeout and prunes empty slots.
    ///
    /// Busy rooms are skipped. Returns the number of expired sessions.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let timeout = self.idle_timeout;
        let mut expired = 0;
        self.slots.lock().retain(|room, slot| {
            let Ok(mut guard) = slot.try_lock() else {
                return true;
            };
            if let (Some(t), Some(session)) = (timeout, guard.as_ref())
                && now.duration_since(session.last_active) >= t
            {
                *guard = None;
                expired += 1;
                info!(feature = self.feature, room = %room, "Session expired after idle timeout");
            }
            guard.is_some() || Arc::strong_count(slot) > 1
        });
        if expired > 0 {
            debug!(feature = self.feature, expired, "Idle sessions swept");
        }
        expired
    }
}

#[async_trait]
impl<S: Send + 'static> Sweep for SessionManager<S> {
    fn name(&self) -> &str {
        self.feature
    }

    async fn sweep(&self) -> usize {
        self.sweep_idle()
    }
}

impl<S> std::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("feature", &self.feature)
            .field("rooms", &self.slots.lock().len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let games = SessionManager::<u32>::new("test");
        let first = games.get_or_create("A", || 1).await.unwrap();
        let second = games.get_or_create("A", || 99).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.phase, SessionPhase::Created);
        assert_eq!(games.inspect("A", |s| *s).await, Ok(1));
    }

    #[tokio::test]
    async fn mutate_without_session_fails() {
        let games = SessionManager::<u32>::new("test");
        let err = games
            .mutate("nowhere", |s| Transition::Continue(*s))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::no_session("nowhere"));
        assert!(games.rooms().is_empty());
    }

    #[tokio::test]
    async fn continue_bumps_version_and_phase() {
        let games = SessionManager::<u32>::new("test");
        games.get_or_create("A", || 0).await.unwrap();
        games
            .mutate("A", |s| {
                *s += 1;
                Transition::Continue(())
            })
            .await
            .unwrap();
        let info = games.get_or_create("A", || 0).await.unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.phase, SessionPhase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn same_room_mutations_never_interleave() {
        let games = SessionManager::<u32>::new("test");
        games.get_or_create("A", || 0).await.unwrap();

        fn slow_increment(s: &mut u32) -> BoxFuture<'_, Transition<u32>> {
            async move {
                let seen = *s;
                tokio::time::sleep(Duration::from_millis(20)).await;
                *s = seen + 1;
                Transition::Continue(seen)
            }
            .boxed()
        }
        let (first, second) = tokio::join!(
            games.mutate_async("A", slow_increment),
            games.mutate_async("A", slow_increment),
        );
        let mut seen = vec![first.unwrap(), second.unwrap()];
        seen.sort_unstable();
        assert_eq!(seen, [0, 1]);
        assert_eq!(games.inspect("A", |s| *s).await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn different_rooms_do_not_block() {
        let games = SessionManager::<u32>::new("test");
        games.get_or_create("A", || 0).await.unwrap();
        games.get_or_create("B", || 0).await.unwrap();

        let start = Instant::now();
        let slow = games.mutate_async("A", |s| {
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                *s += 1;
                Transition::Continue(())
            }
            .boxed()
        });
        let fast = async {
            games
                .mutate("B", |s| {
                    *s += 1;
                    Transition::Continue(())
                })
                .await
                .unwrap();
            start.elapsed()
        };
        let (slow_res, fast_elapsed) = tokio::join!(slow, fast);
        slow_res.unwrap();
        assert!(fast_elapsed < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn end_transition_removes_session() {
        let games = SessionManager::<String>::new("test");
        games.get_or_create("A", || "secret".to_string()).await.unwrap();

        let won = games
            .mutate("A", |answer| {
                if answer == "secret" {
                    Transition::End(EndReason::Success, true)
                } else {
                    Transition::Continue(false)
                }
            })
            .await;
        assert_eq!(won, Ok(true));

        for _ in 0..3 {
            let again = games.mutate("A", |_| Transition::Continue(())).await;
            assert_eq!(again, Err(CoreError::no_session("A")));
        }
        assert_eq!(games.active_count(), 0);
        assert!(games.rooms().is_empty());
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let games = SessionManager::<u32>::new("test");
        assert!(!games.end("A").await);
        games.get_or_create("A", || 0).await.unwrap();
        assert!(games.is_active("A").await);
        assert!(games.end("A").await);
        assert!(!games.end("A").await);
        assert!(!games.is_active("A").await);
    }

    #[tokio::test]
    async fn start_replaces_running_session() {
        let games = SessionManager::<u32>::new("test");
        assert_eq!(games.start("A", 1).await, Ok(None));
        assert_eq!(games.start("A", 2).await, Ok(Some(1)));
        assert_eq!(games.inspect("A", |s| *s).await, Ok(2));
    }

    #[tokio::test]
    async fn failing_factory_leaves_no_session() {
        let games = SessionManager::<u32>::new("test");
        let err = games
            .try_get_or_create("A", || Err(CoreError::configuration("empty")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), roost_core::ErrorKind::Configuration);
        assert!(!games.is_active("A").await);
        assert!(games.rooms().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rooms_stay_isolated_under_interleaving() {
        let games = Arc::new(SessionManager::<Vec<String>>::new("test"));
        let (a, b) = tokio::join!(
            games.get_or_create("A", Vec::new),
            games.get_or_create("B", Vec::new),
        );
        assert!(a.unwrap().created && b.unwrap().created);

        let mut handles = Vec::new();
        for i in 0..100 {
            for room in ["A", "B"] {
                let games = Arc::clone(&games);
                handles.push(tokio::spawn(async move {
                    games
                        .mutate(room, |log| {
                            log.push(format!("{room}-{i}"));
                            Transition::Continue(())
                        })
                        .await
                }));
            }
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        for room in ["A", "B"] {
            let log = games.inspect(room, Clone::clone).await.unwrap();
            assert_eq!(log.len(), 100);
            assert!(log.iter().all(|entry| entry.starts_with(&format!("{room}-"))));
            let info = games.get_or_create(room, Vec::new).await.unwrap();
            assert_eq!(info.version, 100);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire() {
        let games =
            SessionManager::<u32>::new("test").with_idle_timeout(Some(Duration::from_secs(60)));
        games.get_or_create("A", || 0).await.unwrap();
        games.get_or_create("B", || 0).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        games.mutate("B", |_| Transition::Continue(())).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(
            games.mutate("A", |_| Transition::Continue(())).await,
            Err(CoreError::no_session("A"))
        );
        assert!(games.is_active("B").await);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(games.sweep_idle(), 1);
        assert_eq!(games.active_count(), 0);
    }

    #[tokio::test]
    async fn no_idle_timeout_means_no_eviction() {
        let games = SessionManager::<u32>::new("test");
        games.get_or_create("A", || 0).await.unwrap();
        assert_eq!(games.sweep_idle(), 0);
        assert!(games.is_active("A").await);
    }
}
