//! Who may use the bot: the persisted ban list and the static admin list.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use roost_core::{CoreResult, KvStore, UserId};

/// Store key of the persisted ban list.
pub const BAN_LIST_KEY: &str = "ban_list";

/// Banned users, persisted through a [`KvStore`].
///
/// Changes are serialized and only become visible once the store accepted
/// them, so the persisted list never lags behind or loses a concurrent edit.
pub struct BanList {
    banned: RwLock<BTreeSet<String>>,
    store: Arc<dyn KvStore>,
    writer: AsyncMutex<()>,
}

impl BanList {
    /// Creates an empty list backed by `store`. Call [`load`](Self::load) to
    /// restore persisted entries.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            banned: RwLock::new(BTreeSet::new()),
            store,
            writer: AsyncMutex::new(()),
        }
    }

    /// Replaces the in-memory list with the persisted one.
    ///
    /// Returns the number of entries loaded.
    pub async fn load(&self) -> CoreResult<usize> {
        let _writer = self.writer.lock().await;
        let loaded: BTreeSet<String> = match self.store.load(BAN_LIST_KEY).await? {
            Some(value) => serde_json::from_value(value)?,
            None => BTreeSet::new(),
        };
        let count = loaded.len();
        *self.banned.write() = loaded;
        info!(count, "Ban list loaded");
        Ok(count)
    }

    pub fn is_banned(&self, user: &UserId) -> bool {
        self.banned.read().contains(user.as_str())
    }

    /// Bans `user`. Returns `false` if they were already banned.
    ///
    /// A store failure leaves the list unchanged.
    pub async fn ban(&self, user: &UserId) -> CoreResult<bool> {
        let changed = self.update(|banned| banned.insert(user.to_string())).await?;
        if changed {
            info!(user = %user, "User banned");
        }
        Ok(changed)
    }

    /// Lifts a ban. Returns `false` if `user` was not banned.
    pub async fn unban(&self, user: &UserId) -> CoreResult<bool> {
        let changed = self.update(|banned| banned.remove(user.as_str())).await?;
        if changed {
            info!(user = %user, "User unbanned");
        }
        Ok(changed)
    }

    /// Banned user ids, sorted.
    pub fn list(&self) -> Vec<String> {
        self.banned.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.banned.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.read().is_empty()
    }

    /// Applies `edit` to a copy, saves it, then publishes it.
    async fn update<F>(&self, edit: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut BTreeSet<String>) -> bool,
    {
        let _writer = self.writer.lock().await;
        let mut next = self.banned.read().clone();
        if !edit(&mut next) {
            return Ok(false);
        }
        self.store
            .save(BAN_LIST_KEY, &serde_json::to_value(&next)?)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to persist ban list"))?;
        *self.banned.write() = next;
        Ok(true)
    }
}

impl std::fmt::Debug for BanList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BanList")
            .field("banned", &self.len())
            .finish_non_exhaustive()
    }
}

/// Users allowed to request admin tokens. Fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    admins: BTreeSet<String>,
}

impl AdminList {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.admins.contains(user.as_str())
    }

    pub fn len(&self) -> usize {
        self.admins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use roost_core::{CoreError, MemoryStore};
    use serde_json::{Value, json};

    use super::*;

    #[tokio::test]
    async fn ban_persists_through_store() {
        let store = Arc::new(MemoryStore::new());
        let bans = BanList::new(store.clone());
        let alice = UserId::new("alice");

        assert!(bans.ban(&alice).await.unwrap());
        assert!(!bans.ban(&alice).await.unwrap());
        assert!(bans.is_banned(&alice));
        assert_eq!(store.load(BAN_LIST_KEY).await.unwrap(), Some(json!(["alice"])));

        let restored = BanList::new(store.clone());
        assert_eq!(restored.load().await.unwrap(), 1);
        assert!(restored.is_banned(&alice));

        assert!(restored.unban(&alice).await.unwrap());
        assert!(!restored.unban(&alice).await.unwrap());
        assert!(restored.is_empty());
        assert_eq!(store.load(BAN_LIST_KEY).await.unwrap(), Some(json!([])));
    }

    /// Delays the first save so a later one can overtake it.
    #[derive(Default)]
    struct SlowFirstSave {
        inner: MemoryStore,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for SlowFirstSave {
        async fn load(&self, key: &str) -> CoreResult<Option<Value>> {
            self.inner.load(key).await
        }

        async fn save(&self, key: &str, value: &Value) -> CoreResult<()> {
            if self.saves.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.inner.save(key, value).await
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        async fn load(&self, _key: &str) -> CoreResult<Option<Value>> {
            Ok(None)
        }

        async fn save(&self, _key: &str, _value: &Value) -> CoreResult<()> {
            Err(CoreError::storage("disk full"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_bans_are_all_persisted() {
        let store = Arc::new(SlowFirstSave::default());
        let bans = Arc::new(BanList::new(store.clone()));

        let first = tokio::spawn({
            let bans = Arc::clone(&bans);
            async move { bans.ban(&UserId::new("alice")).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        let second = tokio::spawn({
            let bans = Arc::clone(&bans);
            async move { bans.ban(&UserId::new("bob")).await }
        });

        assert_eq!(first.await.unwrap(), Ok(true));
        assert_eq!(second.await.unwrap(), Ok(true));
        assert_eq!(bans.list(), vec!["alice", "bob"]);
        assert_eq!(
            store.load(BAN_LIST_KEY).await.unwrap(),
            Some(json!(["alice", "bob"]))
        );
    }

    #[tokio::test]
    async fn failed_save_leaves_list_unchanged() {
        let bans = BanList::new(Arc::new(BrokenStore));
        let err = bans.ban(&UserId::new("eve")).await.unwrap_err();
        assert_eq!(err.kind(), roost_core::ErrorKind::Storage);
        assert!(!bans.is_banned(&UserId::new("eve")));
        assert!(bans.is_empty());
    }

    #[tokio::test]
    async fn malformed_store_entry_is_storage_error() {
        let store = Arc::new(MemoryStore::new());
        store.save(BAN_LIST_KEY, &json!({"not": "a list"})).await.unwrap();
        let err = BanList::new(store).load().await.unwrap_err();
        assert_eq!(err.kind(), roost_core::ErrorKind::Storage);
    }

    #[test]
    fn admin_membership() {
        let admins = AdminList::new(["root"]);
        assert!(admins.is_admin(&UserId::new("root")));
        assert!(!admins.is_admin(&UserId::new("guest")));
    }
}
