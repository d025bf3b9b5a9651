//! Partitioned record storage.
//!
//! Every collection lives in a partition addressed by `(user, kind)`. A replace
//! swaps the whole partition; readers see either the old or the new contents.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::SyncError;
use crate::model::{Collection, CollectionKind, UserId};

pub trait RecordStore: Send + Sync + 'static {
    /// Replaces every record of `collection.kind()` owned by `user_id` and
    /// returns the number of records stored.
    fn replace_collection(
        &self,
        user_id: &UserId,
        collection: Collection,
    ) -> impl Future<Output = Result<usize, SyncError>> + Send;

    fn fetch_collection(
        &self,
        user_id: &UserId,
        kind: CollectionKind,
    ) -> impl Future<Output = Result<Collection, SyncError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub user_id: UserId,
    pub kind: CollectionKind,
}

impl PartitionKey {
    pub fn new(user_id: &UserId, kind: CollectionKind) -> Self {
        Self {
            user_id: user_id.clone(),
            kind,
        }
    }
}

const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// One async lock per partition. Writers to different partitions never wait
/// on each other here.
#[derive(Default)]
pub struct PartitionLocks {
    locks: Mutex<HashMap<PartitionKey, Arc<AsyncMutex<()>>>>,
}

impl PartitionLocks {
    pub async fn acquire(&self, key: PartitionKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= LOCK_PRUNE_THRESHOLD {
                // only this map holds a reference: nobody is waiting or writing
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Slot = Arc<RwLock<Option<Arc<Collection>>>>;

/// In-process store. Each partition has its own slot lock; the directory
/// lock is taken exclusively only the first time a partition is written.
/// Collections are immutable once written and replaced by swapping the `Arc`,
/// so a reader clones whichever version was current.
pub struct MemoryStore {
    partitions: RwLock<HashMap<PartitionKey, Slot>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while unavailable every operation fails with
    /// `StorageUnavailable` and nothing is mutated.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), SyncError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::storage(anyhow::anyhow!("memory store is offline")))
        }
    }

    fn slot(&self, key: &PartitionKey) -> Option<Slot> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn slot_or_create(&self, key: PartitionKey) -> Slot {
        if let Some(slot) = self.slot(&key) {
            return slot;
        }
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RecordStore for MemoryStore {
    async fn replace_collection(
        &self,
        user_id: &UserId,
        collection: Collection,
    ) -> Result<usize, SyncError> {
        self.check_available()?;

        let slot = self.slot_or_create(PartitionKey::new(user_id, collection.kind()));
        let count = collection.len();
        let collection = collection.owned_by(user_id);
        let next = if collection.is_empty() {
            None
        } else {
            Some(Arc::new(collection))
        };

        *slot.write().unwrap_or_else(PoisonError::into_inner) = next;

        Ok(count)
    }

    async fn fetch_collection(
        &self,
        user_id: &UserId,
        kind: CollectionKind,
    ) -> Result<Collection, SyncError> {
        self.check_available()?;

        let current = match self.slot(&PartitionKey::new(user_id, kind)) {
            Some(slot) => {
                let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
                guard.clone()
            }
            None => None,
        };

        Ok(match current {
            Some(collection) => collection.as_ref().clone(),
            None => kind.empty(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Annotation, Bookmark};
    use std::time::Duration;

    pub(crate) fn bookmark(id: &str, chapter: u32, verse: u32) -> Bookmark {
        Bookmark {
            user_id: String::new(),
            id: id.to_string(),
            book: "Genesis".to_string(),
            chapter,
            verse,
            text: format!("Genesis {chapter}:{verse}"),
        }
    }

    pub(crate) fn annotation(key: &str, color: &str) -> Annotation {
        Annotation {
            user_id: String::new(),
            key: key.to_string(),
            note: format!("note on {key}"),
            color: color.to_string(),
            html: None,
        }
    }

    pub(crate) fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_of_unknown_partition_is_empty() {
        let store = MemoryStore::new();
        let got = store
            .fetch_collection(&user("u1"), CollectionKind::Bookmarks)
            .await
            .unwrap();
        assert_eq!(got, Collection::Bookmarks(vec![]));
    }

    #[tokio::test]
    async fn test_replace_overwrites_previous_contents() {
        let store = MemoryStore::new();
        let u1 = user("u1");

        store
            .replace_collection(
                &u1,
                Collection::Bookmarks(vec![bookmark("a", 1, 1), bookmark("b", 1, 2)]),
            )
            .await
            .unwrap();
        let count = store
            .replace_collection(&u1, Collection::Bookmarks(vec![bookmark("c", 2, 3)]))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let got = store.fetch_collection(&u1, CollectionKind::Bookmarks).await.unwrap();
        let mut expected = bookmark("c", 2, 3);
        expected.user_id = "u1".into();
        assert_eq!(got, Collection::Bookmarks(vec![expected]));
    }

    #[tokio::test]
    async fn test_empty_replace_clears_partition() {
        let store = MemoryStore::new();
        let u1 = user("u1");

        store
            .replace_collection(&u1, Collection::Annotations(vec![annotation("John-1-1", "red")]))
            .await
            .unwrap();
        let count = store
            .replace_collection(&u1, CollectionKind::Annotations.empty())
            .await
            .unwrap();
        assert_eq!(count, 0);

        let got = store.fetch_collection(&u1, CollectionKind::Annotations).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_partitions_are_isolated_by_user_and_kind() {
        let store = MemoryStore::new();
        let (a, b) = (user("alice"), user("bob"));

        store
            .replace_collection(&b, Collection::Bookmarks(vec![bookmark("b1", 1, 1)]))
            .await
            .unwrap();
        store
            .replace_collection(&a, Collection::Bookmarks(vec![bookmark("a1", 5, 5)]))
            .await
            .unwrap();
        store
            .replace_collection(&a, CollectionKind::Bookmarks.empty())
            .await
            .unwrap();
        store
            .replace_collection(&b, Collection::Annotations(vec![annotation("Mark-1-1", "green")]))
            .await
            .unwrap();

        let bob_bookmarks = store.fetch_collection(&b, CollectionKind::Bookmarks).await.unwrap();
        assert_eq!(bob_bookmarks.len(), 1);
        let alice_annotations = store
            .fetch_collection(&a, CollectionKind::Annotations)
            .await
            .unwrap();
        assert!(alice_annotations.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_without_mutation() {
        let store = MemoryStore::new();
        let u1 = user("u1");
        store
            .replace_collection(&u1, Collection::Bookmarks(vec![bookmark("keep", 1, 1)]))
            .await
            .unwrap();

        store.set_available(false);
        let err = store
            .replace_collection(&u1, CollectionKind::Bookmarks.empty())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StorageUnavailable(_)));
        assert!(store.fetch_collection(&u1, CollectionKind::Bookmarks).await.is_err());

        store.set_available(true);
        let got = store.fetch_collection(&u1, CollectionKind::Bookmarks).await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_keeps_one_slot_per_partition() {
        let store = MemoryStore::new();
        let u1 = user("u1");

        for _ in 0..3 {
            store
                .replace_collection(&u1, Collection::Bookmarks(vec![bookmark("a", 1, 1)]))
                .await
                .unwrap();
            store
                .replace_collection(&u1, CollectionKind::Bookmarks.empty())
                .await
                .unwrap();
        }
        assert_eq!(store.partition_count(), 1);

        store
            .replace_collection(&u1, Collection::Annotations(vec![annotation("Acts-2-1", "red")]))
            .await
            .unwrap();
        store
            .replace_collection(&user("u2"), CollectionKind::Bookmarks.empty())
            .await
            .unwrap();
        assert_eq!(store.partition_count(), 3);

        let got = store.fetch_collection(&u1, CollectionKind::Bookmarks).await.unwrap();
        assert!(got.is_empty());
        let got = store.fetch_collection(&u1, CollectionKind::Annotations).await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetch_sees_whole_collections() {
        let store = Arc::new(MemoryStore::new());
        let u1 = user("u1");

        let small: Vec<Bookmark> = (1..=3).map(|v| bookmark(&format!("s{v}"), 1, v)).collect();
        let large: Vec<Bookmark> = (1..=50).map(|v| bookmark(&format!("l{v}"), 2, v)).collect();

        let writer = {
            let store = store.clone();
            let u1 = u1.clone();
            let (small, large) = (small.clone(), large.clone());
            tokio::spawn(async move {
                for i in 0..200 {
                    let items = if i % 2 == 0 { small.clone() } else { large.clone() };
                    store
                        .replace_collection(&u1, Collection::Bookmarks(items))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..200 {
            let got = store.fetch_collection(&u1, CollectionKind::Bookmarks).await.unwrap();
            let Collection::Bookmarks(items) = got else {
                panic!("wrong kind");
            };
            let ids: Vec<&str> = items.iter().map(|b| b.id.as_str()).collect();
            let prefix_ok = ids.iter().all(|id| id.starts_with('s'))
                || ids.iter().all(|id| id.starts_with('l'));
            assert!(prefix_ok, "mixed collection observed: {ids:?}");
            assert!(matches!(items.len(), 0 | 3 | 50));
        }

        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_partition_lock_serializes_same_key_only() {
        let locks = Arc::new(PartitionLocks::default());
        let u1 = user("u1");

        let held = locks
            .acquire(PartitionKey::new(&u1, CollectionKind::Bookmarks))
            .await;

        // different kind for the same user is not blocked
        let other = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(PartitionKey::new(&u1, CollectionKind::Annotations)),
        )
        .await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(PartitionKey::new(&u1, CollectionKind::Bookmarks)),
        )
        .await;
        assert!(same.is_err());

        drop(held);
        let same = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(PartitionKey::new(&u1, CollectionKind::Bookmarks)),
        )
        .await;
        assert!(same.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
