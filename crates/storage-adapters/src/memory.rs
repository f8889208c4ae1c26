//! # MemoryStore
//!
//! In-process [`EntityStore`] backed by `DashMap`.
//!
//! Transactions take a per-document lock the first time they touch a
//! document and hold it until commit or rollback, so read-modify-write on one
//! document is serialized while unrelated documents proceed in parallel.
//! Writes are buffered and applied at commit. Callers that touch several
//! documents must do so in a consistent order; a lock not acquired within
//! the configured timeout fails with `Contention`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use domains::{
    Collection, Document, EntityStore, Filter, OrderBy, StoreError, StoreResult, TxFn, TxHandle,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

type DocKey = (Collection, String);

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

pub struct MemoryStore {
    docs: DashMap<DocKey, Document>,
    locks: DashMap<DocKey, Arc<Mutex<()>>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            docs: DashMap::new(),
            locks: DashMap::new(),
            lock_timeout,
        }
    }

    /// Number of stored documents in `collection`.
    pub fn len(&self, collection: Collection) -> usize {
        self.docs.iter().filter(|e| e.key().0 == collection).count()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    async fn lock(&self, key: &DocKey) -> StoreResult<OwnedMutexGuard<()>> {
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        match tokio::time::timeout(self.lock_timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(collection = %key.0, id = %key.1, "document lock timed out");
                Err(StoreError::Contention {
                    collection: key.0,
                    id: key.1.clone(),
                })
            }
        }
    }

    /// Forgets lock entries nobody holds or waits on. Call after the guards
    /// for `keys` have been dropped.
    fn release<'k>(&self, keys: impl IntoIterator<Item = &'k DocKey>) {
        for key in keys {
            self.locks
                .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }

    /// Runs a single-document write under that document's lock.
    async fn locked<T>(
        &self,
        collection: Collection,
        id: &str,
        op: impl FnOnce(&DashMap<DocKey, Document>, &DocKey) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let key = (collection, id.to_string());
        let guard = self.lock(&key).await?;
        let out = op(&self.docs, &key);
        drop(guard);
        self.release([&key]);
        out
    }
}

fn merge(target: &mut Document, partial: &Document) -> StoreResult<()> {
    let (Some(target), Some(partial)) = (target.as_object_mut(), partial.as_object()) else {
        return Err(StoreError::Codec("partial update requires JSON objects".into()));
    };
    for (field, value) in partial {
        target.insert(field.clone(), value.clone());
    }
    Ok(())
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .docs
            .get(&(collection, id.to_string()))
            .map(|doc| doc.value().clone()))
    }

    async fn set(&self, collection: Collection, id: &str, doc: Document) -> StoreResult<()> {
        self.locked(collection, id, |docs, key| {
            docs.insert(key.clone(), doc);
            Ok(())
        })
        .await
    }

    async fn insert(&self, collection: Collection, id: &str, doc: Document) -> StoreResult<bool> {
        self.locked(collection, id, |docs, key| {
            if docs.contains_key(key) {
                return Ok(false);
            }
            docs.insert(key.clone(), doc);
            Ok(true)
        })
        .await
    }

    async fn update(&self, collection: Collection, id: &str, partial: Document) -> StoreResult<()> {
        self.locked(collection, id, |docs, key| match docs.get_mut(key) {
            Some(mut doc) => merge(doc.value_mut(), &partial),
            None => Err(StoreError::not_found(key.0, &key.1)),
        })
        .await
    }

    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        self.locked(collection, id, |docs, key| Ok(docs.remove(key).is_some()))
            .await
    }

    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        order_by: Option<OrderBy>,
    ) -> StoreResult<Vec<(String, Document)>> {
        let mut hits: Vec<(String, Document)> = self
            .docs
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .filter(|entry| filters.iter().all(|f| f.matches(entry.value())))
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        if let Some(order) = order_by {
            hits.sort_by(|(a_id, a), (b_id, b)| order.compare(a, b).then_with(|| a_id.cmp(b_id)));
        }
        Ok(hits)
    }

    async fn transaction(&self, f: TxFn) -> StoreResult<Document> {
        let mut tx = MemoryTx {
            store: self,
            guards: HashMap::new(),
            writes: HashMap::new(),
        };
        let outcome = f(&mut tx).await;
        if outcome.is_ok() {
            tx.commit();
        }
        drop(tx);
        outcome
    }
}

struct MemoryTx<'s> {
    store: &'s MemoryStore,
    guards: HashMap<DocKey, OwnedMutexGuard<()>>,
    /// `None` marks a pending delete.
    writes: HashMap<DocKey, Option<Document>>,
}

impl MemoryTx<'_> {
    async fn touch(&mut self, collection: Collection, id: &str) -> StoreResult<DocKey> {
        let key = (collection, id.to_string());
        if !self.guards.contains_key(&key) {
            let guard = self.store.lock(&key).await?;
            self.guards.insert(key.clone(), guard);
        }
        Ok(key)
    }

    fn current(&self, key: &DocKey) -> Option<Document> {
        match self.writes.get(key) {
            Some(pending) => pending.clone(),
            None => self.store.docs.get(key).map(|doc| doc.value().clone()),
        }
    }

    fn commit(&mut self) {
        for (key, write) in self.writes.drain() {
            match write {
                Some(doc) => {
                    self.store.docs.insert(key, doc);
                }
                None => {
                    self.store.docs.remove(&key);
                }
            }
        }
    }
}

/// Releases every lock; buffered writes not yet committed are discarded.
/// Also runs when the transaction future is dropped mid-flight.
impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        let keys: Vec<DocKey> = self.guards.keys().cloned().collect();
        self.guards.clear();
        self.store.release(&keys);
    }
}

#[async_trait]
impl<'s> TxHandle for MemoryTx<'s> {
    async fn get(&mut self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        let key = self.touch(collection, id).await?;
        Ok(self.current(&key))
    }

    async fn set(&mut self, collection: Collection, id: &str, doc: Document) -> StoreResult<()> {
        let key = self.touch(collection, id).await?;
        self.writes.insert(key, Some(doc));
        Ok(())
    }

    async fn insert(&mut self, collection: Collection, id: &str, doc: Document) -> StoreResult<bool> {
        let key = self.touch(collection, id).await?;
        if self.current(&key).is_some() {
            return Ok(false);
        }
        self.writes.insert(key, Some(doc));
        Ok(true)
    }

    async fn update(&mut self, collection: Collection, id: &str, partial: Document) -> StoreResult<()> {
        let key = self.touch(collection, id).await?;
        let mut doc = self
            .current(&key)
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        merge(&mut doc, &partial)?;
        self.writes.insert(key, Some(doc));
        Ok(())
    }

    async fn delete(&mut self, collection: Collection, id: &str) -> StoreResult<bool> {
        let key = self.touch(collection, id).await?;
        let existed = self.current(&key).is_some();
        self.writes.insert(key, None);
        Ok(existed)
    }
}
