//! # ClapLedger
//!
//! Keeps at most one approval record per `(item, client)` pair. Records are
//! stored under their natural key, so the store's create-if-absent insert is
//! the uniqueness constraint; the lookups here are exact-match filters on
//! both fields.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domains::{
    ApprovalRecord, Collection, Entity, EntityStore, EntityStoreExt, Filter, Result, StoreError,
    StoreResult, TxHandle,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct ClapLedger {
    store: Arc<dyn EntityStore>,
}

impl ClapLedger {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn has_approved(&self, item_id: Uuid, client_id: &str) -> Result<bool> {
        let hits = self
            .store
            .query(Collection::Claps, &pair_filter(item_id, client_id), None)
            .await?;
        Ok(!hits.is_empty())
    }

    pub async fn approvals_for_item(&self, item_id: Uuid) -> Result<Vec<ApprovalRecord>> {
        Ok(self
            .store
            .find::<ApprovalRecord>(&[Filter::eq("itemId", item_id)], None)
            .await?)
    }

    /// Writes the approval inside `tx`. Fails with `AlreadyExists` when the
    /// pair already has a record.
    pub async fn record_approval(
        &self,
        tx: &mut dyn TxHandle,
        board_id: Uuid,
        item_id: Uuid,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ApprovalRecord> {
        let record = ApprovalRecord::new(board_id, item_id, client_id, now);
        let created = tx
            .insert(Collection::Claps, &record.id, record.to_document()?)
            .await?;
        if !created {
            return Err(StoreError::AlreadyExists {
                collection: Collection::Claps,
                id: record.id,
            });
        }
        Ok(record)
    }

    /// Removes the pair's approval inside `tx`. Fails with `NotFound` when
    /// there is none.
    pub async fn revoke_approval(
        &self,
        tx: &mut dyn TxHandle,
        item_id: Uuid,
        client_id: &str,
    ) -> StoreResult<()> {
        let key = ApprovalRecord::natural_key(item_id, client_id);
        if !tx.delete(Collection::Claps, &key).await? {
            return Err(StoreError::not_found(Collection::Claps, &key));
        }
        Ok(())
    }

    /// Deletes every approval matching `filter`. Used when items or boards go away.
    pub async fn purge(&self, filter: Filter) -> Result<usize> {
        let hits = self.store.query(Collection::Claps, &[filter], None).await?;
        let mut removed = 0;
        for (id, _) in hits {
            if self.store.delete(Collection::Claps, &id).await? {
                removed += 1;
            }
        }
        debug!(removed, "approval records purged");
        Ok(removed)
    }
}

fn pair_filter(item_id: Uuid, client_id: &str) -> [Filter; 2] {
    [
        Filter::eq("itemId", item_id),
        Filter::eq("clientId", client_id),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::tx_fn;
    use serde_json::json;
    use storage_adapters::MemoryStore;

    fn ledger() -> (Arc<dyn EntityStore>, ClapLedger) {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
        (store.clone(), ClapLedger::new(store))
    }

    async fn record(
        store: &Arc<dyn EntityStore>,
        ledger: &ClapLedger,
        item_id: Uuid,
        client: &'static str,
    ) -> StoreResult<serde_json::Value> {
        let ledger = ledger.clone();
        store
            .transaction(tx_fn(move |tx| {
                Box::pin(async move {
                    let record = ledger
                        .record_approval(tx, Uuid::nil(), item_id, client, Utc::now())
                        .await?;
                    Ok(json!({ "id": record.id }))
                })
            }))
            .await
    }

    #[tokio::test]
    async fn second_record_for_same_pair_is_rejected() {
        let (store, ledger) = ledger();
        let item = Uuid::now_v7();

        assert!(!ledger.has_approved(item, "c1").await.unwrap());
        record(&store, &ledger, item, "c1").await.unwrap();
        assert!(ledger.has_approved(item, "c1").await.unwrap());

        let err = record(&store, &ledger, item, "c1").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(ledger.approvals_for_item(item).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn revoke_without_record_is_not_found() {
        let (store, ledger) = ledger();
        let item = Uuid::now_v7();
        let revoker = ledger.clone();
        let err = store
            .transaction(tx_fn(move |tx| {
                Box::pin(async move {
                    revoker.revoke_approval(tx, item, "nobody").await?;
                    Ok(json!({}))
                })
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { collection: Collection::Claps, .. }));
    }

    #[tokio::test]
    async fn purge_removes_only_matching_records() {
        let (store, ledger) = ledger();
        let (keep, drop) = (Uuid::now_v7(), Uuid::now_v7());
        record(&store, &ledger, keep, "c1").await.unwrap();
        record(&store, &ledger, drop, "c1").await.unwrap();
        record(&store, &ledger, drop, "c2").await.unwrap();

        assert_eq!(ledger.purge(Filter::eq("itemId", drop)).await.unwrap(), 2);
        assert_eq!(ledger.approvals_for_item(drop).await.unwrap().len(), 0);
        assert_eq!(ledger.approvals_for_item(keep).await.unwrap().len(), 1);
    }
}
