//! # ItemService
//!
//! Business rules for items and their approval counters. Every state change
//! runs as a store transaction and, once committed, publishes exactly one
//! event to the board's viewers. Mutations hold the board's turn from before
//! the transaction until the event is out, and read the gate inside the
//! transaction, so every frame matches the gate it was committed under.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domains::{
    can_approve, tx_fn, Board, BoardEvent, BoardGate, Collection, DomainError, Document, Entity,
    EntityStore, EntityStoreExt, Filter, Item, ItemEventKind, ItemPatch, ItemView, NewItem,
    OrderBy, Result, StoreError, StoreResult, TxHandleExt, Viewer,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::approvals::ClapLedger;
use crate::broadcast::BroadcastHub;

/// An item as committed, with the gate of its board in the same transaction.
#[derive(Serialize, Deserialize)]
struct Committed {
    item: Item,
    gate: BoardGate,
}

impl Committed {
    fn into_document(item: Item, board: &Board) -> StoreResult<Document> {
        Ok(serde_json::to_value(Committed {
            item,
            gate: board.gate(),
        })?)
    }

    fn from_document(doc: Document) -> Result<Self> {
        serde_json::from_value(doc).map_err(|err| StoreError::from(err).into())
    }
}

#[derive(Clone)]
pub struct ItemService {
    store: Arc<dyn EntityStore>,
    ledger: ClapLedger,
    hub: BroadcastHub,
}

impl ItemService {
    pub fn new(store: Arc<dyn EntityStore>, hub: BroadcastHub) -> Self {
        Self {
            ledger: ClapLedger::new(store.clone()),
            store,
            hub,
        }
    }

    pub fn ledger(&self) -> &ClapLedger {
        &self.ledger
    }

    pub async fn get_item(&self, item_id: Uuid) -> Result<Item> {
        self.store
            .load::<Item>(&item_id.to_string())
            .await?
            .ok_or_else(|| DomainError::not_found("Item", item_id))
    }

    #[instrument(skip(self, input))]
    pub async fn create_item(&self, board_id: Uuid, input: NewItem, client_id: &str) -> Result<Item> {
        let _turn = self.hub.turn(board_id).await;
        let board = self.board(board_id).await?;
        let item = Item::create(board_id, input, client_id, Utc::now())?;

        let created = self
            .store
            .insert(Collection::Items, &item.key(), item.to_document()?)
            .await?;
        if !created {
            return Err(DomainError::Conflict(format!("item {} already exists", item.id)));
        }

        info!(item_id = %item.id, "item created");
        self.publish_item(board.gate(), ItemEventKind::Added, &item);
        Ok(item)
    }

    /// Only the creating client may edit. Runs as a transaction so a
    /// concurrent approval is never overwritten.
    #[instrument(skip(self, patch))]
    pub async fn update_item(
        &self,
        item_id: Uuid,
        patch: ItemPatch,
        requesting_client_id: &str,
    ) -> Result<Item> {
        let board_id = self.get_item(item_id).await?.board_id;
        let _turn = self.hub.turn(board_id).await;

        let key = item_id.to_string();
        let requester = requesting_client_id.to_string();
        let doc = self
            .store
            .transaction(tx_fn(move |tx| {
                Box::pin(async move {
                    let board: Board = tx.load_required(&board_id.to_string()).await?;
                    let current: Item = tx.load_required(&key).await?;
                    if !current.is_owned_by(&requester) {
                        return Err(StoreError::Rejected(DomainError::Forbidden(
                            "only the author may edit this item".into(),
                        )));
                    }
                    let next = current.patched(patch).map_err(StoreError::Rejected)?;
                    tx.save(&next).await?;
                    Committed::into_document(next, &board)
                })
            }))
            .await?;
        let Committed { item, gate } = Committed::from_document(doc)?;

        self.publish_item(gate, ItemEventKind::Updated, &item);
        Ok(item)
    }

    /// Unconditional delete; restricting it to the facilitator is the
    /// caller's job. Also drops the item's approval records.
    #[instrument(skip(self))]
    pub async fn delete_item(&self, item_id: Uuid) -> Result<()> {
        let board_id = self.get_item(item_id).await?.board_id;
        let _turn = self.hub.turn(board_id).await;

        let existed = self.store.delete(Collection::Items, &item_id.to_string()).await?;
        if !existed {
            return Err(DomainError::not_found("Item", item_id));
        }
        self.ledger.purge(Filter::eq("itemId", item_id)).await?;

        info!(%item_id, %board_id, "item deleted");
        self.hub.publish(board_id, &BoardEvent::ItemDeleted { item_id });
        Ok(())
    }

    /// Records one approval by `client_id` and bumps the counter, both in
    /// one transaction that also reads the board's gate.
    #[instrument(skip(self))]
    pub async fn approve(&self, item_id: Uuid, client_id: &str) -> Result<Item> {
        let board_id = self.get_item(item_id).await?.board_id;
        let _turn = self.hub.turn(board_id).await;
        if self.ledger.has_approved(item_id, client_id).await? {
            return Err(already_approved());
        }

        let ledger = self.ledger.clone();
        let key = item_id.to_string();
        let client = client_id.to_string();
        let now = Utc::now();
        let doc = self
            .store
            .transaction(tx_fn(move |tx| {
                Box::pin(async move {
                    let board: Board = tx.load_required(&board_id.to_string()).await?;
                    let mut item: Item = tx.load_required(&key).await?;
                    if !can_approve(board.gate(), &item, &Viewer::participant(client.as_str())) {
                        return Err(StoreError::Rejected(DomainError::Forbidden(
                            "approvals open once the board is revealed".into(),
                        )));
                    }
                    ledger
                        .record_approval(tx, item.board_id, item.id, &client, now)
                        .await?;
                    item.claps += 1;
                    tx.save(&item).await?;
                    Committed::into_document(item, &board)
                })
            }))
            .await
            .map_err(approval_error)?;
        let Committed { item, gate } = Committed::from_document(doc)?;

        self.publish_item(gate, ItemEventKind::Clapped, &item);
        Ok(item)
    }

    /// Removes `client_id`'s approval and decrements the counter, floored at
    /// zero. Without a prior approval the counter is left untouched.
    #[instrument(skip(self))]
    pub async fn unapprove(&self, item_id: Uuid, client_id: &str) -> Result<Item> {
        let board_id = self.get_item(item_id).await?.board_id;
        let _turn = self.hub.turn(board_id).await;
        if !self.ledger.has_approved(item_id, client_id).await? {
            return Err(no_approval(item_id, client_id));
        }

        let ledger = self.ledger.clone();
        let key = item_id.to_string();
        let client = client_id.to_string();
        let doc = self
            .store
            .transaction(tx_fn(move |tx| {
                Box::pin(async move {
                    let board: Board = tx.load_required(&board_id.to_string()).await?;
                    let mut item: Item = tx.load_required(&key).await?;
                    ledger.revoke_approval(tx, item.id, &client).await?;
                    if item.claps == 0 {
                        warn!(item_id = %item.id, "approval removed while counter already at zero");
                    }
                    item.claps = item.claps.saturating_sub(1);
                    tx.save(&item).await?;
                    Committed::into_document(item, &board)
                })
            }))
            .await
            .map_err(|err| match err {
                StoreError::NotFound {
                    collection: Collection::Claps,
                    ..
                } => no_approval(item_id, client_id),
                other => other.into(),
            })?;
        let Committed { item, gate } = Committed::from_document(doc)?;

        self.publish_item(gate, ItemEventKind::Clapped, &item);
        Ok(item)
    }

    /// Items of a board in creation order, optionally only those created
    /// after `since`, each projected for `viewer`.
    pub async fn snapshot(
        &self,
        board_id: Uuid,
        since: Option<DateTime<Utc>>,
        viewer: &Viewer,
    ) -> Result<Vec<ItemView>> {
        let board = self.board(board_id).await?;
        let mut filters = vec![Filter::eq("boardId", board_id)];
        if let Some(since) = since {
            filters.push(Filter::gt("createdAt", since));
        }
        let items = self
            .store
            .find::<Item>(&filters, Some(OrderBy::asc("createdAt")))
            .await?;
        let gate = board.gate();
        Ok(items
            .iter()
            .map(|item| ItemView::project(gate, item, viewer))
            .collect())
    }

    async fn board(&self, board_id: Uuid) -> Result<Board> {
        self.store
            .load::<Board>(&board_id.to_string())
            .await?
            .ok_or_else(|| DomainError::not_found("Board", board_id))
    }

    fn publish_item(&self, gate: BoardGate, kind: ItemEventKind, item: &Item) {
        self.hub.publish(
            item.board_id,
            &BoardEvent::Item {
                kind,
                item: item.clone(),
                gate,
            },
        );
    }
}

fn already_approved() -> DomainError {
    DomainError::Conflict("already approved".into())
}

fn no_approval(item_id: Uuid, client_id: &str) -> DomainError {
    DomainError::NotFound(
        "Approval".into(),
        format!("{item_id}:{client_id} (no approval to remove)"),
    )
}

fn approval_error(err: StoreError) -> DomainError {
    match err {
        StoreError::AlreadyExists {
            collection: Collection::Claps,
            ..
        } => already_approved(),
        other => other.into(),
    }
}
