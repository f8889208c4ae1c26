//! # BoardService
//!
//! Board lifecycle, facilitator authorization and the reveal gate toggle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domains::{
    tx_fn, Board, BoardEvent, Collection, DomainError, Entity, EntityStore, EntityStoreExt,
    Filter, Item, Result, StoreError, TxHandleExt, Viewer,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::approvals::ClapLedger;
use crate::broadcast::BroadcastHub;

#[derive(Clone)]
pub struct BoardService {
    store: Arc<dyn EntityStore>,
    ledger: ClapLedger,
    hub: BroadcastHub,
    ttl: Duration,
}

impl BoardService {
    pub fn new(store: Arc<dyn EntityStore>, hub: BroadcastHub, ttl: Duration) -> Self {
        Self {
            ledger: ClapLedger::new(store.clone()),
            store,
            hub,
            ttl,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_board(&self) -> Result<Board> {
        let board = Board::open(Utc::now(), self.ttl);
        self.store.save(&board).await?;
        info!(board_id = %board.id, ttl_at = %board.ttl_at, "board created");
        Ok(board)
    }

    pub async fn get_board(&self, board_id: Uuid) -> Result<Board> {
        self.store
            .load::<Board>(&board_id.to_string())
            .await?
            .ok_or_else(|| DomainError::not_found("Board", board_id))
    }

    /// Loads the board and checks `token` against its facilitator token.
    pub async fn authorize_facilitator(&self, board_id: Uuid, token: Option<&str>) -> Result<Board> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DomainError::Unauthorized("facilitator token required".into()))?;
        let board = self.get_board(board_id).await?;
        if !board.token_matches(token) {
            return Err(DomainError::Forbidden("invalid facilitator token".into()));
        }
        Ok(board)
    }

    /// Resolves who is viewing. A wrong token quietly yields a participant.
    pub fn viewer_for(board: &Board, client_id: Option<String>, token: Option<&str>) -> Viewer {
        match token {
            Some(token) if board.token_matches(token) => Viewer::facilitator(client_id),
            _ => match client_id {
                Some(client_id) => Viewer::participant(client_id),
                None => Viewer::anonymous(),
            },
        }
    }

    /// Sets `revealed` and tells every viewer of the board.
    #[instrument(skip(self, requesting_token))]
    pub async fn toggle_reveal(
        &self,
        board_id: Uuid,
        revealed: bool,
        requesting_token: &str,
    ) -> Result<Board> {
        let _turn = self.hub.turn(board_id).await;
        let key = board_id.to_string();
        let token = requesting_token.to_string();
        let doc = self
            .store
            .transaction(tx_fn(move |tx| {
                Box::pin(async move {
                    let mut board: Board = tx.load_required(&key).await?;
                    if !board.token_matches(&token) {
                        return Err(StoreError::Rejected(DomainError::Forbidden(
                            "invalid facilitator token".into(),
                        )));
                    }
                    board.revealed = revealed;
                    tx.save(&board).await?;
                    board.to_document()
                })
            }))
            .await?;
        let board = Board::from_document(doc)?;

        info!(%board_id, revealed, "reveal toggled");
        self.hub
            .publish(board_id, &BoardEvent::RevealChanged { revealed });
        Ok(board)
    }

    /// Removes boards whose TTL has passed, along with their items and
    /// approval records, and closes their viewer channels. Returns how many
    /// boards were removed.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self
            .store
            .find::<Board>(&[Filter::lt("ttlAt", now)], None)
            .await?;

        let mut purged = 0;
        for board in expired {
            if let Err(err) = self.purge_board(&board).await {
                warn!(board_id = %board.id, error = %err, "failed to purge expired board");
                continue;
            }
            purged += 1;
        }
        if purged > 0 {
            info!(purged, "expired boards purged");
        }
        Ok(purged)
    }

    async fn purge_board(&self, board: &Board) -> Result<()> {
        let _turn = self.hub.turn(board.id).await;
        self.ledger.purge(Filter::eq("boardId", board.id)).await?;
        let items = self
            .store
            .query(Collection::Items, &[Filter::eq("boardId", board.id)], None)
            .await?;
        for (id, _) in items {
            self.store.delete(Item::COLLECTION, &id).await?;
        }
        self.store.delete(Board::COLLECTION, &board.key()).await?;
        self.hub.close_board(board.id);
        Ok(())
    }
}
