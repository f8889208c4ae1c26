use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable witness that one participant approved ("clapped") one item.
///
/// The document id is the natural key `"{item_id}:{client_id}"`, which
/// lets the store reject a second record for the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub id: String,
    pub board_id: Uuid,
    pub item_id: Uuid,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn new(board_id: Uuid, item_id: Uuid, client_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::natural_key(item_id, client_id),
            board_id,
            item_id,
            client_id: client_id.to_string(),
            created_at: now,
        }
    }

    pub fn natural_key(item_id: Uuid, client_id: &str) -> String {
        format!("{item_id}:{client_id}")
    }
}
