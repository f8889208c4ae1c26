//! # Visibility Gate
//!
//! The single decision point for whether a viewer may observe an item's
//! content. Snapshot queries and the event stream both project items through
//! [`ItemView::project`], so the server never hands out content the gate hides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BoardGate, Item, Starter, Viewer};

/// Decides whether `viewer` may see the content of `item` on a board whose
/// gate flags are `gate`. Depends only on the flags, the role and ownership.
pub fn is_content_visible(gate: BoardGate, item: &Item, viewer: &Viewer) -> bool {
    if viewer.is_facilitator() || !gate.gate_enabled || gate.revealed {
        return true;
    }
    // Authors always see their own pending submissions.
    viewer.client_id.as_deref() == Some(item.client_id.as_str())
}

/// Approvals open only after a full reveal, for every role.
pub fn approvals_open(gate: BoardGate) -> bool {
    gate.revealed
}

pub fn can_approve(gate: BoardGate, item: &Item, viewer: &Viewer) -> bool {
    approvals_open(gate) && is_content_visible(gate, item, viewer)
}

/// An item as one particular viewer is authorized to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: Uuid,
    pub board_id: Uuid,
    pub starter: Starter,
    /// `None` while the gate hides the content from this viewer.
    pub idea: Option<String>,
    pub who: String,
    pub claps: u64,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub hidden: bool,
}

impl ItemView {
    pub fn full(item: &Item) -> Self {
        Self {
            id: item.id,
            board_id: item.board_id,
            starter: item.starter,
            idea: Some(item.idea.clone()),
            who: item.who.clone(),
            claps: item.claps,
            client_id: item.client_id.clone(),
            created_at: item.created_at,
            hidden: false,
        }
    }

    pub fn redacted(item: &Item) -> Self {
        Self {
            idea: None,
            hidden: true,
            ..Self::full(item)
        }
    }

    pub fn project(gate: BoardGate, item: &Item, viewer: &Viewer) -> Self {
        if is_content_visible(gate, item, viewer) {
            Self::full(item)
        } else {
            Self::redacted(item)
        }
    }
}
