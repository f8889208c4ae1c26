//! # Board Events
//!
//! Synchronization events pushed to viewers, and their text/event-stream
//! framing. An event is serialized once per projection (full, and redacted
//! when the gate can hide content) and shared between every channel.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::{BoardGate, Item, Viewer};
use crate::visibility::{is_content_visible, ItemView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEventKind {
    Added,
    Updated,
    Clapped,
}

/// A committed board mutation, as handed to the broadcast hub.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// `gate` is the board's gate state at commit time.
    Item {
        kind: ItemEventKind,
        item: Item,
        gate: BoardGate,
    },
    ItemDeleted {
        item_id: Uuid,
    },
    RevealChanged {
        revealed: bool,
    },
}

impl BoardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BoardEvent::Item { kind, .. } => match kind {
                ItemEventKind::Added => "item-added",
                ItemEventKind::Updated => "item-updated",
                ItemEventKind::Clapped => "item-clapped",
            },
            BoardEvent::ItemDeleted { .. } => "item-deleted",
            BoardEvent::RevealChanged { .. } => "reveal-changed",
        }
    }

    /// Serializes the event. A redacted frame is produced only when the
    /// gate is closed, since otherwise every viewer gets the full item.
    pub fn render(&self) -> serde_json::Result<RenderedEvent<'_>> {
        let name = self.name();
        let (full, redacted) = match self {
            BoardEvent::Item { item, gate, .. } => {
                let full = SseFrame::named(name, &ItemView::full(item))?;
                let redacted = if gate.gate_enabled && !gate.revealed {
                    Some(Arc::new(SseFrame::named(name, &ItemView::redacted(item))?))
                } else {
                    None
                };
                (full, redacted)
            }
            BoardEvent::ItemDeleted { item_id } => {
                (SseFrame::named(name, &json!({ "id": item_id }))?, None)
            }
            BoardEvent::RevealChanged { revealed } => {
                (SseFrame::named(name, &json!({ "revealed": revealed }))?, None)
            }
        };
        Ok(RenderedEvent {
            event: self,
            full: Arc::new(full),
            redacted,
        })
    }
}

/// An event serialized for delivery, ready to pick a frame per viewer.
#[derive(Debug)]
pub struct RenderedEvent<'e> {
    event: &'e BoardEvent,
    full: Arc<SseFrame>,
    redacted: Option<Arc<SseFrame>>,
}

impl RenderedEvent<'_> {
    pub fn frame_for(&self, viewer: &Viewer) -> Arc<SseFrame> {
        match (self.event, &self.redacted) {
            (BoardEvent::Item { item, gate, .. }, Some(redacted))
                if !is_content_visible(*gate, item, viewer) =>
            {
                Arc::clone(redacted)
            }
            _ => Arc::clone(&self.full),
        }
    }
}

/// One text/event-stream message: optional event name plus a JSON data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<&'static str>,
    pub data: String,
}

impl SseFrame {
    pub fn named<T: Serialize>(event: &'static str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event: Some(event),
            data: serde_json::to_string(payload)?,
        })
    }

    /// The unnamed greeting every channel receives on attach.
    pub fn connected(board_id: Uuid) -> Self {
        Self {
            event: None,
            data: json!({ "type": "connected", "boardId": board_id }).to_string(),
        }
    }

    /// Wire form: `event:` line (if named), `data:` line, blank line.
    pub fn encode(&self) -> String {
        match self.event {
            Some(event) => format!("event: {event}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewItem;
    use chrono::Utc;

    fn item() -> Item {
        Item::create(
            Uuid::now_v7(),
            NewItem {
                starter: "like".into(),
                idea: "pairing sessions".into(),
                who: "Bo".into(),
            },
            "author",
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn reveal_changed_frame_matches_event_stream_format() {
        let event = BoardEvent::RevealChanged { revealed: true };
        let rendered = event.render().unwrap();
        let frame = rendered.frame_for(&Viewer::anonymous());
        assert_eq!(frame.encode(), "event: reveal-changed\ndata: {\"revealed\":true}\n\n");
    }

    #[test]
    fn connected_frame_is_unnamed() {
        let id = Uuid::nil();
        let encoded = SseFrame::connected(id).encode();
        assert!(encoded.starts_with("data: {"));
        assert!(encoded.contains("\"type\":\"connected\""));
        assert!(encoded.ends_with("\n\n"));
    }

    #[test]
    fn closed_gate_renders_redacted_frame_for_non_owners() {
        let item = item();
        let event = BoardEvent::Item {
            kind: ItemEventKind::Added,
            item: item.clone(),
            gate: BoardGate {
                gate_enabled: true,
                revealed: false,
            },
        };
        let rendered = event.render().unwrap();

        let other = rendered.frame_for(&Viewer::participant("other"));
        assert!(other.data.contains("\"hidden\":true"));
        assert!(!other.data.contains("pairing sessions"));

        let owner = rendered.frame_for(&Viewer::participant("author"));
        assert!(owner.data.contains("pairing sessions"));
        let facilitator = rendered.frame_for(&Viewer::facilitator(None));
        assert!(Arc::ptr_eq(&owner, &facilitator));
    }

    #[test]
    fn open_gate_shares_one_frame() {
        let event = BoardEvent::Item {
            kind: ItemEventKind::Clapped,
            item: item(),
            gate: BoardGate {
                gate_enabled: true,
                revealed: true,
            },
        };
        let rendered = event.render().unwrap();
        let a = rendered.frame_for(&Viewer::participant("a"));
        let b = rendered.frame_for(&Viewer::anonymous());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.event, Some("item-clapped"));
    }
}
