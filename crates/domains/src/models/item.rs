use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, Result};

pub const IDEA_MAX_CHARS: usize = 200;
pub const WHO_MAX_CHARS: usize = 60;

/// How an item opens: "I like..." or "I wish...".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Starter {
    Like,
    Wish,
}

impl Starter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Starter::Like => "like",
            Starter::Wish => "wish",
        }
    }
}

impl fmt::Display for Starter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Starter {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "like" => Ok(Starter::Like),
            "wish" => Ok(Starter::Wish),
            _ => Err(DomainError::ValidationError(
                "invalid starter: must be \"like\" or \"wish\"".into(),
            )),
        }
    }
}

/// A single piece of feedback on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: Uuid,
    pub board_id: Uuid,
    pub starter: Starter,
    pub idea: String,
    pub who: String,
    /// Cached count of approval records for this item. Server-maintained.
    #[serde(default)]
    pub claps: u64,
    /// Creator identity, used for ownership checks.
    pub client_id: String,
    pub created_at: DateTime<Utc>,
}

/// Fields a participant may change on their own item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub starter: Option<String>,
    pub idea: Option<String>,
    pub who: Option<String>,
}

/// Input for a new item, as received from a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub starter: String,
    pub idea: String,
    pub who: String,
}

impl Item {
    /// Builds a validated item with zero claps. Never returns a partial item.
    pub fn create(
        board_id: Uuid,
        input: NewItem,
        client_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let item = Self {
            id: Uuid::now_v7(),
            board_id,
            starter: input.starter.parse()?,
            idea: input.idea,
            who: input.who,
            claps: 0,
            client_id: client_id.into(),
            created_at: now,
        };
        item.validate()?;
        Ok(item)
    }

    /// Overlays the provided fields and re-validates the resulting record.
    pub fn patched(&self, patch: ItemPatch) -> Result<Self> {
        let mut next = self.clone();
        if let Some(starter) = patch.starter {
            next.starter = starter.parse()?;
        }
        if let Some(idea) = patch.idea {
            next.idea = idea;
        }
        if let Some(who) = patch.who {
            next.who = who;
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<()> {
        check_len("idea", &self.idea, IDEA_MAX_CHARS)?;
        check_len("who", &self.who, WHO_MAX_CHARS)
    }

    pub fn is_owned_by(&self, client_id: &str) -> bool {
        self.client_id == client_id
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len == 0 || len > max {
        return Err(DomainError::ValidationError(format!(
            "{field} must be 1-{max} characters"
        )));
    }
    Ok(())
}
