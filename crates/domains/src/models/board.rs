use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named feedback board. Only `revealed` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revealed: bool,
    #[serde(default = "gate_enabled_default")]
    pub gate_enabled: bool,
    /// Expiry timestamp; the TTL sweeper removes the board once it passes.
    pub ttl_at: DateTime<Utc>,
    /// Opaque secret proving the facilitator role. Immutable.
    pub facilitator_token: String,
}

fn gate_enabled_default() -> bool {
    true
}

/// The two flags that, together with viewer role and ownership, decide
/// whether item content is observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardGate {
    pub gate_enabled: bool,
    pub revealed: bool,
}

/// Board metadata as shown to anyone holding the board id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub revealed: bool,
    pub gate_enabled: bool,
    pub ttl_at: DateTime<Utc>,
}

impl Board {
    /// Opens a fresh board: gated, not revealed, expiring after `ttl`.
    pub fn open(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: now,
            revealed: false,
            gate_enabled: true,
            ttl_at: now + ttl,
            facilitator_token: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn gate(&self) -> BoardGate {
        BoardGate {
            gate_enabled: self.gate_enabled,
            revealed: self.revealed,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl_at <= now
    }

    /// Compares `candidate` against the facilitator token without
    /// short-circuiting on the first differing byte.
    pub fn token_matches(&self, candidate: &str) -> bool {
        let expected = self.facilitator_token.as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    pub fn view(&self) -> BoardView {
        BoardView {
            id: self.id,
            created_at: self.created_at,
            revealed: self.revealed,
            gate_enabled: self.gate_enabled,
            ttl_at: self.ttl_at,
        }
    }
}
