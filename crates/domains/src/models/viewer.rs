use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewerRole {
    Facilitator,
    Participant,
}

/// Who is looking at a board: their role and, when known, their client id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub role: ViewerRole,
    pub client_id: Option<String>,
}

impl Viewer {
    pub fn facilitator(client_id: Option<String>) -> Self {
        Self {
            role: ViewerRole::Facilitator,
            client_id,
        }
    }

    pub fn participant(client_id: impl Into<String>) -> Self {
        Self {
            role: ViewerRole::Participant,
            client_id: Some(client_id.into()),
        }
    }

    /// A participant that has not identified itself; owns nothing.
    pub fn anonymous() -> Self {
        Self {
            role: ViewerRole::Participant,
            client_id: None,
        }
    }

    pub fn is_facilitator(&self) -> bool {
        self.role == ViewerRole::Facilitator
    }
}
