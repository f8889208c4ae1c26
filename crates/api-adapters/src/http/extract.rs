use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use domains::DomainError;
use serde::Deserialize;

use super::error::ApiError;

pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const FACILITATOR_TOKEN_HEADER: &str = "x-facilitator-token";

/// Who is calling, as claimed by the request headers. Never rejects; each
/// handler decides which parts it needs.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub client_id: Option<String>,
    pub token: Option<String>,
}

impl Identity {
    pub fn require_client(&self) -> Result<&str, ApiError> {
        self.client_id.as_deref().ok_or_else(|| {
            ApiError(DomainError::ValidationError(format!(
                "{CLIENT_ID_HEADER} header is required"
            )))
        })
    }

    /// Fills missing parts from the event stream's query string.
    pub fn or_query(self, query: StreamQuery) -> Self {
        Self {
            client_id: self.client_id.or(non_empty(query.client_id)),
            token: self.token.or(non_empty(query.token)),
        }
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            client_id: header(parts, CLIENT_ID_HEADER),
            token: header(parts, FACILITATOR_TOKEN_HEADER),
        })
    }
}

/// EventSource cannot set headers, so the stream also accepts these.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub client_id: Option<String>,
    pub token: Option<String>,
}
