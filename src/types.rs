use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CardId(pub String);

impl CardId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CardId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid query payload: {0}")]
    InvalidQuery(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(axum::http::StatusCode, String),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

impl axum::response::IntoResponse for ObservedError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, code) = match &self.inner {
            RelayError::Upstream(s, m) => (*s, m.clone(), "UPSTREAM_ERROR"),
            RelayError::InvalidQuery(m) => (
                axum::http::StatusCode::BAD_REQUEST,
                m.clone(),
                "INVALID_QUERY",
            ),
            RelayError::Validation(m) => (
                axum::http::StatusCode::BAD_REQUEST,
                m.clone(),
                "VALIDATION_ERROR",
            ),
            RelayError::Network(e) => (
                axum::http::StatusCode::BAD_GATEWAY,
                e.to_string(),
                "NETWORK_ERROR",
            ),
            RelayError::Database(e) => (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "DATABASE_ERROR",
            ),
            RelayError::Serialization(e) => (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "SERIALIZATION_ERROR",
            ),
            RelayError::Io(e) => (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "IO_ERROR",
            ),
            RelayError::Internal(m, _) => (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                m.clone(),
                "INTERNAL_ERROR",
            ),
        };
        (
            status,
            axum::Json(serde_json::json!({
                "error": msg,
                "code": code,
            })),
        )
            .into_response()
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: RelayError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<RelayError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

/// --- CANONICAL CARD ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recommendation {
    pub label: String,
}

/// --- RELAY EVENTS ---

/// One typed event on the browser-facing stream. Ordering contract: zero or
/// more `Logs` strictly before the single terminal `Result`/`Error`;
/// `Heartbeat` may interleave anywhere and carries no payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Logs(String),
    Result(serde_json::Value),
    Error(serde_json::Value),
    Heartbeat,
}

impl RelayEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            RelayEvent::Logs(_) => "logs",
            RelayEvent::Result(_) => "result",
            RelayEvent::Error(_) => "error",
            RelayEvent::Heartbeat => "heartbeat",
        }
    }

    /// Renders the event as an axum SSE event. `logs` carries a
    /// JSON-encoded string, `result`/`error` a JSON object, `heartbeat`
    /// an empty object.
    pub fn to_sse(&self) -> Result<axum::response::sse::Event> {
        let data = match self {
            RelayEvent::Logs(line) => serde_json::to_string(line)?,
            RelayEvent::Result(v) | RelayEvent::Error(v) => serde_json::to_string(v)?,
            RelayEvent::Heartbeat => "{}".to_string(),
        };
        Ok(axum::response::sse::Event::default()
            .event(self.event_name())
            .data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_wire_shape_is_camel_case() {
        let card = Card {
            id: None,
            owner_email: Some("a@b.c".into()),
            product: None,
            rating: Some(72.0),
            text: "Moderate impact".into(),
            citations: vec![],
            recommendations: vec![],
            suggested_questions: vec!["why?".into()],
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        let v = serde_json::to_value(&card).expect("serialize");
        assert_eq!(v["ownerEmail"], "a@b.c");
        assert_eq!(v["suggestedQuestions"][0], "why?");
        assert_eq!(v["createdAt"], "2026-01-01T00:00:00Z");
        assert!(v.get("id").is_none());
    }
}
