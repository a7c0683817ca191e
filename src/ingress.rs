use crate::types::*;
use serde::{Deserialize, Deserializer, Serialize};

/// Upstream operation selector. Numeric on the wire; the historical string
/// form is rejected as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    ProductAnalysis,
    Conversation,
}

impl QueryKind {
    pub fn as_wire(&self) -> u8 {
        match self {
            QueryKind::ProductAnalysis => 1,
            QueryKind::Conversation => 2,
        }
    }
}

impl Serialize for QueryKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for QueryKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let n = u8::deserialize(deserializer)?;
        match n {
            1 => Ok(QueryKind::ProductAnalysis),
            2 => Ok(QueryKind::Conversation),
            other => Err(serde::de::Error::custom(format!(
                "unknown query type {} (expected 1 or 2)",
                other
            ))),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct QueryRequest {
    #[serde(rename = "type")]
    pub kind: QueryKind,
    pub prompt: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl QueryRequest {
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(RelayError::InvalidQuery(
                "Query must contain a non-empty prompt".into(),
            )
            .into());
        }
        Ok(())
    }

    /// Shapes the request into the upstream wire body. Coordinates are
    /// best-effort and pass through as-is, absent or not.
    pub fn to_upstream_body(&self) -> UpstreamAskBody {
        UpstreamAskBody {
            user_query: self.prompt.clone(),
            kind: self.kind,
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpstreamAskBody {
    pub user_query: String,
    #[serde(rename = "type")]
    pub kind: QueryKind,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}
