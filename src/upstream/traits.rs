use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::EntityKind;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected upstream payload: {0}")]
    Payload(String),
}

/// Response of the upstream version probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// One entity as returned by the upstream list/create endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamEntity {
    pub id: i64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl UpstreamEntity {
    /// Value of the kind's natural key, if present
    pub fn natural_key(&self, kind: EntityKind) -> Option<&str> {
        self.fields.get(kind.natural_key()).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListQuery {
    /// Server-side search term; not every upstream filters reliably on it
    pub term: Option<String>,
    /// 1-based page number
    pub page: u32,
    pub size: u32,
}

impl ListQuery {
    pub fn page(page: u32, size: u32) -> Self {
        Self {
            term: None,
            page,
            size,
        }
    }

    pub fn term(term: &str, size: u32) -> Self {
        Self {
            term: Some(term.to_string()),
            page: 1,
            size,
        }
    }
}

/// Operations the sync pipeline needs from the external time-tracking service
#[async_trait::async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Lightweight reachability probe
    async fn probe(&self) -> Result<VersionInfo, UpstreamError>;
    async fn list(&self, kind: EntityKind, query: &ListQuery) -> Result<Vec<UpstreamEntity>, UpstreamError>;
    async fn create(&self, kind: EntityKind, payload: &Map<String, Value>) -> Result<UpstreamEntity, UpstreamError>;
}
