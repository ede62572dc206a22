//! Remote record source.
//!
//! The reconciler pulls the full remote snapshot through the
//! [`RemoteRecordSource`] seam. [`HttpRecordSource`] fetches it from a
//! REST realtime-database endpoint: one GET returning a JSON object that
//! maps record keys to record bodies, or the literal string `null` when
//! the collection is empty.

use crate::error::SyncError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// One remote record: its key plus its raw JSON body. Field extraction is
/// deferred to the reconciler so a malformed record poisons only itself.
#[derive(Debug, Clone)]
pub struct RemoteRecord {
    pub key: String,
    pub body: Value,
}

/// Source of the authoritative remote snapshot.
#[async_trait]
pub trait RemoteRecordSource: Send + Sync {
    /// Fetch every remote record. An empty collection is `Ok(vec![])`,
    /// never an error.
    async fn fetch_all(&self) -> Result<Vec<RemoteRecord>, SyncError>;
}

/// REST client for the hosted record store.
pub struct HttpRecordSource {
    client: reqwest::Client,
    url: String,
}

impl HttpRecordSource {
    pub fn new(base_url: &str, path: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: format!(
                "{}/{}.json",
                base_url.trim_end_matches('/'),
                path.trim_matches('/')
            ),
        }
    }
}

#[async_trait]
impl RemoteRecordSource for HttpRecordSource {
    async fn fetch_all(&self) -> Result<Vec<RemoteRecord>, SyncError> {
        debug!(url = %self.url, "fetching remote snapshot");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Http(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        parse_snapshot(&body)
    }
}

/// Decode a snapshot body into records, preserving arrival order.
pub fn parse_snapshot(body: &str) -> Result<Vec<RemoteRecord>, SyncError> {
    let trimmed = body.trim();
    // An empty collection comes back as the literal "null".
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| SyncError::Malformed(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(SyncError::Malformed(format!(
            "expected a JSON object at the snapshot root, got {}",
            type_name(&value)
        )));
    };

    Ok(map
        .into_iter()
        .map(|(key, body)| RemoteRecord { key, body })
        .collect())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_body_is_empty_snapshot() {
        assert!(parse_snapshot("null").unwrap().is_empty());
        assert!(parse_snapshot("  null\n").unwrap().is_empty());
        assert!(parse_snapshot("").unwrap().is_empty());
    }

    #[test]
    fn object_body_yields_records_in_order() {
        let body = r#"{"rec-b":{"status":"nouveau"},"rec-a":{"status":"traite"}}"#;
        let records = parse_snapshot(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "rec-b");
        assert_eq!(records[1].key, "rec-a");
    }

    #[test]
    fn array_body_is_malformed() {
        let err = parse_snapshot(r#"[1,2,3]"#).unwrap_err();
        assert!(matches!(err, SyncError::Malformed(_)));
    }

    #[test]
    fn broken_json_is_malformed() {
        assert!(matches!(
            parse_snapshot("{not json"),
            Err(SyncError::Malformed(_))
        ));
    }
}
