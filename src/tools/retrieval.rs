//! Context retrieval. Advisory only: no match yields an empty string.

use crate::error::AssistantError;
use crate::retrieval::RetrievalConnector;
use crate::Result;
use std::time::Duration;
use tracing::debug;

pub async fn retrieve_context(
    connector: &dyn RetrievalConnector,
    query: &str,
    top_k: usize,
    timeout: Duration,
) -> Result<String> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AssistantError::InvalidField {
            field: "query",
            reason: "must not be empty".to_string(),
        });
    }

    let documents = tokio::time::timeout(timeout, connector.search(query, top_k))
        .await
        .map_err(|_| AssistantError::Timeout {
            operation: "retrieval",
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| match e {
            AssistantError::RetrievalError(_) => e,
            other => AssistantError::RetrievalError(other.to_string()),
        })?;

    debug!(matches = documents.len(), "Context retrieved");

    Ok(documents.into_iter().next().unwrap_or_default())
}
