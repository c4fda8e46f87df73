// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk-write sink boundary and the Elasticsearch implementation.
//!
//! The shipper only ever talks to [`BulkSink`]. Retry, backoff, and indexing
//! semantics live behind that boundary: a failed write is logged and the
//! records are considered departed, so the pipeline is at-least-once with
//! loss accepted on sink failure.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::buffer::BulkEntry;
use crate::error::SinkError;

/// Result summary of one bulk write, inspected for diagnostics only, never
/// for control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Items the destination acknowledged.
    pub items: usize,
    /// Time the destination spent on the write, in milliseconds.
    pub took_millis: u64,
    /// Some items failed even though the write as a whole was accepted.
    pub partial_failure: bool,
}

/// A destination accepting ordered bulk writes.
#[async_trait]
pub trait BulkSink: Send + Sync {
    async fn bulk_write(&self, entries: Vec<BulkEntry>) -> Result<BulkSummary, SinkError>;
}

/// Ships batches to an Elasticsearch `_bulk` endpoint as ND-JSON.
#[derive(Debug, Clone)]
pub struct ElasticBulkSink {
    client: reqwest::Client,
    endpoint: String,
}

impl ElasticBulkSink {
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        ElasticBulkSink {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

/// The subset of the `_bulk` response body the shipper reports on.
#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[async_trait]
impl BulkSink for ElasticBulkSink {
    async fn bulk_write(&self, entries: Vec<BulkEntry>) -> Result<BulkSummary, SinkError> {
        if entries.is_empty() {
            return Ok(BulkSummary::default());
        }

        // Each entry becomes an action line naming its index and doc type,
        // followed by the document itself.
        let mut body = String::new();
        for entry in &entries {
            let action = serde_json::json!({
                "index": {"_index": entry.index, "_type": entry.doc_type}
            });
            let action_line =
                serde_json::to_string(&action).map_err(|e| SinkError::Payload(e.to_string()))?;
            body.push_str(&action_line);
            body.push('\n');
            body.push_str(&entry.document);
            body.push('\n');
        }

        debug!("shipping {} entries to {}/_bulk", entries.len(), self.endpoint);
        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/_bulk", self.endpoint))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Destination(e.status(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SinkError::Destination(Some(status), text));
        }

        let summary = match response.json::<BulkResponse>().await {
            Ok(parsed) => BulkSummary {
                items: parsed.items.len(),
                took_millis: parsed.took,
                partial_failure: parsed.errors,
            },
            // A destination that returns no usable body still took the write.
            Err(_) => BulkSummary {
                items: entries.len(),
                took_millis: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                partial_failure: false,
            },
        };
        Ok(summary)
    }
}
