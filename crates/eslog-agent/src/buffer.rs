// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pending buffer drained into bulk-write batches.
//!
//! The buffer is append-only between drains. A drain takes the whole buffer
//! in one swap, so records pushed while a drained batch is still being
//! written land in the next buffer, never the in-flight one.

use tracing::error;

use crate::event::{CompositeRecord, Event};

/// A record awaiting the next drain.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingRecord {
    Event(Event),
    Composite(Box<CompositeRecord>),
}

impl PendingRecord {
    fn kind(&self) -> &str {
        match self {
            PendingRecord::Event(event) => &event.kind,
            PendingRecord::Composite(record) => &record.kind,
        }
    }
}

/// One entry of a bulk write: target index, doc type, serialized document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkEntry {
    pub index: String,
    pub doc_type: String,
    pub document: String,
}

/// Everything one drain produced.
///
/// `flushed_correlations` holds the ids of the drained composites; they are
/// acknowledged back to the aggregator once the write completes, regardless
/// of its outcome, since the records have left the buffer either way.
#[derive(Debug, Default)]
pub struct DrainedBatch {
    pub entries: Vec<BulkEntry>,
    pub flushed_correlations: Vec<String>,
}

/// Append-only buffer of records awaiting a drain.
#[derive(Debug)]
pub struct PendingBuffer {
    index: String,
    records: Vec<PendingRecord>,
}

impl PendingBuffer {
    #[must_use]
    pub fn new(index: &str) -> Self {
        PendingBuffer {
            index: index.to_string(),
            records: Vec::new(),
        }
    }

    pub fn push_event(&mut self, event: Event) {
        self.records.push(PendingRecord::Event(event));
    }

    pub fn push_composite(&mut self, record: CompositeRecord) {
        self.records.push(PendingRecord::Composite(Box::new(record)));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Takes the whole buffer and serializes it into bulk entries tagged by
    /// each record's kind, in enqueue order.
    ///
    /// A record that fails to serialize is logged and dropped; it never
    /// poisons the rest of the batch.
    pub fn drain(&mut self) -> DrainedBatch {
        let records = std::mem::take(&mut self.records);
        let mut batch = DrainedBatch::default();
        for record in records {
            let serialized = match &record {
                PendingRecord::Event(event) => serde_json::to_string(event),
                PendingRecord::Composite(composite) => serde_json::to_string(composite),
            };
            let document = match serialized {
                Ok(document) => document,
                Err(e) => {
                    error!("dropping pending record that failed to serialize: {}", e);
                    continue;
                }
            };
            if let PendingRecord::Composite(composite) = &record {
                batch.flushed_correlations.push(composite.id.clone());
            }
            batch.entries.push(BulkEntry {
                index: self.index.clone(),
                doc_type: record.kind().to_string(),
                document,
            });
        }
        batch
    }
}
