// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy.
//!
//! Configuration errors are fatal at construction, before any event is
//! accepted. Sink errors are logged by the drain task and never retried
//! here; retry and backoff belong to the sink collaborator.

use reqwest::StatusCode;

/// Errors raised while building or validating a shipper configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("malformed configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised by a bulk-write sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The batch could not be prepared for shipment; the data is dropped.
    #[error("failed to prepare bulk payload: {0}")]
    Payload(String),

    /// The sink rejected the write or was unreachable.
    #[error("bulk write failed (status {0:?}): {1}")]
    Destination(Option<StatusCode>, String),
}
