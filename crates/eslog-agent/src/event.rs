// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event and composite record model.
//!
//! Every notification ingested by the shipper is folded into an [`Event`]
//! sharing one envelope (kind, optional correlation id, timestamp, tags, open
//! payload). Request-scoped events accrete into a [`CompositeRecord`], the
//! single document shipped per correlated request.
//!
//! Per-kind defaults are applied by the constructors at creation time, so no
//! shared template object is ever mutated across requests.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants;
use crate::util;

/// A single lifecycle or standalone event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Doc type in the sink: `log`, `request`, `response`, `tail`, or
    /// `internalError`.
    #[serde(rename = "eventType")]
    pub kind: String,

    /// Correlation id grouping lifecycle events; absent on standalone logs.
    #[serde(rename = "request", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Emitting host, recorded on standalone log events only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Epoch milliseconds, defaulted to the ingestion clock when the source
    /// did not supply one.
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Open-ended payload; depth-unbounded.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Event {
    /// Standalone log event emitted via the host's log facility.
    #[must_use]
    pub fn log(source: SourceEvent, now: i64) -> Self {
        Event {
            kind: constants::KIND_LOG.to_string(),
            correlation_id: None,
            server: Some(util::get_hostname()),
            timestamp: source.timestamp.unwrap_or(now),
            tags: source.tags,
            data: non_null(source.data),
        }
    }

    /// Request-phase event folded into an open lifecycle.
    #[must_use]
    pub fn phase(correlation_id: &str, source: SourceEvent, now: i64) -> Self {
        Event {
            kind: constants::KIND_REQUEST.to_string(),
            correlation_id: Some(correlation_id.to_string()),
            server: None,
            timestamp: source.timestamp.unwrap_or(now),
            tags: source.tags,
            data: non_null(source.data),
        }
    }

    /// Response event; the status code defaults to 400 and the round-trip
    /// time to -1 until the source proves otherwise.
    #[must_use]
    pub fn response(response: &ResponseInfo, now: i64) -> Self {
        let response_time = response.received.map_or(-1, |received| now - received);
        Event {
            kind: constants::KIND_RESPONSE.to_string(),
            correlation_id: Some(response.id.clone()),
            server: None,
            timestamp: now,
            tags: Vec::new(),
            data: json!({
                "statusCode": response.status_code.unwrap_or(400),
                "responseTime": response_time,
            }),
        }
    }

    /// Terminal event closing a lifecycle.
    #[must_use]
    pub fn terminal(correlation_id: &str, now: i64) -> Self {
        Event {
            kind: constants::KIND_TAIL.to_string(),
            correlation_id: Some(correlation_id.to_string()),
            server: None,
            timestamp: now,
            tags: Vec::new(),
            data: Value::Null,
        }
    }

    /// Out-of-band internal error event.
    #[must_use]
    pub fn internal_error(correlation_id: &str, error: Value, now: i64) -> Self {
        Event {
            kind: constants::KIND_INTERNAL_ERROR.to_string(),
            correlation_id: Some(correlation_id.to_string()),
            server: None,
            timestamp: now,
            tags: Vec::new(),
            data: json!({ "err": error }),
        }
    }

    /// Wraps a bare scalar payload as `{"value": <scalar>}`.
    ///
    /// Lifecycle entries require a container-typed payload; arrays, objects,
    /// and null pass through untouched.
    pub fn ensure_container_payload(&mut self) {
        if matches!(self.data, Value::Bool(_) | Value::Number(_) | Value::String(_)) {
            self.data = json!({ "value": self.data.take() });
        }
    }
}

fn non_null(data: Value) -> Value {
    if data.is_null() {
        json!({})
    } else {
        data
    }
}

/// Headers subset captured once from the initiating request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeaders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(rename = "user_agent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

/// Origin info for the request: when it arrived and where it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Listener info for the server that accepted the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Static envelope supplied by the initiating request notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub query: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_version: Option<String>,
    #[serde(default)]
    pub headers: RequestHeaders,
    #[serde(default)]
    pub is_route_auth_required: bool,
    #[serde(default)]
    pub is_request_authenticated: bool,
    #[serde(default)]
    pub remote_info: RemoteInfo,
    #[serde(default)]
    pub server_info: ServerInfo,
}

/// Timestamp, tags, and payload of a log or request-phase notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub data: Value,
}

/// Response notification; `received` is the source's receive timestamp, used
/// to derive the round-trip time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<i64>,
}

/// The aggregated, multi-phase representation of one correlated request.
///
/// The envelope fields are captured once at creation and never mutated; only
/// `lifecycle` grows, monotonically, until emission or purge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeRecord {
    #[serde(rename = "eventType")]
    pub kind: String,
    pub id: String,
    pub timestamp: i64,
    pub path: String,
    pub query: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_version: Option<String>,
    pub headers: RequestHeaders,
    pub is_route_auth_required: bool,
    pub is_request_authenticated: bool,
    pub remote_info: RemoteInfo,
    pub server_info: ServerInfo,
    pub lifecycle: Vec<Event>,
}

impl CompositeRecord {
    /// Opens a composite from the initiating notification's envelope.
    #[must_use]
    pub fn open(info: RequestInfo, now: i64) -> Self {
        CompositeRecord {
            kind: constants::KIND_REQUEST.to_string(),
            id: info.id,
            timestamp: now,
            path: info.path,
            query: info.query,
            method: info.method,
            http_version: info.http_version,
            headers: info.headers,
            is_route_auth_required: info.is_route_auth_required,
            is_request_authenticated: info.is_request_authenticated,
            remote_info: info.remote_info,
            server_info: info.server_info,
            lifecycle: Vec::new(),
        }
    }
}
