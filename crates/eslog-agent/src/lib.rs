// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # eslog-agent
//!
//! Embeddable request-lifecycle log shipper for Elasticsearch.
//!
//! The library ingests discrete lifecycle notifications from a host HTTP
//! server (request phases, responses, tails, internal errors, plus standalone
//! log events), correlates the multi-phase ones into a single composite
//! document per request, filters everything against a declarative policy, and
//! ships the survivors in periodic bulk writes to a document store.
//!
//! ## Architecture
//!
//! ```text
//!    Host notifications
//!          │
//!          v
//!    ┌──────────────┐
//!    │ ShipperHandle│  (Clone, fire-and-forget entry points)
//!    └──────┬───────┘
//!           │ commands via channel
//!           v
//!    ┌──────────────┐      ┌──────────────┐
//!    │ShipperService│─────>│  Aggregator  │  (correlation arena)
//!    │  actor task  │      └──────────────┘
//!    └──────┬───────┘
//!           │ throttled drain
//!           v
//!    ┌──────────────┐      ┌──────────────┐
//!    │PendingBuffer │─────>│   BulkSink   │  (_bulk ND-JSON)
//!    └──────────────┘      └──────────────┘
//! ```
//!
//! Admission ("is this interesting") and exclusion ("is this forbidden
//! regardless") are evaluated separately at every stage, so a composite that
//! accumulated admitted phases can still be vetoed at terminal time.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_assignments)]
#![deny(unreachable_pub)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

/// Correlation arena folding phase events into composite records
pub mod aggregator;

/// Pending buffer drained into bulk-write batches
pub mod buffer;

/// Shipper configuration and validation
pub mod config;

/// Event kinds, policy tokens, and flush timing constants
pub mod constants;

/// Error taxonomy
pub mod error;

/// Event and composite record model
pub mod event;

/// Key plucking and policy predicates
pub mod matcher;

/// Declarative policy config and the admit/exclude evaluator
pub mod policy;

/// Actor service wiring ingestion, scheduling, and the sink
pub mod service;

/// Bulk-write sink boundary and the Elasticsearch implementation
pub mod sink;

/// Clock and hostname helpers
pub mod util;
