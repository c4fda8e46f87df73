// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor service wiring ingestion, scheduling, and the sink.
//!
//! All mutable state (the correlation arena and the pending buffer) is owned
//! by one task and mutated only inside its command loop, so per-event
//! processing is logically sequential and needs no locking. The cloneable
//! [`ShipperHandle`] entry points are fire-and-forget sends into that loop.
//! Sink writes for throttled drains run on spawned tasks: a slow sink delays
//! purge acknowledgment, never ingestion.
//!
//! Drains are throttled on the trailing edge. The first enqueue of a window
//! schedules one drain a full interval later and further enqueues collapse
//! into it, so under a steady stream drains happen once per interval and the
//! last burst still gets one. Every non-empty drain also rearms a one-shot
//! idle drain at five times the interval, guaranteeing a buffer that stops
//! receiving records is flushed rather than waiting for the next trigger.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::aggregator::CorrelationAggregator;
use crate::buffer::{DrainedBatch, PendingBuffer};
use crate::config::Config;
use crate::constants;
use crate::error::{ConfigError, SinkError};
use crate::event::{CompositeRecord, Event, RequestInfo, ResponseInfo, SourceEvent};
use crate::policy::PolicyEvaluator;
use crate::sink::{BulkSink, BulkSummary};
use crate::util;

#[derive(Debug)]
pub enum ShipperCommand {
    Log(SourceEvent),
    Request {
        info: Box<RequestInfo>,
        event: SourceEvent,
    },
    Response(ResponseInfo),
    Tail {
        id: String,
    },
    InternalError {
        id: String,
        error: Value,
    },
    Drain,
    Flush(oneshot::Sender<usize>),
    OpenCorrelations(oneshot::Sender<Vec<String>>),
    PurgeMany(Vec<String>),
    Shutdown,
}

type SendResult = Result<(), mpsc::error::SendError<ShipperCommand>>;

/// Cloneable handle feeding the shipper's command loop.
///
/// The five event entry points are safe to invoke in any order beyond
/// "terminal after initiating"; anything out of order is reported by the
/// aggregator as an unknown correlation and dropped.
#[derive(Clone)]
pub struct ShipperHandle {
    tx: mpsc::UnboundedSender<ShipperCommand>,
}

impl ShipperHandle {
    /// Standalone log event from the host's log facility.
    pub fn on_log(&self, event: SourceEvent) -> SendResult {
        self.tx.send(ShipperCommand::Log(event))
    }

    /// Request-phase notification. The `received` tag on `event` marks the
    /// initiating emission that opens the lifecycle; `info` is only captured
    /// then.
    pub fn on_request(&self, info: RequestInfo, event: SourceEvent) -> SendResult {
        self.tx.send(ShipperCommand::Request {
            info: Box::new(info),
            event,
        })
    }

    /// Response notification, once per request.
    pub fn on_response(&self, response: ResponseInfo) -> SendResult {
        self.tx.send(ShipperCommand::Response(response))
    }

    /// Terminal notification closing the lifecycle of `id`.
    pub fn on_tail(&self, id: &str) -> SendResult {
        self.tx.send(ShipperCommand::Tail { id: id.to_string() })
    }

    /// Out-of-band internal error attributed to `id`.
    pub fn on_internal_error(&self, id: &str, error: Value) -> SendResult {
        self.tx.send(ShipperCommand::InternalError {
            id: id.to_string(),
            error,
        })
    }

    /// Fire-and-forget drain trigger, bypassing the throttle window.
    pub fn drain(&self) -> SendResult {
        self.tx.send(ShipperCommand::Drain)
    }

    /// Drains, writes, and acknowledges in one step; returns the number of
    /// records shipped. Intended for shutdown and tests.
    pub async fn flush(&self) -> Result<usize, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ShipperCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {}", e))?;
        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    /// Correlation ids still waiting for their terminal event.
    pub async fn open_correlations(&self) -> Result<Vec<String>, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ShipperCommand::OpenCorrelations(response_tx))
            .map_err(|e| format!("Failed to send open_correlations command: {}", e))?;
        response_rx
            .await
            .map_err(|e| format!("Failed to receive open_correlations response: {}", e))
    }

    /// Removes the given ids from the correlation arena unconditionally.
    pub fn purge_many(&self, ids: Vec<String>) -> SendResult {
        self.tx.send(ShipperCommand::PurgeMany(ids))
    }

    pub fn shutdown(&self) -> SendResult {
        self.tx.send(ShipperCommand::Shutdown)
    }
}

pub struct ShipperService {
    aggregator: CorrelationAggregator,
    buffer: PendingBuffer,
    sink: Arc<dyn BulkSink>,
    evaluator: PolicyEvaluator,
    flush_interval: Duration,
    rx: mpsc::UnboundedReceiver<ShipperCommand>,
    // Timer tasks feed drains back through the same command loop.
    self_tx: mpsc::UnboundedSender<ShipperCommand>,
    drain_armed: bool,
    idle_drain: Option<CancellationToken>,
}

impl ShipperService {
    /// Validates the configuration and builds the service plus its handle.
    /// Fails before any event is accepted.
    pub fn new(
        config: Config,
        sink: Arc<dyn BulkSink>,
    ) -> Result<(Self, ShipperHandle), ConfigError> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let evaluator = PolicyEvaluator::new(config.policy);
        let service = ShipperService {
            aggregator: CorrelationAggregator::new(evaluator.clone()),
            buffer: PendingBuffer::new(&config.sink_target),
            sink,
            evaluator,
            flush_interval: Duration::from_millis(config.flush_interval_millis),
            rx,
            self_tx: tx.clone(),
            drain_armed: false,
            idle_drain: None,
        };
        Ok((service, ShipperHandle { tx }))
    }

    pub async fn run(mut self) {
        debug!("shipper service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                ShipperCommand::Log(source) => self.handle_log(source),
                ShipperCommand::Request { info, event } => self.handle_request(*info, event),
                ShipperCommand::Response(response) => self.handle_response(&response),
                ShipperCommand::Tail { id } => self.handle_tail(&id),
                ShipperCommand::InternalError { id, error } => {
                    self.handle_internal_error(&id, error);
                }
                ShipperCommand::Drain => self.handle_drain(),
                ShipperCommand::Flush(response_tx) => {
                    let shipped = self.handle_flush().await;
                    if response_tx.send(shipped).is_err() {
                        error!("Failed to send flush response - receiver dropped");
                    }
                }
                ShipperCommand::OpenCorrelations(response_tx) => {
                    if response_tx.send(self.aggregator.open_correlations()).is_err() {
                        error!("Failed to send open_correlations response - receiver dropped");
                    }
                }
                ShipperCommand::PurgeMany(ids) => self.aggregator.purge_many(&ids),
                ShipperCommand::Shutdown => {
                    debug!("shipper service shutting down");
                    break;
                }
            }
        }

        if let Some(token) = self.idle_drain.take() {
            token.cancel();
        }
        debug!("shipper service stopped");
    }

    fn handle_log(&mut self, source: SourceEvent) {
        let event = Event::log(source, util::now_millis());
        if self.evaluator.should_admit_event(&event) && !self.evaluator.should_exclude_event(&event)
        {
            self.enqueue_event(event);
        }
    }

    fn handle_request(&mut self, info: RequestInfo, source: SourceEvent) {
        let now = util::now_millis();
        let id = info.id.clone();
        if source.tags.iter().any(|tag| tag == constants::INITIATING_TAG) {
            self.aggregator.on_initiate(info, now);
        }
        self.aggregator.on_phase(Event::phase(&id, source, now));
    }

    fn handle_response(&mut self, response: &ResponseInfo) {
        self.aggregator
            .on_phase(Event::response(response, util::now_millis()));
    }

    fn handle_tail(&mut self, id: &str) {
        let event = Event::terminal(id, util::now_millis());
        if let Some(composite) = self.aggregator.on_terminal(event) {
            self.enqueue_composite(composite);
        }
    }

    fn handle_internal_error(&mut self, id: &str, error: Value) {
        let event = Event::internal_error(id, error, util::now_millis());
        if let Some(standalone) = self.aggregator.on_side_event(event) {
            self.enqueue_event(standalone);
        }
    }

    fn enqueue_event(&mut self, event: Event) {
        self.buffer.push_event(event);
        self.arm_throttled_drain();
    }

    fn enqueue_composite(&mut self, record: CompositeRecord) {
        self.buffer.push_composite(record);
        self.arm_throttled_drain();
    }

    // Trailing-edge throttle: the first enqueue of a window schedules one
    // drain a full interval later; the flag swallows the rest of the burst.
    fn arm_throttled_drain(&mut self) {
        if self.drain_armed {
            return;
        }
        self.drain_armed = true;
        let tx = self.self_tx.clone();
        let interval = self.flush_interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(ShipperCommand::Drain);
        });
    }

    /// One throttled drain. An empty buffer means the system goes idle; a
    /// non-empty one hands the batch to a spawned write task and rearms the
    /// idle drain.
    fn handle_drain(&mut self) {
        self.drain_armed = false;
        let batch = self.take_batch();
        if batch.entries.is_empty() {
            debug!("nothing pending, going idle");
            return;
        }

        debug!("draining {} pending records", batch.entries.len());
        let sink = Arc::clone(&self.sink);
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let flushed = batch.flushed_correlations;
            report_write(sink.bulk_write(batch.entries).await);
            // Acknowledge regardless of the write outcome: the records left
            // the pending buffer and must not stay referenced.
            if !flushed.is_empty() {
                let _ = tx.send(ShipperCommand::PurgeMany(flushed));
            }
        });
        self.arm_idle_drain();
    }

    /// Synchronous variant for the operator surface: write and acknowledge
    /// before replying. This is the only place the command loop awaits I/O.
    async fn handle_flush(&mut self) -> usize {
        let batch = self.take_batch();
        if batch.entries.is_empty() {
            return 0;
        }
        let shipped = batch.entries.len();
        report_write(self.sink.bulk_write(batch.entries).await);
        self.aggregator.purge_many(&batch.flushed_correlations);
        self.arm_idle_drain();
        shipped
    }

    // Any processed drain cancels the pending idle drain; non-empty ones
    // rearm it afterwards.
    fn take_batch(&mut self) -> DrainedBatch {
        if let Some(token) = self.idle_drain.take() {
            token.cancel();
        }
        self.buffer.drain()
    }

    fn arm_idle_drain(&mut self) {
        let token = CancellationToken::new();
        let guard = token.clone();
        let tx = self.self_tx.clone();
        let delay = self.flush_interval * constants::IDLE_DRAIN_INTERVALS;
        tokio::spawn(async move {
            tokio::select! {
                () = guard.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(ShipperCommand::Drain);
                }
            }
        });
        self.idle_drain = Some(token);
    }
}

fn report_write(result: Result<BulkSummary, SinkError>) {
    match result {
        Ok(summary) => {
            if summary.partial_failure {
                warn!(
                    "bulk write accepted with item failures: {} items in {}ms",
                    summary.items, summary.took_millis
                );
            } else {
                debug!(
                    "flushed {} items in {}ms",
                    summary.items, summary.took_millis
                );
            }
        }
        // The records are considered departed either way; retry belongs to
        // the sink collaborator.
        Err(e) => error!("bulk write failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BulkEntry;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::time::{sleep, timeout};

    struct RecordingSink {
        writes: Mutex<Vec<Vec<BulkEntry>>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSink {
                writes: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(RecordingSink {
                writes: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn writes(&self) -> Vec<Vec<BulkEntry>> {
            self.writes.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait::async_trait]
    impl BulkSink for RecordingSink {
        async fn bulk_write(&self, entries: Vec<BulkEntry>) -> Result<BulkSummary, SinkError> {
            let items = entries.len();
            self.writes.lock().expect("lock poisoned").push(entries);
            if self.fail {
                Err(SinkError::Destination(None, "sink down".to_string()))
            } else {
                Ok(BulkSummary {
                    items,
                    took_millis: 1,
                    partial_failure: false,
                })
            }
        }
    }

    fn allow_all_config() -> Config {
        Config {
            policy: serde_json::from_value(json!({"allowAll": true})).expect("policy"),
            ..Default::default()
        }
    }

    fn start(config: Config, sink: Arc<RecordingSink>) -> ShipperHandle {
        let (service, handle) =
            ShipperService::new(config, sink).expect("failed to create shipper service");
        tokio::spawn(service.run());
        handle
    }

    fn received_request(id: &str) -> (RequestInfo, SourceEvent) {
        (
            RequestInfo {
                id: id.to_string(),
                path: "/v1/users".to_string(),
                method: "get".to_string(),
                ..Default::default()
            },
            SourceEvent {
                tags: vec!["hapi".to_string(), "received".to_string()],
                data: json!({"method": "get"}),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_lifecycle_emits_one_composite() {
        let sink = RecordingSink::new();
        let handle = start(allow_all_config(), Arc::clone(&sink));

        let (info, event) = received_request("r1");
        handle.on_request(info, event).expect("send");

        // Nothing has completed, so a flush ships nothing.
        assert_eq!(handle.flush().await.expect("flush"), 0);

        handle.on_tail("r1").expect("send");
        assert_eq!(handle.flush().await.expect("flush"), 1);

        let writes = sink.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 1);
        assert_eq!(writes[0][0].doc_type, "request");
        let document: serde_json::Value =
            serde_json::from_str(&writes[0][0].document).expect("valid JSON");
        assert!(!document["lifecycle"].as_array().expect("array").is_empty());

        // Emission removed the id from the arena.
        assert!(handle.open_correlations().await.expect("reply").is_empty());
        handle.shutdown().expect("send");
    }

    #[tokio::test]
    async fn test_exclude_all_purges_before_terminal() {
        let config = Config {
            policy: serde_json::from_value(json!({"exclusions": {"all": true}}))
                .expect("policy"),
            ..Default::default()
        };
        let sink = RecordingSink::new();
        let handle = start(config, Arc::clone(&sink));

        let (info, event) = received_request("r2");
        handle.on_request(info, event).expect("send");
        // The initiating sub-event hit the global exclusion.
        assert!(handle.open_correlations().await.expect("reply").is_empty());

        // The tail now refers to an unknown id and must enqueue nothing.
        handle.on_tail("r2").expect("send");
        assert_eq!(handle.flush().await.expect("flush"), 0);
        assert!(sink.writes().is_empty());
        handle.shutdown().expect("send");
    }

    #[tokio::test]
    async fn test_flush_on_empty_buffer_skips_the_sink() {
        let sink = RecordingSink::new();
        let handle = start(allow_all_config(), Arc::clone(&sink));

        handle.on_log(SourceEvent::default()).expect("send");
        handle.on_log(SourceEvent::default()).expect("send");
        assert_eq!(handle.flush().await.expect("flush"), 2);
        // No intervening enqueue: the second drain must not touch the sink.
        assert_eq!(handle.flush().await.expect("flush"), 0);
        assert_eq!(sink.writes().len(), 1);
        assert_eq!(sink.writes()[0].len(), 2);
        handle.shutdown().expect("send");
    }

    #[tokio::test]
    async fn test_throttled_drain_collapses_a_burst() {
        let config = Config {
            flush_interval_millis: 20,
            ..allow_all_config()
        };
        let sink = RecordingSink::new();
        let handle = start(config, Arc::clone(&sink));

        for _ in 0..3 {
            handle.on_log(SourceEvent::default()).expect("send");
        }

        let drained = async {
            while sink.writes().is_empty() {
                sleep(Duration::from_millis(5)).await;
            }
        };
        timeout(Duration::from_millis(1000), drained)
            .await
            .expect("timed out waiting for the throttled drain");

        // All three enqueues landed inside one window: one write, three entries.
        let writes = sink.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 3);
        handle.shutdown().expect("send");
    }

    #[tokio::test]
    async fn test_sink_failure_still_acknowledges_purge() {
        let sink = RecordingSink::failing();
        let handle = start(allow_all_config(), Arc::clone(&sink));

        let (info, event) = received_request("r3");
        handle.on_request(info, event).expect("send");
        handle.on_tail("r3").expect("send");

        // The flush reports what it attempted to ship, not what arrived.
        assert_eq!(handle.flush().await.expect("flush"), 1);
        assert_eq!(sink.writes().len(), 1);
        // Purge proceeded despite the failure; the record has departed.
        assert!(handle.open_correlations().await.expect("reply").is_empty());
        handle.shutdown().expect("send");
    }

    #[tokio::test]
    async fn test_internal_error_is_dual_logged() {
        let sink = RecordingSink::new();
        let handle = start(allow_all_config(), Arc::clone(&sink));

        let (info, event) = received_request("r4");
        handle.on_request(info, event).expect("send");
        handle
            .on_internal_error("r4", json!({"message": "boom"}))
            .expect("send");
        handle.on_tail("r4").expect("send");
        assert_eq!(handle.flush().await.expect("flush"), 2);

        let writes = sink.writes();
        let doc_types: Vec<&str> = writes[0].iter().map(|e| e.doc_type.as_str()).collect();
        assert_eq!(doc_types, vec!["internalError", "request"]);
        // The composite also carries the error inline.
        let composite: serde_json::Value =
            serde_json::from_str(&writes[0][1].document).expect("valid JSON");
        assert_eq!(
            composite["lifecycle"][1]["eventType"],
            json!("internalError")
        );
        handle.shutdown().expect("send");
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = Config {
            sink_target: "  ".to_string(),
            ..Default::default()
        };
        assert!(ShipperService::new(config, RecordingSink::new()).is_err());
    }

    #[tokio::test]
    async fn test_denied_log_is_never_buffered() {
        let config = Config {
            policy: serde_json::from_value(json!({"allowedKinds": ["request"]}))
                .expect("policy"),
            ..Default::default()
        };
        let sink = RecordingSink::new();
        let handle = start(config, Arc::clone(&sink));

        handle.on_log(SourceEvent::default()).expect("send");
        assert_eq!(handle.flush().await.expect("flush"), 0);
        assert!(sink.writes().is_empty());
        handle.shutdown().expect("send");
    }
}
