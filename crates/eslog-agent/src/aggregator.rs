// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Correlation arena folding phase events into composite records.
//!
//! One [`CompositeRecord`] is tracked per in-flight correlation id. An id
//! moves from absent to open on the initiating signal, then leaves the map
//! either by emission (terminal event, composite passed the policy) or by a
//! purge. Both exits are plain removal, so a later event bearing the same id
//! is reported as unknown and dropped.

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::event::{CompositeRecord, Event, RequestInfo};
use crate::policy::PolicyEvaluator;

/// Tracks in-flight composite records keyed by correlation id.
#[derive(Debug, Default)]
pub struct CorrelationAggregator {
    records: HashMap<String, CompositeRecord>,
    evaluator: PolicyEvaluator,
}

impl CorrelationAggregator {
    #[must_use]
    pub fn new(evaluator: PolicyEvaluator) -> Self {
        CorrelationAggregator {
            records: HashMap::new(),
            evaluator,
        }
    }

    /// Opens a composite for an initiating request notification.
    ///
    /// Idempotent: re-initiating an open id leaves the captured envelope
    /// untouched. The accompanying sub-event still folds through
    /// [`Self::on_phase`], so a double initiation grows the lifecycle by two.
    pub fn on_initiate(&mut self, info: RequestInfo, now: i64) {
        if self.records.contains_key(&info.id) {
            return;
        }
        let record = CompositeRecord::open(info, now);
        self.records.insert(record.id.clone(), record);
    }

    /// Folds a phase sub-event into its open composite.
    ///
    /// An exclusion hit removes the whole composite, not just this entry, and
    /// nothing is appended. An admitted sub-event grows the lifecycle by one;
    /// a denied one is silently skipped while the composite stays open.
    pub fn on_phase(&mut self, mut event: Event) {
        let Some(id) = event.correlation_id.clone() else {
            warn!("\"{}\" event without a correlation id dropped", event.kind);
            return;
        };
        if !self.records.contains_key(id.as_str()) {
            warn_unknown(&event.kind, &id);
            return;
        }
        event.ensure_container_payload();
        if self.evaluator.should_exclude_event(&event) {
            debug!("excluded \"{}\" event purges correlation {}", event.kind, id);
            self.purge(&id);
            return;
        }
        if self.evaluator.should_admit_event(&event) {
            if let Some(record) = self.records.get_mut(id.as_str()) {
                record.lifecycle.push(event);
            }
        }
    }

    /// Closes a lifecycle with its terminal event.
    ///
    /// An excluded terminal purges the composite outright; an admitted one is
    /// appended. The composite is then gated a second time as a whole: only
    /// admitted and not excluded, it is removed from the map and returned for
    /// enqueue, otherwise purged. The aggregate gate is separate from the
    /// per-event one so exclusions keyed on fields only meaningful in
    /// combination (a final status code, say) still veto composites whose
    /// individual phases all passed.
    pub fn on_terminal(&mut self, event: Event) -> Option<CompositeRecord> {
        let Some(id) = event.correlation_id.clone() else {
            warn!("\"{}\" event without a correlation id dropped", event.kind);
            return None;
        };
        if !self.records.contains_key(id.as_str()) {
            warn_unknown(&event.kind, &id);
            return None;
        }
        if self.evaluator.should_exclude_event(&event) {
            debug!("excluded \"{}\" event purges correlation {}", event.kind, id);
            self.purge(&id);
            return None;
        }
        if self.evaluator.should_admit_event(&event) {
            if let Some(record) = self.records.get_mut(id.as_str()) {
                record.lifecycle.push(event);
            }
        }

        let record = self.records.get(id.as_str())?;
        if self.evaluator.should_admit_composite(record)
            && !self.evaluator.should_exclude_composite(record)
        {
            self.records.remove(id.as_str())
        } else {
            debug!("completed composite {} failed the policy, purging", id);
            self.purge(&id);
            None
        }
    }

    /// Handles an out-of-band signal such as an internal error event.
    ///
    /// A denied side event produces nothing. An admitted one is appended to
    /// the open composite (unknown id warns instead) and always returned for
    /// standalone enqueue, so side events are dual-logged: once inline in the
    /// composite, once under their own doc type. An exclusion hit afterwards
    /// purges the composite but the standalone record still ships.
    pub fn on_side_event(&mut self, event: Event) -> Option<Event> {
        if !self.evaluator.should_admit_event(&event) {
            return None;
        }
        let id = event.correlation_id.clone();
        match id
            .as_deref()
            .and_then(|id| self.records.get_mut(id))
        {
            Some(record) => record.lifecycle.push(event.clone()),
            None => warn_unknown(&event.kind, id.as_deref().unwrap_or("<none>")),
        }
        if self.evaluator.should_exclude_event(&event) {
            if let Some(id) = &id {
                debug!("excluded \"{}\" event purges correlation {}", event.kind, id);
                self.purge(id);
            }
        }
        Some(event)
    }

    /// Unconditionally removes one id; no-op when absent.
    pub fn purge(&mut self, id: &str) {
        self.records.remove(id);
    }

    /// Unconditionally removes every given id; absent ids are skipped.
    ///
    /// Called for policy purges and for post-flush acknowledgment, where the
    /// ids of already emitted composites are safe no-ops.
    pub fn purge_many(&mut self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        debug!(
            "purging {} of {} in-flight correlations",
            ids.len(),
            self.records.len()
        );
        for id in ids {
            self.records.remove(id.as_str());
        }
    }

    /// Ids still waiting for their terminal event.
    #[must_use]
    pub fn open_correlations(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn warn_unknown(kind: &str, id: &str) {
    warn!(
        "\"{}\" event with unrecognized correlation id {}; most likely purged earlier by an exclusion",
        kind, id
    );
}
