// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Declarative policy config and the admit/exclude evaluator.
//!
//! Admission answers "is this interesting", exclusion answers "is this
//! forbidden regardless". The two are deliberately independent: every call
//! site evaluates both, so an event already staged for retention can still be
//! vetoed later (e.g. a terminal event purging an accumulated composite).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::event::{CompositeRecord, Event};
use crate::matcher;

/// Immutable filtering policy, supplied at construction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Global admission override. When set, its value is returned directly by
    /// every admit check, bypassing the kind and tag filters; `false` shuts
    /// admission off entirely. Exclusions still apply either way.
    #[serde(default)]
    pub allow_all: Option<bool>,

    /// Kinds to retain, or the `all` wildcard. Unset contributes no match.
    #[serde(default)]
    pub allowed_kinds: Option<Vec<String>>,

    /// Tags to retain, or the `all` wildcard. Unset contributes no match.
    #[serde(default)]
    pub allowed_tags: Option<Vec<String>>,

    /// Veto rules, keyed by kind then field key.
    #[serde(default)]
    pub exclusions: Option<ExclusionPolicy>,
}

/// Exclusion rules for all kinds; the `all` flag overrides everything.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExclusionPolicy {
    #[serde(default)]
    pub all: bool,
    #[serde(flatten)]
    pub kinds: HashMap<String, KindExclusions>,
}

/// Exclusion rules for one kind: banned values per field key, with an `all`
/// flag overriding the whole kind.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KindExclusions {
    #[serde(default)]
    pub all: bool,
    #[serde(flatten)]
    pub fields: HashMap<String, Vec<Value>>,
}

/// Evaluates events and composites against one immutable [`Policy`].
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    policy: Policy,
}

impl PolicyEvaluator {
    #[must_use]
    pub fn new(policy: Policy) -> Self {
        PolicyEvaluator { policy }
    }

    /// Should this record be retained for eventual writing?
    ///
    /// Admission is an OR of the two allow-lists, not an AND: passing either
    /// check retains the record.
    #[must_use]
    pub fn should_admit(&self, kind: &str, tags: Option<&[String]>) -> bool {
        if let Some(allow_all) = self.policy.allow_all {
            return allow_all;
        }
        let kind_ok = self
            .policy
            .allowed_kinds
            .as_deref()
            .is_some_and(|allowed| matcher::matches_kind(allowed, kind));
        let tags_ok = self
            .policy
            .allowed_tags
            .as_deref()
            .is_some_and(|allowed| matcher::matches_tags(allowed, tags));
        kind_ok || tags_ok
    }

    /// Does an exclusion veto this record? Independent of admission and
    /// consulted even when `allowAll` is set.
    #[must_use]
    pub fn should_exclude(&self, kind: &str, body: &Value) -> bool {
        self.policy
            .exclusions
            .as_ref()
            .is_some_and(|exclusions| matcher::matches_exclusions(exclusions, kind, body))
    }

    #[must_use]
    pub fn should_admit_event(&self, event: &Event) -> bool {
        self.should_admit(&event.kind, Some(&event.tags))
    }

    #[must_use]
    pub fn should_exclude_event(&self, event: &Event) -> bool {
        let body = serde_json::to_value(event).unwrap_or(Value::Null);
        self.should_exclude(&event.kind, &body)
    }

    // Composites carry no tag set; their admission rides on the kind filter
    // or the global override.
    #[must_use]
    pub fn should_admit_composite(&self, record: &CompositeRecord) -> bool {
        self.should_admit(&record.kind, None)
    }

    #[must_use]
    pub fn should_exclude_composite(&self, record: &CompositeRecord) -> bool {
        let body = serde_json::to_value(record).unwrap_or(Value::Null);
        self.should_exclude(&record.kind, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SourceEvent;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| (*item).to_string()).collect()
    }

    #[test]
    fn test_policy_deserializes_from_camel_case() {
        let policy: Policy = serde_json::from_value(json!({
            "allowAll": false,
            "allowedKinds": ["log", "request"],
            "allowedTags": ["error"],
            "exclusions": {
                "all": false,
                "request": {"path": ["/health"], "all": false},
                "log": {"all": true},
            },
        }))
        .expect("policy should deserialize");

        assert_eq!(policy.allow_all, Some(false));
        assert_eq!(policy.allowed_kinds, Some(strings(&["log", "request"])));
        let exclusions = policy.exclusions.expect("exclusions");
        assert!(!exclusions.all);
        assert_eq!(
            exclusions.kinds["request"].fields["path"],
            vec![json!("/health")]
        );
        assert!(exclusions.kinds["log"].all);
    }

    #[test]
    fn test_allow_all_true_admits_everything() {
        let evaluator = PolicyEvaluator::new(Policy {
            allow_all: Some(true),
            ..Default::default()
        });
        assert!(evaluator.should_admit("anything", None));
        assert!(evaluator.should_admit("", Some(&[])));
    }

    #[test]
    fn test_allow_all_false_disables_admission() {
        let evaluator = PolicyEvaluator::new(Policy {
            allow_all: Some(false),
            allowed_kinds: Some(strings(&["all"])),
            allowed_tags: Some(strings(&["all"])),
            ..Default::default()
        });
        assert!(!evaluator.should_admit("log", Some(&strings(&["error"]))));
    }

    #[test]
    fn test_kind_only_policy_rejects_other_kinds() {
        let evaluator = PolicyEvaluator::new(Policy {
            allowed_kinds: Some(strings(&["request"])),
            ..Default::default()
        });
        assert!(evaluator.should_admit("request", None));
        assert!(!evaluator.should_admit("log", Some(&strings(&["error"]))));
    }

    #[test]
    fn test_admission_is_an_or_of_the_allow_lists() {
        let evaluator = PolicyEvaluator::new(Policy {
            allowed_kinds: Some(strings(&["request"])),
            allowed_tags: Some(strings(&["error"])),
            ..Default::default()
        });
        // Wrong kind, matching tag.
        assert!(evaluator.should_admit("log", Some(&strings(&["error"]))));
        // Matching kind, no tags at all.
        assert!(evaluator.should_admit("request", None));
    }

    #[test]
    fn test_unset_policy_admits_nothing() {
        let evaluator = PolicyEvaluator::new(Policy::default());
        assert!(!evaluator.should_admit("log", Some(&strings(&["error"]))));
    }

    #[test]
    fn test_exclusion_applies_alongside_allow_all() {
        let policy: Policy = serde_json::from_value(json!({
            "allowAll": true,
            "exclusions": {"log": {"subsystem": ["healthcheck"]}},
        }))
        .expect("policy should deserialize");
        let evaluator = PolicyEvaluator::new(policy);

        let mut event = Event::log(
            SourceEvent {
                data: json!({"subsystem": "healthcheck"}),
                ..Default::default()
            },
            0,
        );
        assert!(evaluator.should_admit_event(&event));
        assert!(evaluator.should_exclude_event(&event));

        event.data = json!({"subsystem": "billing"});
        assert!(!evaluator.should_exclude_event(&event));
    }

    #[test]
    fn test_no_exclusions_never_excludes() {
        let evaluator = PolicyEvaluator::new(Policy::default());
        assert!(!evaluator.should_exclude("log", &json!({"anything": true})));
    }
}
