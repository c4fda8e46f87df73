// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Key plucking and policy predicates.
//!
//! The predicates here are pure: they look at one event-shaped JSON document
//! and an immutable policy fragment, and report whether it matches. The
//! exclusion predicate relies on [`pluck_all_values`], which collects every
//! value stored under a field key at any depth of the document.

use serde_json::Value;

use crate::constants::{MATCH_ALL, NEVER_LOG};
use crate::policy::ExclusionPolicy;

/// Collects every value stored under `target_key` at any depth of `value`.
///
/// Arrays are recursed element by element; object fields whose key matches
/// are *found* and not searched further, all other fields are recursed. The
/// result is a single flat sequence in document order (outer to inner, left
/// to right): a found array contributes its elements, any other found value
/// is one element. Scalars, null, and an empty key yield an empty result.
#[must_use]
pub fn pluck_all_values<'a>(value: &'a Value, target_key: &str) -> Vec<&'a Value> {
    let mut found = Vec::new();
    if !target_key.is_empty() {
        pluck_into(value, target_key, &mut found);
    }
    found
}

fn pluck_into<'a>(value: &'a Value, target_key: &str, found: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                pluck_into(item, target_key, found);
            }
        }
        Value::Object(fields) => {
            for (key, field_value) in fields {
                if key == target_key {
                    match field_value {
                        Value::Array(items) => found.extend(items.iter()),
                        other => found.push(other),
                    }
                } else {
                    pluck_into(field_value, target_key, found);
                }
            }
        }
        _ => {}
    }
}

/// Does the allow-list accept this event kind?
///
/// The wildcard is checked before the suppression sentinel, so a wildcard
/// allow-list accepts everything, sentinel included.
#[must_use]
pub fn matches_kind(allowed: &[String], kind: &str) -> bool {
    if allowed.iter().any(|entry| entry == MATCH_ALL) {
        return true;
    }
    if kind.is_empty() || kind == NEVER_LOG {
        return false;
    }
    allowed.iter().any(|entry| entry == kind)
}

/// Does the allow-list intersect this event's tag set?
///
/// `None` covers records that carry no tag set at all (composites). A tag
/// set containing the suppression sentinel never matches, unless the
/// allow-list is the wildcard, which is checked first.
#[must_use]
pub fn matches_tags(allowed: &[String], tags: Option<&[String]>) -> bool {
    if allowed.iter().any(|entry| entry == MATCH_ALL) {
        return true;
    }
    let Some(tags) = tags else {
        return false;
    };
    if tags.is_empty() || tags.iter().any(|tag| tag == NEVER_LOG) {
        return false;
    }
    allowed.iter().any(|entry| tags.contains(entry))
}

/// Does any configured exclusion hit this document?
///
/// Wildcards short-circuit at every level: the top-level `all` flag, a
/// per-kind `all` flag, and the `all` token inside a banned-value list. For
/// plain field rules, every occurrence of the field key in the document is
/// plucked and compared: a truthy occurrence matches if it equals a banned
/// value, or if its JSON form appears inside the JSON form of the banned
/// list. The substring fallback is intentionally loose (a numeric 404
/// matches a banned "404") and is observable filtering behavior; keep it.
#[must_use]
pub fn matches_exclusions(exclusions: &ExclusionPolicy, kind: &str, body: &Value) -> bool {
    if exclusions.all {
        return true;
    }
    if kind.is_empty() {
        return false;
    }
    let Some(kind_rules) = exclusions.kinds.get(kind) else {
        return false;
    };
    if kind_rules.all {
        return true;
    }

    kind_rules.fields.iter().any(|(field_key, banned)| {
        if banned.iter().any(|value| value.as_str() == Some(MATCH_ALL)) {
            return true;
        }
        let banned_serialized = serde_json::to_string(banned).unwrap_or_default();
        pluck_all_values(body, field_key).into_iter().any(|occurrence| {
            if !is_truthy(occurrence) {
                return false;
            }
            if banned.contains(occurrence) {
                return true;
            }
            serde_json::to_string(occurrence)
                .map(|serialized| banned_serialized.contains(&serialized))
                .unwrap_or(false)
        })
    })
}

// JS truthiness: null, false, 0, and "" never trigger an exclusion.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|float| float != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
