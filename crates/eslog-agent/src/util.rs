// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Clock and hostname helpers.

use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

/// Get the system hostname.
///
/// Tries, in order: the `ESLOG_HOSTNAME` override, the `HOSTNAME` environment
/// variable (commonly set in containers), the `gethostname()` syscall, and
/// finally the literal `"unknown"`.
#[must_use]
pub fn get_hostname() -> String {
    if let Ok(hostname) = env::var("ESLOG_HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname_osstr) => {
            if let Some(hostname_str) = hostname_osstr.to_str() {
                if !hostname_str.is_empty() {
                    return hostname_str.to_string();
                }
            }
        }
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
        }
    }

    "unknown".to_string()
}
