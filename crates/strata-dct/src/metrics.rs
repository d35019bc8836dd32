//! Tracker counters and Prometheus text rendering.
//!
//! Counters live on the tracker and are copied into every
//! [`TrackerSnapshot`]; [`render_prometheus`] turns a snapshot into the text
//! exposition format for whatever scrape endpoint the host process exposes.

use serde::Serialize;
use std::fmt::Write;

use crate::context::ContextState;
use crate::tracker::TrackerSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub bring_up_requests: u64,
    pub tear_down_requests: u64,
    pub bring_up_successes: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
    pub bearer_drops: u64,
    pub retries_scheduled: u64,
    pub retries_fired: u64,
    pub shared_bindings: u64,
    pub arbitration_deferrals: u64,
    pub pool_exhausted: u64,
    pub stale_completions: u64,
}

const STATES: [ContextState; 7] = [
    ContextState::Idle,
    ContextState::Connecting,
    ContextState::Scanning,
    ContextState::Connected,
    ContextState::Disconnecting,
    ContextState::Failed,
    ContextState::Retrying,
];

fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Render a snapshot in Prometheus text exposition format.
pub fn render_prometheus(snap: &TrackerSnapshot) -> String {
    let mut out = String::with_capacity(2048);

    // ── Per-context gauges ──────────────────────────────────────

    header(
        &mut out,
        "strata_dct_context_state",
        "gauge",
        "1 for the current state of each logical context.",
    );
    for c in &snap.contexts {
        for s in STATES {
            let _ = writeln!(
                out,
                "strata_dct_context_state{{apn_type=\"{}\",state=\"{}\"}} {}",
                c.apn_type,
                s.as_str(),
                u8::from(c.state == s)
            );
        }
    }

    header(
        &mut out,
        "strata_dct_context_enabled",
        "gauge",
        "Whether the logical context has been requested.",
    );
    for c in &snap.contexts {
        let _ = writeln!(
            out,
            "strata_dct_context_enabled{{apn_type=\"{}\"}} {}",
            c.apn_type,
            u8::from(c.enabled)
        );
    }

    // ── Pool gauges ─────────────────────────────────────────────

    header(
        &mut out,
        "strata_dct_bearers_in_use",
        "gauge",
        "Bearers activating, active or disconnecting.",
    );
    let _ = writeln!(out, "strata_dct_bearers_in_use {}", snap.bearers.len());

    header(
        &mut out,
        "strata_dct_pending_retries",
        "gauge",
        "Retry tickets waiting to fire.",
    );
    let _ = writeln!(out, "strata_dct_pending_retries {}", snap.pending_retries);

    // ── Counters ────────────────────────────────────────────────

    let s = &snap.stats;
    for (name, help, value) in [
        ("bring_up_requests", "Bring-up requests issued to the modem.", s.bring_up_requests),
        ("tear_down_requests", "Teardown requests issued to the modem.", s.tear_down_requests),
        ("bring_up_successes", "Bearer activations that succeeded.", s.bring_up_successes),
        ("transient_failures", "Bring-up failures with a transient cause.", s.transient_failures),
        ("permanent_failures", "Bring-up failures with a permanent cause.", s.permanent_failures),
        ("bearer_drops", "Active bearers lost without a teardown request.", s.bearer_drops),
        ("retries_scheduled", "Retry tickets scheduled.", s.retries_scheduled),
        ("retries_fired", "Retry tickets that fired.", s.retries_fired),
        ("shared_bindings", "Contexts bound to an existing bearer.", s.shared_bindings),
        ("arbitration_deferrals", "Bring-ups deferred behind single-bearer arbitration.", s.arbitration_deferrals),
        ("pool_exhausted", "Bring-ups refused because the bearer pool was full.", s.pool_exhausted),
        ("stale_completions", "Radio completions discarded as stale.", s.stale_completions),
    ] {
        let metric = format!("strata_dct_{name}_total");
        header(&mut out, &metric, "counter", help);
        let _ = writeln!(out, "{metric} {value}");
    }

    out
}
