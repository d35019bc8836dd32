//! # Logical Contexts
//!
//! One [`LogicalContext`] per APN type. Each runs its own lifecycle, driven
//! by the tracker:
//!
//! ```text
//!   Idle ──bring-up──▶ Connecting ──success──▶ Connected ──teardown──▶ Disconnecting ──done──▶ Idle
//!    ▲                   │    ▲                    │
//!    │          candidate│    │next candidate      │bearer dropped
//!    │             failed▼    │                    ▼
//!    │                 Scanning                 Retrying ──ticket──▶ Idle
//!    │                   │
//!    │      list exhausted▼
//!    └──restart ticket── Failed
//! ```
//!
//! The [`ContextRegistry`] keeps contexts sorted by priority rank so every
//! "for each context" walk visits higher-priority contexts first.

use serde::Serialize;
use std::collections::HashMap;

use crate::apn::{ApnSetting, ApnType};
use crate::bearer::BearerId;
use crate::cause::FailCause;

// ─── Context State ──────────────────────────────────────────────────────────

/// Lifecycle state of a logical context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// No bearer, nothing in flight.
    Idle,
    /// Bring-up requested, waiting for the modem.
    Connecting,
    /// A candidate failed; waiting to try the next one.
    Scanning,
    /// Bound to an active bearer.
    Connected,
    /// Teardown requested, waiting for the modem.
    Disconnecting,
    /// Every candidate failed; waiting for a restart or configuration change.
    Failed,
    /// The bearer dropped; waiting for a reconnect ticket.
    Retrying,
}

impl ContextState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextState::Idle => "idle",
            ContextState::Connecting => "connecting",
            ContextState::Scanning => "scanning",
            ContextState::Connected => "connected",
            ContextState::Disconnecting => "disconnecting",
            ContextState::Failed => "failed",
            ContextState::Retrying => "retrying",
        }
    }

    /// Nothing bound and nothing in flight.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ContextState::Idle | ContextState::Failed)
    }
}

// ─── Reasons ────────────────────────────────────────────────────────────────

/// Why a context last changed state. Carried in notifications and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    DataEnabled,
    DataDisabled,
    DependencyMet,
    DependencyUnmet,
    DataAttached,
    DataDetached,
    ApnChanged,
    ApnFailed,
    RoamingOn,
    RoamingOff,
    RadioTurnedOff,
    RadioTurnedOn,
    RadioTechChanged,
    VoiceCallStarted,
    VoiceCallEnded,
    PsRestrictEnabled,
    PsRestrictDisabled,
    SingleBearerArbitration,
    LostConnection,
    Retry,
    NoCandidate,
    Unspecified,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::DataEnabled => "data_enabled",
            Reason::DataDisabled => "data_disabled",
            Reason::DependencyMet => "dependency_met",
            Reason::DependencyUnmet => "dependency_unmet",
            Reason::DataAttached => "data_attached",
            Reason::DataDetached => "data_detached",
            Reason::ApnChanged => "apn_changed",
            Reason::ApnFailed => "apn_failed",
            Reason::RoamingOn => "roaming_on",
            Reason::RoamingOff => "roaming_off",
            Reason::RadioTurnedOff => "radio_turned_off",
            Reason::RadioTurnedOn => "radio_turned_on",
            Reason::RadioTechChanged => "radio_tech_changed",
            Reason::VoiceCallStarted => "voice_call_started",
            Reason::VoiceCallEnded => "voice_call_ended",
            Reason::PsRestrictEnabled => "ps_restrict_enabled",
            Reason::PsRestrictDisabled => "ps_restrict_disabled",
            Reason::SingleBearerArbitration => "single_bearer_arbitration",
            Reason::LostConnection => "lost_connection",
            Reason::Retry => "retry",
            Reason::NoCandidate => "no_candidate",
            Reason::Unspecified => "unspecified",
        }
    }

    /// Disconnects caused by link instability get a backoff before the
    /// context is re-offered; deliberate ones are re-offered immediately.
    pub fn is_instability(&self) -> bool {
        matches!(self, Reason::LostConnection)
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Logical Context ────────────────────────────────────────────────────────

/// Static registration of a context: its type and arbitration rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ContextDef {
    #[serde(rename = "type")]
    pub apn_type: ApnType,
    /// Lower ranks are higher priority.
    pub priority: u8,
}

impl ContextDef {
    pub fn new(apn_type: ApnType) -> Self {
        Self {
            apn_type,
            priority: apn_type.default_priority(),
        }
    }
}

/// Per-type connection intent and lifecycle.
#[derive(Debug, Clone)]
pub struct LogicalContext {
    pub apn_type: ApnType,
    pub priority: u8,
    /// Someone has asked for this type.
    pub enabled: bool,
    /// External prerequisites for this type are satisfied.
    pub dependency_met: bool,
    pub state: ContextState,
    pub reason: Reason,
    /// Configuration in use (or last attempted).
    pub apn_setting: Option<ApnSetting>,
    /// Bearer this context holds a reference on.
    pub bearer: Option<BearerId>,
    /// Remaining candidates for the current attempt, in try order.
    pub waiting: Vec<ApnSetting>,
    /// Candidates left before "all permanently rejected" is concluded.
    pub perm_fail_countdown: usize,
    pub last_fail: Option<FailCause>,
    /// Teardown requested while a bring-up was in flight.
    pub pending_teardown: Option<Reason>,
}

impl LogicalContext {
    pub fn new(def: ContextDef) -> Self {
        Self {
            apn_type: def.apn_type,
            priority: def.priority,
            enabled: false,
            dependency_met: true,
            state: ContextState::Idle,
            reason: Reason::Unspecified,
            apn_setting: None,
            bearer: None,
            waiting: Vec::new(),
            perm_fail_countdown: 0,
            last_fail: None,
            pending_teardown: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.enabled && self.dependency_met
    }

    /// Ready, and in a state from which a new bring-up may start.
    pub fn is_connectable(&self) -> bool {
        self.is_ready()
            && matches!(
                self.state,
                ContextState::Idle | ContextState::Scanning | ContextState::Retrying | ContextState::Failed
            )
    }

    /// Replace the candidate list for a fresh attempt.
    pub fn set_waiting(&mut self, candidates: Vec<ApnSetting>) {
        self.perm_fail_countdown = candidates.len();
        self.waiting = candidates;
    }

    pub fn next_waiting(&self) -> Option<&ApnSetting> {
        self.waiting.first()
    }

    pub fn remove_waiting(&mut self, apn: &ApnSetting) {
        if let Some(pos) = self.waiting.iter().position(|a| a == apn) {
            self.waiting.remove(pos);
        }
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// All logical contexts, sorted by ascending priority rank.
#[derive(Debug, Clone)]
pub struct ContextRegistry {
    contexts: Vec<LogicalContext>,
    index: HashMap<ApnType, usize>,
}

impl ContextRegistry {
    /// Build from registrations. Duplicate types keep the first entry; ties
    /// in rank keep registration order.
    pub fn new(defs: &[ContextDef]) -> Self {
        let mut contexts: Vec<LogicalContext> = Vec::with_capacity(defs.len());
        for def in defs {
            if contexts.iter().all(|c| c.apn_type != def.apn_type) {
                contexts.push(LogicalContext::new(*def));
            }
        }
        contexts.sort_by_key(|c| c.priority);
        let index = contexts
            .iter()
            .enumerate()
            .map(|(i, c)| (c.apn_type, i))
            .collect();
        Self { contexts, index }
    }

    /// Every known type at its default rank.
    pub fn default_defs() -> Vec<ContextDef> {
        ApnType::ALL.iter().map(|t| ContextDef::new(*t)).collect()
    }

    pub fn contains(&self, t: ApnType) -> bool {
        self.index.contains_key(&t)
    }

    pub fn get(&self, t: ApnType) -> Option<&LogicalContext> {
        self.index.get(&t).map(|&i| &self.contexts[i])
    }

    pub fn get_mut(&mut self, t: ApnType) -> Option<&mut LogicalContext> {
        match self.index.get(&t) {
            Some(&i) => Some(&mut self.contexts[i]),
            None => None,
        }
    }

    /// Contexts in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &LogicalContext> {
        self.contexts.iter()
    }

    /// Types in priority order. Collected so callers can mutate while walking.
    pub fn types(&self) -> Vec<ApnType> {
        self.contexts.iter().map(|c| c.apn_type).collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
