//! # Data Connection Tracker
//!
//! Owns every logical context, the bearer pool, the retry scheduler and the
//! data gate, and is the only place their state changes. All inputs arrive
//! either as direct calls ([`DataConnectionTracker::enable`],
//! [`DataConnectionTracker::disable`]) or as a [`TrackerEvent`]; radio
//! requests go out through [`RadioCommands`] and their completions come back
//! as events.
//!
//! Processing is strictly sequential. A handler runs to completion, then any
//! contexts it released are re-offered before the next input is taken.
//!
//! - [`setup`] — candidate lists, bring-up, sharing, arbitration, completions
//! - [`cleanup`] — teardown, forced reset, post-disconnect retry rules

mod cleanup;
mod setup;

use quanta::Clock;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::apn::{ApnType, RadioTech};
use crate::bearer::{BearerConnection, BearerId, BearerPool, BearerState, LinkProperties, RequestTag};
use crate::cause::FailCause;
use crate::config::TrackerConfig;
use crate::context::{ContextRegistry, ContextState, LogicalContext, Reason};
use crate::error::TrackerError;
use crate::gate::DataGate;
use crate::metrics::TrackerStats;
use crate::observer::{ConnectivityObserver, ContextNotification};
use crate::radio::{BearerPolicy, BringUpResult, RadioCommands};
use crate::retry::{RetryKind, RetryScheduler};
use crate::store::ApnStore;

// ─── Events ─────────────────────────────────────────────────────────────────

/// Inputs processed by [`DataConnectionTracker::handle_event`].
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// External prerequisites for a type changed.
    SetDependencyMet { apn_type: ApnType, met: bool },
    /// Offer every connectable context for bring-up.
    TrySetupData(Reason),
    /// Modem finished a bring-up request.
    BringUpComplete { tag: RequestTag, result: BringUpResult },
    /// Modem finished a teardown request.
    TearDownComplete { tag: RequestTag },
    /// The network dropped an active bearer.
    BearerDropped { tag: RequestTag, cause: FailCause },
    Attached,
    Detached,
    RoamingOn,
    RoamingOff,
    RadioAvailable,
    RadioOffOrNotAvailable,
    VoiceCallStarted,
    VoiceCallEnded,
    PsRestrictEnabled,
    PsRestrictDisabled,
    EmergencyOnly(bool),
    RadioTechChanged(RadioTech),
    /// The APN store contents changed.
    ApnChanged,
    SetUserDataEnabled(bool),
    SetInternalDataEnabled(bool),
    SetPolicyDataEnabled(bool),
    SetDataRoamingEnabled(bool),
    CleanUpAll { tear_down: bool, reason: Reason },
    CleanUpConnection { apn_type: ApnType, tear_down: bool, reason: Reason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnableOutcome {
    AlreadyActive,
    RequestStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableOutcome {
    RequestStarted,
    AlreadyInactive,
}

/// Result of a bring-up attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpOutcome {
    /// A bring-up request was sent on `bearer`.
    Requested { bearer: BearerId },
    /// Bound to an existing bearer; no request sent.
    Shared { bearer: BearerId },
    /// Lower-priority bearers are being torn down first.
    ArbitrationDeferred,
    AlreadyConnected,
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub apn_type: ApnType,
    pub priority: u8,
    pub enabled: bool,
    pub dependency_met: bool,
    pub state: ContextState,
    pub reason: Reason,
    pub apn: Option<String>,
    pub bearer: Option<BearerId>,
    pub waiting: usize,
    pub last_fail: Option<FailCause>,
    pub retry: Option<RetryKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BearerSnapshot {
    pub id: BearerId,
    pub state: BearerState,
    pub generation: u64,
    pub apn: Option<String>,
    pub refs: Vec<ApnType>,
    pub properties: Option<LinkProperties>,
}

/// Point-in-time copy of the tracker for status endpoints and tests.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSnapshot {
    pub radio_tech: RadioTech,
    pub overall_state: ContextState,
    pub gate: DataGate,
    pub contexts: Vec<ContextSnapshot>,
    /// Bearers not in `Inactive`.
    pub bearers: Vec<BearerSnapshot>,
    pub pending_retries: usize,
    pub stats: TrackerStats,
}

impl TrackerSnapshot {
    pub fn context(&self, t: ApnType) -> Option<&ContextSnapshot> {
        self.contexts.iter().find(|c| c.apn_type == t)
    }
}

// ─── Tracker ────────────────────────────────────────────────────────────────

pub struct DataConnectionTracker {
    registry: ContextRegistry,
    pool: BearerPool,
    retry: RetryScheduler,
    policy: BearerPolicy,
    gate: DataGate,
    radio_tech: RadioTech,
    radio: Box<dyn RadioCommands>,
    store: Box<dyn ApnStore>,
    observers: Vec<Box<dyn ConnectivityObserver>>,
    prefer_apn: bool,
    /// Contexts released during the current input, re-offered before the next.
    deferred: VecDeque<ApnType>,
    /// Re-offer every connectable context once the current input is done.
    reoffer_all: Option<Reason>,
    stats: TrackerStats,
}

impl DataConnectionTracker {
    pub fn new(config: &TrackerConfig, radio: Box<dyn RadioCommands>, store: Box<dyn ApnStore>) -> Self {
        Self::with_clock(config, radio, store, Clock::new())
    }

    /// Build with an explicit clock (tests pass `Clock::mock()`).
    pub fn with_clock(
        config: &TrackerConfig,
        radio: Box<dyn RadioCommands>,
        store: Box<dyn ApnStore>,
        clock: Clock,
    ) -> Self {
        let mut registry = ContextRegistry::new(&config.contexts);
        if config.data.default_enabled {
            if let Some(ctx) = registry.get_mut(ApnType::Default) {
                ctx.enabled = true;
            }
        }
        let gate = DataGate {
            user_data_enabled: config.data.user_data_enabled,
            data_roaming_enabled: config.data.data_roaming_enabled,
            concurrent_voice_data: config.radio.concurrent_voice_data,
            ..Default::default()
        };
        info!(
            contexts = registry.len(),
            rat = %config.radio.tech,
            max_bearers = config.radio.bearer.max_bearers,
            "data connection tracker created"
        );
        Self {
            registry,
            pool: BearerPool::new(config.radio.bearer.max_bearers),
            retry: RetryScheduler::new(config.retry, clock),
            policy: config.radio.bearer.clone(),
            gate,
            radio_tech: config.radio.tech,
            radio,
            store,
            observers: Vec::new(),
            prefer_apn: config.data.prefer_apn,
            deferred: VecDeque::new(),
            reoffer_all: None,
            stats: TrackerStats::default(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn ConnectivityObserver>) {
        self.observers.push(observer);
    }

    // ─── Requests ───────────────────────────────────────────────────────

    /// Ask for connectivity of type `t`.
    pub fn enable(&mut self, t: ApnType) -> Result<EnableOutcome, TrackerError> {
        if !self.is_type_available(t) {
            return Err(TrackerError::TypeUnavailable(t));
        }
        let Some(ctx) = self.registry.get(t) else {
            return Err(TrackerError::TypeUnavailable(t));
        };
        if ctx.state == ContextState::Connected {
            return Ok(EnableOutcome::AlreadyActive);
        }
        let met = ctx.dependency_met;
        self.apply_new_state(t, true, met);
        self.drain_deferred();
        Ok(EnableOutcome::RequestStarted)
    }

    /// Withdraw the request for type `t`.
    pub fn disable(&mut self, t: ApnType) -> Result<DisableOutcome, TrackerError> {
        let Some(ctx) = self.registry.get(t) else {
            return Err(TrackerError::TypeUnavailable(t));
        };
        let was_disconnected = ctx.state.is_disconnected();
        let met = ctx.dependency_met;
        self.apply_new_state(t, false, met);
        self.drain_deferred();
        if was_disconnected {
            Ok(DisableOutcome::AlreadyInactive)
        } else {
            Ok(DisableOutcome::RequestStarted)
        }
    }

    /// Hipri follows the default context's dependency and ignores its own.
    pub fn set_dependency_met(&mut self, t: ApnType, met: bool) {
        if t == ApnType::Hipri {
            return;
        }
        if let Some(enabled) = self.registry.get(t).map(|c| c.enabled) {
            self.apply_new_state(t, enabled, met);
        }
        if t == ApnType::Default {
            if let Some(enabled) = self.registry.get(ApnType::Hipri).map(|c| c.enabled) {
                self.apply_new_state(ApnType::Hipri, enabled, met);
            }
        }
        self.drain_deferred();
    }

    fn apply_new_state(&mut self, t: ApnType, enabled: bool, met: bool) {
        let Some(ctx) = self.registry.get_mut(t) else {
            return;
        };
        debug!(
            apn_type = %t,
            enabled,
            met,
            was_enabled = ctx.enabled,
            was_met = ctx.dependency_met,
            state = ctx.state.as_str(),
            "apply new state"
        );
        let mut clean_up = false;
        let mut try_setup = false;
        if ctx.is_ready() {
            if enabled && met {
                match ctx.state {
                    ContextState::Connecting
                    | ContextState::Scanning
                    | ContextState::Connected
                    | ContextState::Disconnecting => return,
                    ContextState::Idle | ContextState::Failed | ContextState::Retrying => {
                        try_setup = true;
                        ctx.reason = Reason::DataEnabled;
                    }
                }
            } else if !enabled {
                ctx.reason = Reason::DataDisabled;
            } else {
                ctx.reason = Reason::DependencyUnmet;
            }
            clean_up = true;
        } else if enabled && met {
            ctx.reason = if ctx.enabled {
                Reason::DependencyMet
            } else {
                Reason::DataEnabled
            };
            if ctx.state == ContextState::Failed {
                ctx.state = ContextState::Idle;
            }
            // A teardown queued by the earlier disable is superseded.
            if matches!(
                ctx.pending_teardown,
                Some(Reason::DataDisabled | Reason::DependencyUnmet)
            ) {
                ctx.pending_teardown = None;
            }
            try_setup = true;
        }
        ctx.enabled = enabled;
        ctx.dependency_met = met;
        let reason = ctx.reason;

        if clean_up {
            self.clean_up_context(t, true, reason);
        }
        if try_setup {
            if let Err(e) = self.try_setup(t) {
                debug!(apn_type = %t, error = %e, "bring-up not started");
            }
        }
    }

    // ─── Events ─────────────────────────────────────────────────────────

    pub fn handle_event(&mut self, event: TrackerEvent) {
        debug!(?event, "tracker event");
        match event {
            TrackerEvent::SetDependencyMet { apn_type, met } => self.set_dependency_met(apn_type, met),
            TrackerEvent::TrySetupData(reason) => self.setup_connectable(reason),
            TrackerEvent::BringUpComplete { tag, result } => self.on_bring_up_complete(tag, result),
            TrackerEvent::TearDownComplete { tag } => self.on_tear_down_complete(tag),
            TrackerEvent::BearerDropped { tag, cause } => self.on_bearer_dropped(tag, cause),
            TrackerEvent::Attached => self.on_attached(),
            TrackerEvent::Detached => self.on_detached(),
            TrackerEvent::RoamingOn => self.on_roaming_on(),
            TrackerEvent::RoamingOff => self.on_roaming_off(),
            TrackerEvent::RadioAvailable => self.on_radio_available(),
            TrackerEvent::RadioOffOrNotAvailable => self.on_radio_off(),
            TrackerEvent::VoiceCallStarted => self.on_voice_call_started(),
            TrackerEvent::VoiceCallEnded => self.on_voice_call_ended(),
            TrackerEvent::PsRestrictEnabled => self.gate.ps_restricted = true,
            TrackerEvent::PsRestrictDisabled => self.on_ps_restrict_disabled(),
            TrackerEvent::EmergencyOnly(on) => self.on_emergency_only(on),
            TrackerEvent::RadioTechChanged(rat) => self.on_radio_tech_changed(rat),
            TrackerEvent::ApnChanged => self.on_apn_changed(),
            TrackerEvent::SetUserDataEnabled(on) => self.on_set_user_data_enabled(on),
            TrackerEvent::SetInternalDataEnabled(on) => {
                let before = self.gate.any_data_enabled();
                self.gate.internal_data_enabled = on;
                self.on_any_data_changed(before);
            }
            TrackerEvent::SetPolicyDataEnabled(on) => {
                let before = self.gate.any_data_enabled();
                self.gate.policy_data_enabled = on;
                self.on_any_data_changed(before);
            }
            TrackerEvent::SetDataRoamingEnabled(on) => self.on_set_data_roaming_enabled(on),
            TrackerEvent::CleanUpAll { tear_down, reason } => {
                self.clean_up_all(tear_down, reason);
            }
            TrackerEvent::CleanUpConnection {
                apn_type,
                tear_down,
                reason,
            } => {
                self.clean_up_context(apn_type, tear_down, reason);
            }
        }
        self.drain_deferred();
    }

    /// Fire every retry ticket that is due. Returns how many fired.
    pub fn fire_due_retries(&mut self) -> usize {
        let due = self.retry.take_due();
        for ticket in &due {
            self.stats.retries_fired += 1;
            self.on_retry_fired(*ticket);
        }
        self.drain_deferred();
        due.len()
    }

    /// Time until the next retry ticket is due.
    pub fn next_retry_in(&self) -> Option<Duration> {
        self.retry.time_until_next()
    }

    fn on_attached(&mut self) {
        info!("packet service attached");
        self.gate.attached = true;
        if self.overall_state() == ContextState::Connected {
            self.notify_ready(Reason::DataAttached);
        } else {
            self.notify_off(Reason::DataAttached);
        }
        self.gate.auto_attach_on_creation = true;
        self.setup_connectable(Reason::DataAttached);
    }

    fn on_detached(&mut self) {
        info!("packet service detached");
        self.gate.attached = false;
        self.notify_ready(Reason::DataDetached);
    }

    fn on_roaming_on(&mut self) {
        self.gate.roaming = true;
        if !self.gate.user_data_enabled {
            return;
        }
        if self.gate.data_roaming_enabled {
            info!("roaming on, data roaming allowed");
            self.notify_ready(Reason::RoamingOn);
            self.setup_connectable(Reason::RoamingOn);
        } else {
            info!("roaming on, data roaming disallowed; tearing down");
            self.clean_up_all(true, Reason::RoamingOn);
            self.notify_off(Reason::RoamingOn);
        }
    }

    fn on_roaming_off(&mut self) {
        self.gate.roaming = false;
        if !self.gate.user_data_enabled {
            return;
        }
        if self.gate.data_roaming_enabled {
            self.notify_ready(Reason::RoamingOff);
        } else {
            self.notify_off(Reason::RoamingOff);
            self.setup_connectable(Reason::RoamingOff);
        }
    }

    fn on_radio_available(&mut self) {
        self.gate.radio_on = true;
        self.notify_off(Reason::RadioTurnedOn);
        self.setup_connectable(Reason::RadioTurnedOn);
    }

    fn on_radio_off(&mut self) {
        info!("radio off or unavailable; resetting all contexts");
        self.gate.radio_on = false;
        self.clean_up_all(false, Reason::RadioTurnedOff);
        self.notify_off(Reason::RadioTurnedOff);
    }

    fn on_voice_call_started(&mut self) {
        self.gate.voice_call_active = true;
        if self.overall_state() == ContextState::Connected && !self.gate.concurrent_voice_data {
            self.notify_ready(Reason::VoiceCallStarted);
        }
    }

    fn on_voice_call_ended(&mut self) {
        self.gate.voice_call_active = false;
        if self.overall_state() == ContextState::Connected && !self.gate.concurrent_voice_data {
            self.notify_ready(Reason::VoiceCallEnded);
        }
        self.setup_connectable(Reason::VoiceCallEnded);
    }

    fn on_ps_restrict_disabled(&mut self) {
        self.gate.ps_restricted = false;
        let overall = self.overall_state();
        if overall == ContextState::Connected {
            return;
        }
        if overall == ContextState::Failed {
            self.clean_up_all(false, Reason::PsRestrictDisabled);
        }
        if let Some(ctx) = self.registry.get_mut(ApnType::Default) {
            ctx.reason = Reason::PsRestrictDisabled;
            if let Err(e) = self.try_setup(ApnType::Default) {
                debug!(error = %e, "default bring-up not started");
            }
        }
    }

    fn on_emergency_only(&mut self, on: bool) {
        if self.gate.emergency_only == on {
            return;
        }
        self.gate.emergency_only = on;
        if !on {
            self.setup_connectable(Reason::DataEnabled);
        }
    }

    fn on_radio_tech_changed(&mut self, rat: RadioTech) {
        if self.radio_tech == rat {
            return;
        }
        info!(from = %self.radio_tech, to = %rat, "radio technology changed");
        self.radio_tech = rat;
        self.setup_connectable(Reason::RadioTechChanged);
    }

    fn on_apn_changed(&mut self) {
        if let Err(e) = self.store.refresh() {
            warn!(error = %e, "APN store refresh failed");
        }
        let disconnected = self.overall_state().is_disconnected();
        info!(disconnected, "APN configuration changed");
        self.clean_up_all(!disconnected, Reason::ApnChanged);
        if disconnected {
            self.setup_connectable(Reason::ApnChanged);
        }
    }

    fn on_set_user_data_enabled(&mut self, on: bool) {
        if self.gate.user_data_enabled == on {
            return;
        }
        info!(enabled = on, "user data setting changed");
        self.gate.user_data_enabled = on;
        if self.gate.roaming && !self.gate.data_roaming_enabled {
            self.notify_off(if on { Reason::RoamingOn } else { Reason::DataDisabled });
        }
        if on {
            self.setup_connectable(Reason::DataEnabled);
        } else {
            self.clean_up_all(true, Reason::DataDisabled);
        }
    }

    fn on_any_data_changed(&mut self, before: bool) {
        let after = self.gate.any_data_enabled();
        if before == after {
            return;
        }
        if after {
            self.setup_connectable(Reason::DataEnabled);
        } else {
            self.clean_up_all(true, Reason::DataDisabled);
        }
    }

    fn on_set_data_roaming_enabled(&mut self, on: bool) {
        if self.gate.data_roaming_enabled == on {
            return;
        }
        self.gate.data_roaming_enabled = on;
        if !self.gate.roaming {
            return;
        }
        if on {
            self.setup_connectable(Reason::RoamingOn);
        } else {
            self.clean_up_all(true, Reason::RoamingOn);
            self.notify_off(Reason::RoamingOn);
        }
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn context(&self, t: ApnType) -> Option<&LogicalContext> {
        self.registry.get(t)
    }

    pub fn state(&self, t: ApnType) -> Option<ContextState> {
        self.registry.get(t).map(|c| c.state)
    }

    pub fn bearer(&self, id: BearerId) -> Option<&BearerConnection> {
        self.pool.get(id)
    }

    pub fn gate(&self) -> &DataGate {
        &self.gate
    }

    pub fn radio_tech(&self) -> RadioTech {
        self.radio_tech
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    /// Summary across enabled contexts: any connected wins, then connecting,
    /// then idle; failed only if every enabled context failed.
    pub fn overall_state(&self) -> ContextState {
        let mut any_enabled = false;
        let mut connecting = false;
        let mut failed = true;
        for ctx in self.registry.iter().filter(|c| c.enabled) {
            any_enabled = true;
            match ctx.state {
                ContextState::Connected | ContextState::Disconnecting => return ContextState::Connected,
                ContextState::Connecting | ContextState::Retrying => {
                    connecting = true;
                    failed = false;
                }
                ContextState::Idle | ContextState::Scanning => failed = false,
                ContextState::Failed => {}
            }
        }
        if !any_enabled {
            ContextState::Idle
        } else if connecting {
            ContextState::Connecting
        } else if !failed {
            ContextState::Idle
        } else {
            ContextState::Failed
        }
    }

    pub fn is_type_enabled(&self, t: ApnType) -> bool {
        self.registry.get(t).is_some_and(|c| c.enabled)
    }

    /// Bound to a bearer (activating, active or disconnecting).
    pub fn is_type_active(&self, t: ApnType) -> bool {
        self.registry.get(t).is_some_and(|c| c.bearer.is_some())
    }

    /// Registered, and some configuration can serve it.
    pub fn is_type_available(&self, t: ApnType) -> bool {
        if !self.registry.contains(t) {
            return false;
        }
        if t == ApnType::Dun && self.store.dun_apn().is_some() {
            return true;
        }
        !self.store.list_candidates(t).is_empty()
    }

    /// Types whose contexts are ready while attached.
    pub fn active_types(&self) -> Vec<ApnType> {
        if !self.gate.attached {
            return Vec::new();
        }
        self.registry
            .iter()
            .filter(|c| c.is_ready())
            .map(|c| c.apn_type)
            .collect()
    }

    /// Selector string of the configuration in use for `t`.
    pub fn active_apn(&self, t: ApnType) -> Option<String> {
        self.registry
            .get(t)
            .and_then(|c| c.apn_setting.as_ref())
            .map(|a| a.apn.clone())
    }

    pub fn link_properties(&self, t: ApnType) -> Option<LinkProperties> {
        let ctx = self.registry.get(t)?;
        if ctx.state != ContextState::Connected {
            return None;
        }
        self.pool.get(ctx.bearer?)?.properties.clone()
    }

    pub fn is_data_possible(&self, t: ApnType) -> bool {
        let Some(ctx) = self.registry.get(t) else {
            return false;
        };
        let type_possible = !(ctx.enabled && ctx.state == ContextState::Failed);
        self.gate.is_data_allowed() && type_possible
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            radio_tech: self.radio_tech,
            overall_state: self.overall_state(),
            gate: self.gate.clone(),
            contexts: self
                .registry
                .iter()
                .map(|c| ContextSnapshot {
                    apn_type: c.apn_type,
                    priority: c.priority,
                    enabled: c.enabled,
                    dependency_met: c.dependency_met,
                    state: c.state,
                    reason: c.reason,
                    apn: c.apn_setting.as_ref().map(|a| a.apn.clone()),
                    bearer: c.bearer,
                    waiting: c.waiting.len(),
                    last_fail: c.last_fail,
                    retry: self.retry.pending(c.apn_type).map(|t| t.kind),
                })
                .collect(),
            bearers: self
                .pool
                .iter()
                .filter(|b| b.state != BearerState::Inactive || !b.refs.is_empty())
                .map(|b| BearerSnapshot {
                    id: b.id,
                    state: b.state,
                    generation: b.generation,
                    apn: b.apn.as_ref().map(|a| a.apn.clone()),
                    refs: b.refs.clone(),
                    properties: b.properties.clone(),
                })
                .collect(),
            pending_retries: self.retry.pending_count(),
            stats: self.stats,
        }
    }

    // ─── Notifications ──────────────────────────────────────────────────

    /// Change state and notify observers. No-op if unchanged.
    fn set_state(&mut self, t: ApnType, state: ContextState) {
        let Some(ctx) = self.registry.get_mut(t) else {
            return;
        };
        if ctx.state == state {
            return;
        }
        debug!(
            apn_type = %t,
            from = ctx.state.as_str(),
            to = state.as_str(),
            reason = %ctx.reason,
            "context state"
        );
        ctx.state = state;
        let reason = ctx.reason;
        self.notify(t, reason, None);
    }

    fn notify(&self, t: ApnType, reason: Reason, failure: Option<FailCause>) {
        let Some(ctx) = self.registry.get(t) else {
            return;
        };
        let properties = match (ctx.state, ctx.bearer) {
            (ContextState::Connected, Some(id)) => self.pool.get(id).and_then(|b| b.properties.clone()),
            _ => None,
        };
        let n = ContextNotification {
            apn_type: t,
            state: ctx.state,
            reason,
            properties,
            failure,
        };
        for o in &self.observers {
            o.notify(&n);
        }
    }

    /// Re-announce every ready context, then the unavailable ones.
    fn notify_ready(&self, reason: Reason) {
        if self.gate.attached {
            for ctx in self.registry.iter().filter(|c| c.is_ready()) {
                self.notify(ctx.apn_type, reason, None);
            }
        }
        self.notify_off(reason);
    }

    /// Announce contexts that cannot currently be served.
    fn notify_off(&self, reason: Reason) {
        for ctx in self
            .registry
            .iter()
            .filter(|c| !self.gate.attached || !c.is_ready())
        {
            self.notify(ctx.apn_type, reason, None);
        }
    }

    // ─── Internal ───────────────────────────────────────────────────────

    /// Re-offer contexts released while handling the last input.
    fn drain_deferred(&mut self) {
        loop {
            if let Some(reason) = self.reoffer_all.take() {
                self.setup_connectable(reason);
                continue;
            }
            let Some(t) = self.deferred.pop_front() else {
                break;
            };
            if !self.registry.get(t).is_some_and(|c| c.is_connectable()) {
                continue;
            }
            if let Err(e) = self.try_setup(t) {
                debug!(apn_type = %t, error = %e, "re-offer did not start a bring-up");
            }
        }
    }

    fn schedule_retry(&mut self, t: ApnType, kind: RetryKind, reason: Reason) {
        let ticket = self.retry.schedule(t, kind, reason);
        self.stats.retries_scheduled += 1;
        debug!(
            apn_type = %t,
            kind = ?kind,
            delay_ms = ticket.delay.as_millis() as u64,
            "retry scheduled"
        );
    }

    fn discard_stale(&mut self, tag: RequestTag, what: &'static str) {
        self.stats.stale_completions += 1;
        warn!(
            bearer = tag.bearer.0,
            generation = tag.generation,
            current = ?self.pool.get(tag.bearer).map(|b| (b.generation, b.state)),
            what,
            "discarding stale completion"
        );
    }
}
