//! Bring-up path: candidate lists, bearer sharing, single-bearer
//! arbitration, bring-up completions and retry tickets.

use tracing::{debug, info, warn};

use super::{BringUpOutcome, DataConnectionTracker};
use crate::apn::{ApnSetting, ApnType};
use crate::bearer::{BearerId, BearerState, RequestTag};
use crate::cause::FailCause;
use crate::context::{ContextState, Reason};
use crate::error::SetupError;
use crate::radio::{BringUpRequest, BringUpResult, DataProfile};
use crate::retry::{RetryKind, RetryTicket};

impl DataConnectionTracker {
    /// Try to bring up context `t` now.
    pub fn try_bring_up(&mut self, t: ApnType) -> Result<BringUpOutcome, SetupError> {
        let result = self.try_setup(t);
        self.drain_deferred();
        result
    }

    pub(super) fn try_setup(&mut self, t: ApnType) -> Result<BringUpOutcome, SetupError> {
        let Some(ctx) = self.registry.get(t) else {
            return Err(SetupError::NotReady(t));
        };
        if !ctx.is_connectable() {
            return match ctx.state {
                _ if !ctx.is_ready() => Err(SetupError::NotReady(t)),
                ContextState::Connected => Ok(BringUpOutcome::AlreadyConnected),
                _ => Err(SetupError::InFlight(t)),
            };
        }

        let blockers = self.gate.blockers();
        if !blockers.is_empty() {
            debug!(apn_type = %t, ?blockers, "data not allowed");
            return Err(SetupError::DataNotAllowed(blockers));
        }
        if self.gate.emergency_only {
            debug!(apn_type = %t, "emergency-only service, not bringing up");
            return Err(SetupError::EmergencyOnly);
        }

        let state = ctx.state;
        if state == ContextState::Failed || state == ContextState::Retrying {
            if let Some(ctx) = self.registry.get_mut(t) {
                ctx.state = ContextState::Idle;
            }
        }
        if matches!(
            state,
            ContextState::Idle | ContextState::Failed | ContextState::Retrying
        ) {
            let candidates = self.build_waiting(t);
            if candidates.is_empty() {
                self.notify_no_candidate(t);
                return Err(SetupError::NoCandidateAvailable(t));
            }
            debug!(
                apn_type = %t,
                candidates = ?candidates.iter().map(|a| a.id).collect::<Vec<_>>(),
                "candidate list built"
            );
            if let Some(ctx) = self.registry.get_mut(t) {
                ctx.set_waiting(candidates);
            }
        }
        self.setup_data(t)
    }

    /// Offer every ready context that can start a bring-up, in priority order.
    pub(super) fn setup_connectable(&mut self, reason: Reason) {
        for t in self.registry.types() {
            let Some(ctx) = self.registry.get_mut(t) else {
                continue;
            };
            if !ctx.is_connectable() {
                continue;
            }
            ctx.reason = reason;
            if let Err(e) = self.try_setup(t) {
                debug!(apn_type = %t, %reason, error = %e, "bring-up not started");
            }
        }
    }

    /// Ordered candidates for `t` on the current radio technology.
    ///
    /// DUN uses the carrier's dedicated tethering entry when there is one. A
    /// remembered preferred entry is tried alone if it serves `t` on this
    /// technology; if it no longer fits the technology it is forgotten.
    pub(super) fn build_waiting(&mut self, t: ApnType) -> Vec<ApnSetting> {
        if t == ApnType::Dun {
            if let Some(dun) = self.store.dun_apn() {
                return vec![dun];
            }
        }
        let rat = self.radio_tech;
        let candidates = self.store.list_candidates(t);
        if self.prefer_apn {
            if let Some(id) = self.store.preferred_apn_id() {
                if let Some(preferred) = candidates.iter().find(|a| a.id == id) {
                    if preferred.admits(rat) {
                        return vec![preferred.clone()];
                    }
                    info!(id, %rat, "preferred APN not usable on this radio technology, clearing");
                    self.store.set_preferred_apn_id(None);
                }
            }
        }
        candidates.into_iter().filter(|a| a.admits(rat)).collect()
    }

    fn notify_no_candidate(&mut self, t: ApnType) {
        warn!(apn_type = %t, rat = %self.radio_tech, "no candidate configuration");
        if let Some(ctx) = self.registry.get_mut(t) {
            ctx.reason = Reason::NoCandidate;
            ctx.last_fail = Some(FailCause::MissingUnknownApn);
        }
        self.notify(t, Reason::NoCandidate, Some(FailCause::MissingUnknownApn));
    }

    fn setup_data(&mut self, t: ApnType) -> Result<BringUpOutcome, SetupError> {
        let Some(ctx) = self.registry.get(t) else {
            return Err(SetupError::NotReady(t));
        };
        let Some(apn) = ctx.next_waiting().cloned() else {
            return Err(SetupError::NoCandidateAvailable(t));
        };

        if let Some(id) = self.pool.find_shareable(&ctx.waiting) {
            return self.share_bearer(t, id);
        }

        if self.policy.is_single_bearer(self.radio_tech) {
            if self.higher_priority_active(t) {
                debug!(apn_type = %t, "higher priority context holds the single bearer");
                return Err(SetupError::HigherPriorityActive);
            }
            if self.clean_up_for_arbitration(t) {
                info!(apn_type = %t, "waiting for lower priority bearers to come down");
                self.stats.arbitration_deferrals += 1;
                return Ok(BringUpOutcome::ArbitrationDeferred);
            }
        }

        let limit = self.policy.bearer_limit(self.radio_tech);
        let Some(id) = self.pool.acquire(limit) else {
            warn!(apn_type = %t, limit, "bearer pool exhausted");
            self.stats.pool_exhausted += 1;
            self.set_state(t, ContextState::Retrying);
            self.schedule_retry(t, RetryKind::Reconnect, Reason::Retry);
            return Err(SetupError::ResourceExhausted);
        };
        self.start_bring_up(t, id, apn)
    }

    fn start_bring_up(
        &mut self,
        t: ApnType,
        id: BearerId,
        apn: ApnSetting,
    ) -> Result<BringUpOutcome, SetupError> {
        let Some(tag) = self.pool.begin_activation(id, apn.clone()) else {
            return Err(SetupError::ResourceExhausted);
        };
        self.pool.bind(id, t);
        self.retry.cancel_retry(t);
        if let Some(ctx) = self.registry.get_mut(t) {
            ctx.bearer = Some(id);
            ctx.apn_setting = Some(apn.clone());
            ctx.pending_teardown = None;
        }
        self.set_state(t, ContextState::Connecting);

        info!(
            apn_type = %t,
            bearer = id.0,
            generation = tag.generation,
            apn = %apn.apn,
            rat = %self.radio_tech,
            "bringing up bearer"
        );
        self.stats.bring_up_requests += 1;
        let req = BringUpRequest {
            tag,
            apn,
            apn_type: t,
            profile: DataProfile::for_apn_type(t),
            radio_tech: self.radio_tech,
        };
        if let Err(e) = self.radio.bring_up(req) {
            warn!(apn_type = %t, error = %e, "bring-up submission failed");
            self.on_bring_up_complete(tag, BringUpResult::Failure(FailCause::RadioNotAvailable));
        }
        Ok(BringUpOutcome::Requested { bearer: id })
    }

    /// Bind `t` to an existing bearer. Active bearers connect immediately;
    /// activating ones complete together with their initiator.
    fn share_bearer(&mut self, t: ApnType, id: BearerId) -> Result<BringUpOutcome, SetupError> {
        let Some(bearer) = self.pool.get(id) else {
            return Err(SetupError::ResourceExhausted);
        };
        let state = bearer.state;
        let apn = bearer.apn.clone();
        self.pool.bind(id, t);
        self.retry.cancel_retry(t);
        if let Some(ctx) = self.registry.get_mut(t) {
            ctx.bearer = Some(id);
            ctx.apn_setting = apn;
            ctx.pending_teardown = None;
        }
        self.stats.shared_bindings += 1;
        info!(apn_type = %t, bearer = id.0, state = ?state, "sharing bearer");
        if state == BearerState::Active {
            self.complete_connection(t);
        } else {
            self.set_state(t, ContextState::Connecting);
        }
        Ok(BringUpOutcome::Shared { bearer: id })
    }

    /// Whether `t` has to leave the single bearer alone: a context of equal
    /// or better rank holds a bearer, or a better-ranked one is waiting for
    /// the bearer and has a candidate on the current radio technology.
    pub(super) fn higher_priority_active(&self, t: ApnType) -> bool {
        let Some(rank) = self.registry.get(t).map(|c| c.priority) else {
            return false;
        };
        for ctx in self.registry.iter().filter(|c| c.apn_type != t) {
            let holder = ctx.bearer.is_some() && ctx.priority <= rank;
            let contender = ctx.priority < rank
                && ctx.is_connectable()
                && ctx.state != ContextState::Failed
                && self.has_usable_candidate(ctx.apn_type);
            if holder || contender {
                debug!(apn_type = %t, higher = %ctx.apn_type, holder, "higher priority context active");
                return true;
            }
        }
        false
    }

    /// Some configuration could serve `t` on the current radio technology.
    fn has_usable_candidate(&self, t: ApnType) -> bool {
        if t == ApnType::Dun && self.store.dun_apn().is_some() {
            return true;
        }
        let rat = self.radio_tech;
        self.store.list_candidates(t).iter().any(|a| a.admits(rat))
    }

    fn complete_connection(&mut self, t: ApnType) {
        let mut remember = None;
        if let Some(ctx) = self.registry.get_mut(t) {
            ctx.last_fail = None;
            ctx.perm_fail_countdown = ctx.waiting.len();
            if t == ApnType::Default {
                remember = ctx.apn_setting.as_ref().map(|a| a.id);
            }
        }
        self.set_state(t, ContextState::Connected);
        if self.prefer_apn && self.store.preferred_apn_id().is_none() {
            if let Some(id) = remember {
                info!(id, "remembering preferred APN");
                self.store.set_preferred_apn_id(Some(id));
            }
        }
    }

    // ─── Completions ────────────────────────────────────────────────────

    pub(super) fn on_bring_up_complete(&mut self, tag: RequestTag, result: BringUpResult) {
        if !self.pool.is_current(tag, BearerState::Activating) {
            self.discard_stale(tag, "bring-up");
            return;
        }
        let id = tag.bearer;
        match result {
            BringUpResult::Success(mut properties) => {
                let apn = self.pool.get(id).and_then(|b| b.apn.clone());
                if properties.proxy.is_none() {
                    properties.proxy = apn.as_ref().and_then(|a| a.proxy_info());
                }
                self.pool.activated(id, properties);
                self.stats.bring_up_successes += 1;

                let refs = self.pool.get(id).map(|b| b.refs.clone()).unwrap_or_default();
                let (wanted, unwanted): (Vec<ApnType>, Vec<ApnType>) =
                    refs.into_iter().partition(|t| {
                        self.registry
                            .get(*t)
                            .is_some_and(|c| c.is_ready() && c.pending_teardown.is_none())
                    });
                info!(
                    bearer = id.0,
                    apn = apn.as_ref().map(|a| a.apn.as_str()).unwrap_or(""),
                    contexts = ?wanted,
                    "bearer active"
                );
                for t in &wanted {
                    self.complete_connection(*t);
                }

                if wanted.is_empty() {
                    // Every requester withdrew while the request was in flight.
                    let reason = unwanted
                        .first()
                        .and_then(|t| self.registry.get(*t))
                        .and_then(|c| c.pending_teardown)
                        .unwrap_or(Reason::DataDisabled);
                    for t in &unwanted {
                        if let Some(ctx) = self.registry.get_mut(*t) {
                            ctx.reason = ctx.pending_teardown.take().unwrap_or(reason);
                        }
                        self.set_state(*t, ContextState::Disconnecting);
                    }
                    self.request_tear_down(id, reason);
                } else {
                    for t in unwanted {
                        self.pool.unbind(id, t);
                        if let Some(ctx) = self.registry.get_mut(t) {
                            ctx.bearer = None;
                            ctx.pending_teardown = None;
                        }
                        self.set_state(t, ContextState::Idle);
                        self.deferred.push_back(t);
                    }
                }
            }
            BringUpResult::Failure(cause) => {
                let refs = self.pool.deactivated(id);
                if cause.is_permanent() {
                    self.stats.permanent_failures += 1;
                } else {
                    self.stats.transient_failures += 1;
                }
                warn!(
                    bearer = id.0,
                    %cause,
                    permanent = cause.is_permanent(),
                    contexts = ?refs,
                    "bring-up failed"
                );
                let mut released = Vec::new();
                for t in refs {
                    let Some(ctx) = self.registry.get_mut(t) else {
                        continue;
                    };
                    ctx.bearer = None;
                    if let Some(reason) = ctx.pending_teardown.take() {
                        ctx.reason = reason;
                        released.push(t);
                    } else if !ctx.is_ready() {
                        released.push(t);
                    } else {
                        self.on_setup_error(t, cause);
                        continue;
                    }
                    self.set_state(t, ContextState::Idle);
                }
                for t in released {
                    self.after_disconnected(t);
                }
            }
        }
    }

    /// Drop the failed candidate and move on: next candidate, restart, or
    /// give up when every candidate was permanently rejected.
    fn on_setup_error(&mut self, t: ApnType, cause: FailCause) {
        let Some(ctx) = self.registry.get_mut(t) else {
            return;
        };
        ctx.last_fail = Some(cause);
        if cause.is_permanent() {
            ctx.perm_fail_countdown = ctx.perm_fail_countdown.saturating_sub(1);
        }
        if let Some(apn) = ctx.apn_setting.clone() {
            ctx.remove_waiting(&apn);
        }

        if ctx.waiting.is_empty() {
            ctx.reason = Reason::ApnFailed;
            let give_up = ctx.perm_fail_countdown == 0;
            ctx.state = ContextState::Failed;
            debug!(apn_type = %t, %cause, "candidate list exhausted");
            self.notify(t, Reason::ApnFailed, Some(cause));
            if give_up {
                info!(apn_type = %t, "every candidate permanently rejected, not retrying");
            } else {
                self.schedule_retry(t, RetryKind::Restart, Reason::ApnFailed);
            }
        } else {
            ctx.reason = Reason::Retry;
            self.set_state(t, ContextState::Scanning);
            self.schedule_retry(t, RetryKind::NextCandidate, Reason::Retry);
        }
    }

    pub(super) fn on_retry_fired(&mut self, ticket: RetryTicket) {
        let t = ticket.apn_type;
        let Some(ctx) = self.registry.get_mut(t) else {
            return;
        };
        if !ctx.is_ready() {
            debug!(apn_type = %t, "retry ticket for a context that is no longer ready");
            return;
        }
        let fire = match ticket.kind {
            RetryKind::NextCandidate => ctx.state == ContextState::Scanning,
            RetryKind::Restart => matches!(ctx.state, ContextState::Failed | ContextState::Idle),
            RetryKind::Reconnect => matches!(
                ctx.state,
                ContextState::Idle | ContextState::Failed | ContextState::Retrying
            ),
        };
        if !fire {
            debug!(apn_type = %t, state = ctx.state.as_str(), kind = ?ticket.kind, "ignoring retry ticket");
            return;
        }
        ctx.reason = ticket.reason;
        debug!(apn_type = %t, kind = ?ticket.kind, id = ticket.id, "retry ticket fired");
        if let Err(e) = self.try_setup(t) {
            debug!(apn_type = %t, error = %e, "retry did not start a bring-up");
        }
    }
}
