//! Teardown path: graceful teardown, forced reset, teardown completions,
//! bearer loss, and the re-offer rules applied once a context is released.

use tracing::{debug, info, warn};

use super::DataConnectionTracker;
use crate::apn::ApnType;
use crate::bearer::{BearerId, BearerState, RequestTag};
use crate::cause::FailCause;
use crate::context::{ContextState, Reason};
use crate::radio::TearDownRequest;
use crate::retry::RetryKind;

impl DataConnectionTracker {
    /// Release context `t`. With `tear_down` the bearer is released
    /// gracefully (and torn down if this was its last reference); without
    /// it the bearer is reset locally and any in-flight completion for it
    /// becomes stale.
    ///
    /// Returns whether the context was holding or acquiring a bearer.
    pub fn clean_up_context(&mut self, t: ApnType, tear_down: bool, reason: Reason) -> bool {
        let Some(ctx) = self.registry.get_mut(t) else {
            return false;
        };
        let was_connected = !ctx.state.is_disconnected();
        ctx.reason = reason;
        self.retry.cancel_retry(t);
        debug!(apn_type = %t, tear_down, %reason, "clean up context");
        if tear_down {
            self.tear_down_context(t, reason);
        } else {
            self.reset_context(t, reason);
        }
        was_connected
    }

    /// Release every context. Returns whether any was holding or acquiring
    /// a bearer.
    pub fn clean_up_all(&mut self, tear_down: bool, reason: Reason) -> bool {
        let mut did_disconnect = false;
        for t in self.registry.types() {
            did_disconnect |= self.clean_up_context(t, tear_down, reason);
        }
        debug!(tear_down, %reason, did_disconnect, "clean up all");
        did_disconnect
    }

    /// Release the lower-ranked contexts holding a bearer ahead of a
    /// single-bearer bring-up of `t`. Returns whether some bearer is still
    /// occupied, in which case `t` must wait for it to come down.
    pub(super) fn clean_up_for_arbitration(&mut self, t: ApnType) -> bool {
        let Some(rank) = self.registry.get(t).map(|c| c.priority) else {
            return false;
        };
        let lower: Vec<ApnType> = self
            .registry
            .iter()
            .filter(|c| c.apn_type != t && c.priority > rank && c.bearer.is_some())
            .map(|c| c.apn_type)
            .collect();
        for other in lower {
            self.clean_up_context(other, true, Reason::SingleBearerArbitration);
        }
        self.pool.in_use() > 0
    }

    fn tear_down_context(&mut self, t: ApnType, reason: Reason) {
        let Some(ctx) = self.registry.get(t) else {
            return;
        };
        let (state, bearer, ready) = (ctx.state, ctx.bearer, ctx.is_ready());
        match state {
            ContextState::Idle | ContextState::Disconnecting => {}
            ContextState::Failed | ContextState::Scanning | ContextState::Retrying => {
                self.set_state(t, ContextState::Idle);
                if ready {
                    self.deferred.push_back(t);
                }
            }
            ContextState::Connecting => {
                if let Some(ctx) = self.registry.get_mut(t) {
                    ctx.pending_teardown = Some(reason);
                }
                debug!(apn_type = %t, "teardown queued until bring-up completes");
            }
            ContextState::Connected => {
                let Some(id) = bearer else {
                    self.set_state(t, ContextState::Idle);
                    return;
                };
                let refs = self.pool.get(id).map(|b| b.refs.clone()).unwrap_or_default();
                if refs.len() <= 1 || self.dun_tears_down_all(t) {
                    for r in &refs {
                        if let Some(ctx) = self.registry.get_mut(*r) {
                            ctx.reason = reason;
                        }
                        self.set_state(*r, ContextState::Disconnecting);
                    }
                    self.request_tear_down(id, reason);
                } else {
                    let remaining = self.pool.unbind(id, t);
                    if let Some(ctx) = self.registry.get_mut(t) {
                        ctx.bearer = None;
                    }
                    debug!(apn_type = %t, bearer = id.0, remaining, "released shared bearer");
                    self.set_state(t, ContextState::Idle);
                    self.after_disconnected(t);
                }
            }
        }
    }

    /// DUN on a dedicated tethering configuration, or on a single-bearer
    /// technology, takes the whole bearer down with it.
    fn dun_tears_down_all(&self, t: ApnType) -> bool {
        t == ApnType::Dun
            && (self.store.dun_apn().is_some() || self.policy.is_single_bearer(self.radio_tech))
    }

    fn reset_context(&mut self, t: ApnType, reason: Reason) {
        let bearer = self.registry.get(t).and_then(|c| c.bearer);
        if let Some(id) = bearer {
            let refs = self.pool.reset(id);
            debug!(bearer = id.0, contexts = ?refs, "bearer reset");
            for r in refs {
                if let Some(ctx) = self.registry.get_mut(r) {
                    ctx.bearer = None;
                    ctx.pending_teardown = None;
                    ctx.reason = reason;
                }
                self.set_state(r, ContextState::Idle);
            }
        }
        if let Some(ctx) = self.registry.get_mut(t) {
            ctx.bearer = None;
            ctx.pending_teardown = None;
        }
        self.set_state(t, ContextState::Idle);
    }

    pub(super) fn request_tear_down(&mut self, id: BearerId, reason: Reason) {
        let Some(tag) = self.pool.begin_teardown(id) else {
            return;
        };
        info!(bearer = id.0, generation = tag.generation, %reason, "tearing down bearer");
        self.stats.tear_down_requests += 1;
        if let Err(e) = self.radio.tear_down(TearDownRequest { tag, reason }) {
            warn!(bearer = id.0, error = %e, "teardown submission failed, treating bearer as down");
            self.on_tear_down_complete(tag);
        }
    }

    // ─── Completions ────────────────────────────────────────────────────

    pub(super) fn on_tear_down_complete(&mut self, tag: RequestTag) {
        if !self.pool.is_current(tag, BearerState::Disconnecting) {
            self.discard_stale(tag, "teardown");
            return;
        }
        let refs = self.pool.teardown_complete(tag.bearer);
        info!(bearer = tag.bearer.0, contexts = ?refs, "bearer down");
        for r in &refs {
            if let Some(ctx) = self.registry.get_mut(*r) {
                ctx.bearer = None;
                ctx.pending_teardown = None;
            }
            self.set_state(*r, ContextState::Idle);
        }
        for r in refs {
            self.after_disconnected(r);
        }
    }

    pub(super) fn on_bearer_dropped(&mut self, tag: RequestTag, cause: FailCause) {
        if !self.pool.is_current(tag, BearerState::Active) {
            self.discard_stale(tag, "bearer drop");
            return;
        }
        let refs = self.pool.deactivated(tag.bearer);
        self.stats.bearer_drops += 1;
        warn!(bearer = tag.bearer.0, %cause, contexts = ?refs, "bearer lost");
        for r in &refs {
            if let Some(ctx) = self.registry.get_mut(*r) {
                ctx.bearer = None;
                ctx.reason = Reason::LostConnection;
                ctx.last_fail = Some(cause);
            }
        }
        for r in refs {
            self.after_disconnected(r);
        }
    }

    /// Decide what happens to a context that just lost its bearer.
    ///
    /// Still wanted and attached: an instability loss waits for a reconnect
    /// ticket, a deliberate one is re-offered as soon as the current input
    /// is done. Otherwise the context settles in `Idle`, and on a
    /// single-bearer technology every connectable context is re-offered so
    /// the freed bearer goes to the highest-priority one.
    pub(super) fn after_disconnected(&mut self, t: ApnType) {
        let Some(ctx) = self.registry.get(t) else {
            return;
        };
        let reason = ctx.reason;
        if self.gate.attached && ctx.is_ready() && self.retry_after_disconnected(t) {
            if reason.is_instability() {
                self.set_state(t, ContextState::Retrying);
                self.schedule_retry(t, RetryKind::Reconnect, reason);
            } else {
                self.set_state(t, ContextState::Idle);
                self.deferred.push_back(t);
            }
            return;
        }
        if let Some(ctx) = self.registry.get_mut(t) {
            ctx.apn_setting = None;
        }
        self.set_state(t, ContextState::Idle);
        if self.policy.is_single_bearer(self.radio_tech) {
            self.reoffer_all = Some(Reason::SingleBearerArbitration);
        }
    }

    fn retry_after_disconnected(&self, t: ApnType) -> bool {
        let radio_off = self
            .registry
            .get(t)
            .is_some_and(|c| c.reason == Reason::RadioTurnedOff);
        let blocked = self.policy.is_single_bearer(self.radio_tech) && self.higher_priority_active(t);
        !radio_off && !blocked
    }
}
