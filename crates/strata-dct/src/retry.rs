//! # Retry Scheduler
//!
//! At most one pending retry ticket per logical context. Scheduling a new
//! ticket replaces the old one (last writer wins); cancelling is idempotent.
//! Delays are fixed per retry kind, with no exponential growth.
//!
//! Time comes from a [`quanta::Clock`] so tests can drive it with
//! `Clock::mock()` instead of sleeping.

use quanta::{Clock, Instant};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::apn::ApnType;
use crate::context::Reason;

/// What a ticket does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    /// A candidate failed; try the next one in the current list.
    NextCandidate,
    /// The list is exhausted; rebuild it and start over.
    Restart,
    /// The bearer was lost; bring the context back up.
    Reconnect,
}

/// Fixed delays per retry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(with = "millis")]
    pub candidate_delay: Duration,
    #[serde(with = "millis")]
    pub restart_delay: Duration,
    /// Replaces `restart_delay` when `fail_fast` is on.
    #[serde(with = "millis")]
    pub fail_fast_delay: Duration,
    #[serde(with = "millis")]
    pub reconnect_delay: Duration,
    pub fail_fast: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            candidate_delay: Duration::from_millis(50),
            restart_delay: Duration::from_millis(20_000),
            fail_fast_delay: Duration::from_millis(3_000),
            reconnect_delay: Duration::from_millis(5_000),
            fail_fast: false,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, kind: RetryKind) -> Duration {
        match kind {
            RetryKind::NextCandidate => self.candidate_delay,
            RetryKind::Restart if self.fail_fast => self.fail_fast_delay,
            RetryKind::Restart => self.restart_delay,
            RetryKind::Reconnect => self.reconnect_delay,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// A pending retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTicket {
    pub id: u64,
    pub apn_type: ApnType,
    pub kind: RetryKind,
    pub reason: Reason,
    pub delay: Duration,
    pub fire_at: Instant,
}

pub struct RetryScheduler {
    clock: Clock,
    policy: RetryPolicy,
    tickets: HashMap<ApnType, RetryTicket>,
    next_id: u64,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, clock: Clock) -> Self {
        Self {
            clock,
            policy,
            tickets: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Schedule a ticket using the policy's delay for `kind`.
    pub fn schedule(&mut self, apn_type: ApnType, kind: RetryKind, reason: Reason) -> RetryTicket {
        let delay = self.policy.delay_for(kind);
        self.schedule_retry(apn_type, delay, kind, reason)
    }

    /// Schedule a ticket firing after `delay`, replacing any pending one.
    pub fn schedule_retry(
        &mut self,
        apn_type: ApnType,
        delay: Duration,
        kind: RetryKind,
        reason: Reason,
    ) -> RetryTicket {
        let ticket = RetryTicket {
            id: self.next_id,
            apn_type,
            kind,
            reason,
            delay,
            fire_at: self.clock.now() + delay,
        };
        self.next_id += 1;
        if let Some(old) = self.tickets.insert(apn_type, ticket) {
            debug!(apn_type = %apn_type, old = old.id, new = ticket.id, "retry ticket replaced");
        }
        ticket
    }

    pub fn cancel_retry(&mut self, apn_type: ApnType) -> Option<RetryTicket> {
        self.tickets.remove(&apn_type)
    }

    pub fn pending(&self, apn_type: ApnType) -> Option<&RetryTicket> {
        self.tickets.get(&apn_type)
    }

    pub fn pending_count(&self) -> usize {
        self.tickets.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tickets.values().map(|t| t.fire_at).min()
    }

    /// Time until the earliest ticket fires; zero if one is already due.
    pub fn time_until_next(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.next_deadline()
            .map(|at| at.saturating_duration_since(now))
    }

    /// Remove and return every ticket that is due, earliest first.
    pub fn take_due(&mut self) -> Vec<RetryTicket> {
        let now = self.clock.now();
        let mut due: Vec<RetryTicket> = self
            .tickets
            .values()
            .filter(|t| t.fire_at <= now)
            .copied()
            .collect();
        due.sort_by_key(|t| (t.fire_at, t.id));
        for t in &due {
            self.tickets.remove(&t.apn_type);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (RetryScheduler, std::sync::Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        (RetryScheduler::new(RetryPolicy::default(), clock), mock)
    }

    #[test]
    fn ticket_fires_after_delay() {
        let (mut s, mock) = scheduler();
        s.schedule(ApnType::Default, RetryKind::Reconnect, Reason::LostConnection);
        assert!(s.take_due().is_empty());
        mock.increment(Duration::from_millis(4_999));
        assert!(s.take_due().is_empty());
        mock.increment(Duration::from_millis(1));
        let due = s.take_due();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, RetryKind::Reconnect);
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn last_writer_wins() {
        let (mut s, mock) = scheduler();
        s.schedule(ApnType::Mms, RetryKind::Restart, Reason::ApnFailed);
        s.schedule(ApnType::Mms, RetryKind::NextCandidate, Reason::Retry);
        assert_eq!(s.pending_count(), 1);
        mock.increment(Duration::from_millis(50));
        let due = s.take_due();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, RetryKind::NextCandidate);
    }

    #[test]
    fn cancel_is_idempotent() {
        let (mut s, _mock) = scheduler();
        s.schedule(ApnType::Supl, RetryKind::Restart, Reason::ApnFailed);
        assert!(s.cancel_retry(ApnType::Supl).is_some());
        assert!(s.cancel_retry(ApnType::Supl).is_none());
        assert!(s.next_deadline().is_none());
    }

    #[test]
    fn fail_fast_shortens_restart() {
        let policy = RetryPolicy {
            fail_fast: true,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(RetryKind::Restart), Duration::from_millis(3_000));
        assert_eq!(
            RetryPolicy::default().delay_for(RetryKind::Restart),
            Duration::from_millis(20_000)
        );
    }

    #[test]
    fn due_tickets_come_out_in_deadline_order() {
        let (mut s, mock) = scheduler();
        s.schedule_retry(ApnType::Default, Duration::from_millis(30), RetryKind::Reconnect, Reason::Retry);
        s.schedule_retry(ApnType::Mms, Duration::from_millis(10), RetryKind::Reconnect, Reason::Retry);
        assert_eq!(s.time_until_next(), Some(Duration::from_millis(10)));
        mock.increment(Duration::from_millis(40));
        let order: Vec<ApnType> = s.take_due().iter().map(|t| t.apn_type).collect();
        assert_eq!(order, vec![ApnType::Mms, ApnType::Default]);
    }
}
