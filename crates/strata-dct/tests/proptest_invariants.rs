//! Property-based tests for tracker bookkeeping.
//!
//! Random interleavings of requests, radio completions (in any order, stale
//! ones included), gate events and clock advances must never break the
//! context ↔ bearer reference structure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use quanta::Clock;

use strata_dct::bearer::{BearerState, LinkProperties, RequestTag};
use strata_dct::config::{RadioConfig, TrackerConfig};
use strata_dct::radio::{BringUpRequest, BringUpResult, RadioCommands, TearDownRequest};
use strata_dct::{
    ApnSetting, ApnType, ContextState, DataConnectionTracker, FailCause, RadioTech, Reason,
    TrackerEvent,
};

// ─── Model ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    BringUp(RequestTag),
    TearDown(RequestTag),
}

#[derive(Clone, Default)]
struct QueueRadio {
    queue: Arc<Mutex<Vec<Pending>>>,
}

impl RadioCommands for QueueRadio {
    fn bring_up(&mut self, req: BringUpRequest) -> anyhow::Result<()> {
        self.queue.lock().unwrap().push(Pending::BringUp(req.tag));
        Ok(())
    }

    fn tear_down(&mut self, req: TearDownRequest) -> anyhow::Result<()> {
        self.queue.lock().unwrap().push(Pending::TearDown(req.tag));
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Op {
    Enable(ApnType),
    Disable(ApnType),
    Complete { pick: usize, outcome: Option<FailCause> },
    Drop { pick: usize },
    Event(TrackerEvent),
    Advance(u64),
}

const TYPES: [ApnType; 4] = [ApnType::Default, ApnType::Mms, ApnType::Supl, ApnType::Hipri];

fn apn_type() -> impl Strategy<Value = ApnType> {
    prop::sample::select(TYPES.to_vec())
}

fn outcome() -> impl Strategy<Value = Option<FailCause>> {
    prop_oneof![
        3 => Just(None),
        1 => Just(Some(FailCause::InsufficientResources)),
        1 => Just(Some(FailCause::MissingUnknownApn)),
        1 => Just(Some(FailCause::SignalLost)),
    ]
}

fn event() -> impl Strategy<Value = TrackerEvent> {
    prop_oneof![
        Just(TrackerEvent::Attached),
        Just(TrackerEvent::Detached),
        Just(TrackerEvent::RoamingOn),
        Just(TrackerEvent::RoamingOff),
        Just(TrackerEvent::RadioOffOrNotAvailable),
        Just(TrackerEvent::RadioAvailable),
        Just(TrackerEvent::VoiceCallStarted),
        Just(TrackerEvent::VoiceCallEnded),
        Just(TrackerEvent::ApnChanged),
        Just(TrackerEvent::RadioTechChanged(RadioTech::LTE)),
        Just(TrackerEvent::RadioTechChanged(RadioTech::ONE_X_RTT)),
        any::<bool>().prop_map(TrackerEvent::SetUserDataEnabled),
        any::<bool>().prop_map(TrackerEvent::SetDataRoamingEnabled),
        (apn_type(), any::<bool>())
            .prop_map(|(apn_type, met)| TrackerEvent::SetDependencyMet { apn_type, met }),
        any::<bool>().prop_map(|tear_down| TrackerEvent::CleanUpAll {
            tear_down,
            reason: Reason::DataDisabled,
        }),
        (apn_type(), any::<bool>()).prop_map(|(apn_type, tear_down)| {
            TrackerEvent::CleanUpConnection {
                apn_type,
                tear_down,
                reason: Reason::ApnChanged,
            }
        }),
        Just(TrackerEvent::TrySetupData(Reason::DataEnabled)),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => apn_type().prop_map(Op::Enable),
        2 => apn_type().prop_map(Op::Disable),
        6 => (any::<usize>(), outcome()).prop_map(|(pick, outcome)| Op::Complete { pick, outcome }),
        1 => any::<usize>().prop_map(|pick| Op::Drop { pick }),
        3 => event().prop_map(Op::Event),
        2 => prop_oneof![Just(50u64), Just(5_000), Just(20_000)].prop_map(Op::Advance),
    ]
}

struct World {
    dct: DataConnectionTracker,
    radio: QueueRadio,
    clock: Arc<quanta::Mock>,
    /// Requests issued but not yet answered.
    pending: Vec<Pending>,
    /// Every bring-up tag ever issued, for drop events.
    issued: Vec<RequestTag>,
}

impl World {
    fn new() -> Self {
        let (clock, mock) = Clock::mock();
        let cfg = TrackerConfig {
            radio: RadioConfig {
                tech: RadioTech::LTE,
                ..Default::default()
            },
            apns: vec![
                ApnSetting::new(1, "internet", &[ApnType::Default, ApnType::Supl]),
                ApnSetting::new(2, "internet.backup", &[ApnType::Default]),
                ApnSetting::new(3, "mms", &[ApnType::Mms]),
                ApnSetting::new(4, "mms.backup", &[ApnType::Mms]),
            ],
            ..Default::default()
        };
        let radio = QueueRadio::default();
        let dct = DataConnectionTracker::with_clock(
            &cfg,
            Box::new(radio.clone()),
            Box::new(cfg.apn_store()),
            clock,
        );
        World {
            dct,
            radio,
            clock: mock,
            pending: Vec::new(),
            issued: Vec::new(),
        }
    }

    fn collect(&mut self) {
        for p in self.radio.queue.lock().unwrap().drain(..) {
            if let Pending::BringUp(tag) = p {
                self.issued.push(tag);
            }
            self.pending.push(p);
        }
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::Enable(t) => {
                let _ = self.dct.enable(t);
            }
            Op::Disable(t) => {
                let _ = self.dct.disable(t);
            }
            Op::Complete { pick, outcome } => {
                if self.pending.is_empty() {
                    return;
                }
                let p = self.pending.remove(pick % self.pending.len());
                let event = match p {
                    Pending::BringUp(tag) => TrackerEvent::BringUpComplete {
                        tag,
                        result: match outcome {
                            None => BringUpResult::Success(LinkProperties::default()),
                            Some(cause) => BringUpResult::Failure(cause),
                        },
                    },
                    Pending::TearDown(tag) => TrackerEvent::TearDownComplete { tag },
                };
                self.dct.handle_event(event);
            }
            Op::Drop { pick } => {
                if self.issued.is_empty() {
                    return;
                }
                let tag = self.issued[pick % self.issued.len()];
                self.dct.handle_event(TrackerEvent::BearerDropped {
                    tag,
                    cause: FailCause::SignalLost,
                });
            }
            Op::Event(e) => self.dct.handle_event(e),
            Op::Advance(ms) => {
                self.clock.increment(Duration::from_millis(ms));
                self.dct.fire_due_retries();
            }
        }
        self.collect();
    }

    fn check(&self) -> Result<(), TestCaseError> {
        let snap = self.dct.snapshot();

        for c in &snap.contexts {
            let bearer = c.bearer.and_then(|id| self.dct.bearer(id));
            match c.state {
                ContextState::Connected => {
                    prop_assert!(c.enabled, "{:?} connected while disabled", c.apn_type);
                    prop_assert_eq!(bearer.map(|b| b.state), Some(BearerState::Active));
                }
                ContextState::Connecting => {
                    prop_assert_eq!(bearer.map(|b| b.state), Some(BearerState::Activating));
                }
                ContextState::Disconnecting => {
                    prop_assert_eq!(bearer.map(|b| b.state), Some(BearerState::Disconnecting));
                }
                ContextState::Idle
                | ContextState::Scanning
                | ContextState::Failed
                | ContextState::Retrying => {
                    prop_assert!(c.bearer.is_none(), "{:?} {:?} holds a bearer", c.apn_type, c.state);
                }
            }
            if let Some(b) = bearer {
                prop_assert!(b.refs.contains(&c.apn_type), "bearer {:?} lost ref {:?}", b.id, c.apn_type);
            }
        }

        for b in &snap.bearers {
            for r in &b.refs {
                prop_assert_eq!(snap.context(*r).and_then(|c| c.bearer), Some(b.id));
            }
            if b.state == BearerState::Active {
                prop_assert!(!b.refs.is_empty(), "active bearer {:?} has no refs", b.id);
            }
            let current: Vec<&Pending> = self
                .pending
                .iter()
                .filter(|p| {
                    let (Pending::BringUp(tag) | Pending::TearDown(tag)) = p;
                    tag.bearer == b.id && tag.generation == b.generation
                })
                .collect();
            match b.state {
                BearerState::Activating | BearerState::Disconnecting => {
                    prop_assert_eq!(current.len(), 1, "bearer {:?} outstanding {:?}", b.id, current)
                }
                _ => prop_assert!(current.is_empty(), "bearer {:?} idle with {:?}", b.id, current),
            }
        }

        let mut holders: HashMap<ApnType, usize> = HashMap::new();
        for b in &snap.bearers {
            for r in &b.refs {
                *holders.entry(*r).or_default() += 1;
            }
        }
        prop_assert!(holders.values().all(|n| *n == 1), "context bound twice: {:?}", holders);
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn bearer_references_stay_consistent(ops in prop::collection::vec(op(), 1..80)) {
        let mut world = World::new();
        world.check()?;
        for op in ops {
            world.apply(op);
            world.check()?;
        }
    }

    #[test]
    fn draining_every_request_settles_the_tracker(ops in prop::collection::vec(op(), 1..60)) {
        let mut world = World::new();
        for op in ops {
            world.apply(op);
        }
        // Answer everything successfully until nothing is outstanding.
        for _ in 0..64 {
            if world.pending.is_empty() {
                break;
            }
            world.apply(Op::Complete { pick: 0, outcome: None });
        }
        prop_assert!(world.pending.is_empty());
        let snap = world.dct.snapshot();
        for c in &snap.contexts {
            prop_assert!(
                !matches!(c.state, ContextState::Connecting | ContextState::Disconnecting),
                "{:?} stuck in {:?}", c.apn_type, c.state
            );
        }
        world.check()?;
    }
}
