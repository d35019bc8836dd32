//! Integration tests for `TrackerRuntime`.
//!
//! The modem here answers from inside the worker: every request posts its
//! completion straight back through the runtime's `EventSender`, so the
//! worker sees it on its next loop iteration.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;

use strata_dct::bearer::LinkProperties;
use strata_dct::config::TrackerConfig;
use strata_dct::observer::ContextNotification;
use strata_dct::radio::{BringUpRequest, BringUpResult, RadioCommands, TearDownRequest};
use strata_dct::runtime::{EventSender, TrackerRuntime};
use strata_dct::tracker::TrackerSnapshot;
use strata_dct::{
    ApnSetting, ApnType, ContextState, DataConnectionTracker, DisableOutcome, EnableOutcome,
    FailCause, TrackerError, TrackerEvent,
};

/// Completes every request immediately. APNs in `flaky` fail once.
struct LoopbackRadio {
    events: EventSender,
    flaky: HashSet<String>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl RadioCommands for LoopbackRadio {
    fn bring_up(&mut self, req: BringUpRequest) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(req.apn.apn.clone());
        let result = if self.flaky.remove(&req.apn.apn) {
            BringUpResult::Failure(FailCause::InsufficientResources)
        } else {
            BringUpResult::Success(LinkProperties {
                interface: Some(format!("rmnet{}", req.tag.bearer.0)),
                ..Default::default()
            })
        };
        self.events
            .post(TrackerEvent::BringUpComplete { tag: req.tag, result })?;
        Ok(())
    }

    fn tear_down(&mut self, req: TearDownRequest) -> anyhow::Result<()> {
        self.events.post(TrackerEvent::TearDownComplete { tag: req.tag })?;
        Ok(())
    }
}

fn test_config() -> TrackerConfig {
    let mut cfg = TrackerConfig {
        apns: vec![
            ApnSetting::new(1, "internet", &[ApnType::Default, ApnType::Supl]),
            ApnSetting::new(2, "internet.backup", &[ApnType::Default]),
            ApnSetting::new(3, "mms", &[ApnType::Mms]),
        ],
        ..Default::default()
    };
    cfg.retry.candidate_delay = Duration::from_millis(10);
    cfg
}

fn start(
    cfg: &TrackerConfig,
    flaky: &[&str],
) -> (
    TrackerRuntime,
    Arc<Mutex<Vec<String>>>,
    crossbeam_channel::Receiver<ContextNotification>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let (tx, rx) = unbounded();
    let flaky: HashSet<String> = flaky.iter().map(|s| s.to_string()).collect();
    let rt = TrackerRuntime::start(|events| {
        let radio = LoopbackRadio {
            events,
            flaky,
            seen: seen_clone,
        };
        let mut dct = DataConnectionTracker::new(cfg, Box::new(radio), Box::new(cfg.apn_store()));
        dct.add_observer(Box::new(tx));
        dct
    })
    .expect("runtime should start");
    (rt, seen, rx)
}

fn wait_for(rt: &TrackerRuntime, what: &str, pred: impl Fn(&TrackerSnapshot) -> bool) -> TrackerSnapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snap = rt.snapshot();
        if pred(&snap) {
            return snap;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}: {snap:?}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn state_is(t: ApnType, s: ContextState) -> impl Fn(&TrackerSnapshot) -> bool {
    move |snap| snap.context(t).is_some_and(|c| c.state == s)
}

#[test]
fn attach_brings_default_up() {
    let cfg = test_config();
    let (rt, seen, notes) = start(&cfg, &[]);
    assert_eq!(rt.snapshot().overall_state, ContextState::Idle);

    rt.post(TrackerEvent::Attached).unwrap();
    let snap = wait_for(&rt, "default connected", state_is(ApnType::Default, ContextState::Connected));
    assert_eq!(snap.overall_state, ContextState::Connected);
    assert_eq!(snap.bearers.len(), 1);
    assert!(rt.is_type_active(ApnType::Default));
    assert_eq!(*seen.lock().unwrap(), vec!["internet".to_string()]);

    let connected = notes
        .try_iter()
        .find(|n| n.apn_type == ApnType::Default && n.state == ContextState::Connected)
        .expect("connected notification");
    assert_eq!(
        connected.properties.unwrap().interface.as_deref(),
        Some("rmnet0")
    );
}

#[test]
fn enable_and_disable_round_trip_through_worker() {
    let cfg = test_config();
    let (rt, _seen, _notes) = start(&cfg, &[]);
    rt.post(TrackerEvent::Attached).unwrap();
    wait_for(&rt, "default connected", state_is(ApnType::Default, ContextState::Connected));

    // Supl shares the default bearer and connects without a radio request.
    assert_eq!(rt.enable(ApnType::Supl), Ok(EnableOutcome::RequestStarted));
    let snap = rt.snapshot();
    assert_eq!(snap.context(ApnType::Supl).unwrap().state, ContextState::Connected);
    assert_eq!(rt.enable(ApnType::Supl), Ok(EnableOutcome::AlreadyActive));

    assert_eq!(rt.enable(ApnType::Mms), Ok(EnableOutcome::RequestStarted));
    wait_for(&rt, "mms connected", state_is(ApnType::Mms, ContextState::Connected));

    assert_eq!(rt.disable(ApnType::Mms), Ok(DisableOutcome::RequestStarted));
    let snap = wait_for(&rt, "mms idle", state_is(ApnType::Mms, ContextState::Idle));
    assert!(!rt.is_type_active(ApnType::Mms));
    assert_eq!(snap.bearers.len(), 1);

    assert_eq!(
        rt.enable(ApnType::Ims),
        Err(TrackerError::TypeUnavailable(ApnType::Ims))
    );
}

#[test]
fn worker_fires_retry_tickets() {
    let cfg = test_config();
    let (rt, seen, _notes) = start(&cfg, &["internet"]);
    rt.post(TrackerEvent::Attached).unwrap();

    let snap = wait_for(&rt, "default connected", state_is(ApnType::Default, ContextState::Connected));
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["internet".to_string(), "internet.backup".to_string()]
    );
    assert_eq!(snap.stats.retries_fired, 1);
    assert_eq!(snap.stats.transient_failures, 1);
    assert_eq!(snap.pending_retries, 0);
}

#[test]
fn requests_after_shutdown_fail() {
    let cfg = test_config();
    let (mut rt, _seen, _notes) = start(&cfg, &[]);
    rt.shutdown();
    rt.shutdown();
    assert_eq!(rt.post(TrackerEvent::Attached), Err(TrackerError::Disconnected));
    assert_eq!(rt.enable(ApnType::Default), Err(TrackerError::Disconnected));
    assert_eq!(rt.disable(ApnType::Default), Err(TrackerError::Disconnected));
}

#[test]
fn last_event_before_shutdown_is_published() {
    let cfg = test_config();
    let (mut rt, _seen, _notes) = start(&cfg, &[]);
    rt.post(TrackerEvent::Attached).unwrap();
    wait_for(&rt, "default connected", state_is(ApnType::Default, ContextState::Connected));

    rt.post(TrackerEvent::CleanUpAll {
        tear_down: false,
        reason: strata_dct::Reason::RadioTurnedOff,
    })
    .unwrap();
    rt.shutdown();

    let snap = rt.snapshot();
    assert_eq!(snap.context(ApnType::Default).unwrap().state, ContextState::Idle);
    assert!(snap.bearers.is_empty());
    assert!(!rt.is_type_active(ApnType::Default));
}
