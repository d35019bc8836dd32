//! # Strata DCT Simulator
//!
//! Runs the data-connection tracker against a simulated modem. Bring-up and
//! teardown requests complete after a fixed latency; selected APNs can be
//! made to reject permanently or fail once before succeeding.
//!
//! ## Usage
//!
//! ```bash
//! # Default context on the built-in APN list
//! strata-dct-sim
//!
//! # Carrier config, MMS and SUPL requested, first APN rejected
//! strata-dct-sim --config carrier.toml --enable mms --enable supl --reject-apn internet
//!
//! # Single-bearer technology (1xRTT) with Prometheus text on stdout
//! strata-dct-sim --rat 6 --enable mms --metrics
//! ```

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use strata_dct::bearer::LinkProperties;
use strata_dct::config::TrackerConfig;
use strata_dct::metrics::render_prometheus;
use strata_dct::observer::ContextNotification;
use strata_dct::radio::{BringUpRequest, BringUpResult, RadioCommands, TearDownRequest};
use strata_dct::runtime::{EventSender, TrackerRuntime};
use strata_dct::{ApnSetting, ApnType, DataConnectionTracker, FailCause, RadioTech, TrackerEvent};

#[derive(Parser, Debug)]
#[command(name = "strata-dct-sim", about = "Strata data-connection tracker simulator")]
struct Cli {
    /// TOML tracker configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// APN type to request after attach (repeatable).
    #[arg(long = "enable", value_name = "TYPE")]
    enable: Vec<String>,

    /// APN selector the simulated network rejects permanently (repeatable).
    #[arg(long = "reject-apn", value_name = "APN")]
    reject_apn: Vec<String>,

    /// APN selector that fails once with a transient cause (repeatable).
    #[arg(long = "flaky-apn", value_name = "APN")]
    flaky_apn: Vec<String>,

    /// Radio technology code, overriding the configured one.
    #[arg(long)]
    rat: Option<u8>,

    /// Modem response latency.
    #[arg(long, default_value_t = 200)]
    latency_ms: u64,

    /// Seconds between status reports.
    #[arg(long, default_value_t = 5)]
    stats_interval_secs: u64,

    /// Print Prometheus text with every status report.
    #[arg(long, default_value_t = false)]
    metrics: bool,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();

    // ── Configuration ───────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => TrackerConfig::from_file(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(rat) = cli.rat {
        config.radio.tech = RadioTech(rat);
    }
    if config.apns.is_empty() {
        tracing::info!("no APNs configured, using the built-in demo list");
        config.apns = demo_apns();
    }
    let requested = cli
        .enable
        .iter()
        .map(|s| s.parse::<ApnType>())
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        config = ?cli.config,
        rat = %config.radio.tech,
        apns = config.apns.len(),
        requested = ?requested,
        latency_ms = cli.latency_ms,
        "strata-dct-sim starting"
    );

    // ── Tracker ─────────────────────────────────────────────────
    let (job_tx, job_rx) = unbounded();
    let (note_tx, note_rx) = crossbeam_channel::bounded::<ContextNotification>(256);
    let store = config.apn_store();
    let mut runtime = TrackerRuntime::start(|_| {
        let mut tracker =
            DataConnectionTracker::new(&config, Box::new(SimRadio { jobs: job_tx }), Box::new(store));
        tracker.add_observer(Box::new(note_tx));
        tracker
    })?;

    let network = SimNetwork {
        latency: Duration::from_millis(cli.latency_ms),
        reject: cli.reject_apn.iter().cloned().collect(),
        flaky: cli.flaky_apn.iter().cloned().collect(),
        failed_once: HashSet::new(),
    };
    let events = runtime.event_sender();
    std::thread::Builder::new()
        .name("sim-modem".into())
        .spawn(move || network.run(job_rx, events))?;

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })?;
    }

    // ── Attach and request ──────────────────────────────────────
    runtime.post(TrackerEvent::Attached)?;
    for t in &requested {
        match runtime.enable(*t) {
            Ok(outcome) => tracing::info!(apn_type = %t, ?outcome, "enable requested"),
            Err(e) => tracing::warn!(apn_type = %t, error = %e, "enable refused"),
        }
    }

    // ── Main loop ───────────────────────────────────────────────
    let stats_interval = Duration::from_secs(cli.stats_interval_secs.max(1));
    let mut last_report = Instant::now();
    while running.load(Ordering::Relaxed) {
        match note_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(n) => log_notification(&n),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_report.elapsed() >= stats_interval {
            let snap = runtime.snapshot();
            tracing::info!(
                overall = snap.overall_state.as_str(),
                bearers = snap.bearers.len(),
                pending_retries = snap.pending_retries,
                status = %serde_json::to_string(&snap)?,
                "tracker status"
            );
            if cli.metrics {
                print!("{}", render_prometheus(&snap));
            }
            last_report = Instant::now();
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────
    let _ = runtime.post(TrackerEvent::CleanUpAll {
        tear_down: false,
        reason: strata_dct::Reason::RadioTurnedOff,
    });
    runtime.shutdown();
    let stats = runtime.snapshot().stats;
    tracing::info!(
        bring_ups = stats.bring_up_requests,
        successes = stats.bring_up_successes,
        retries = stats.retries_fired,
        "strata-dct-sim stopped"
    );
    Ok(())
}

fn log_notification(n: &ContextNotification) {
    let interface = n
        .properties
        .as_ref()
        .and_then(|p| p.interface.as_deref())
        .unwrap_or("");
    match n.failure {
        Some(cause) => tracing::warn!(
            apn_type = %n.apn_type,
            state = n.state.as_str(),
            reason = %n.reason,
            %cause,
            "context failed"
        ),
        None => tracing::info!(
            apn_type = %n.apn_type,
            state = n.state.as_str(),
            reason = %n.reason,
            interface,
            "context"
        ),
    }
}

fn demo_apns() -> Vec<ApnSetting> {
    vec![
        ApnSetting::new(1, "internet", &[ApnType::Default, ApnType::Supl]),
        ApnSetting::new(2, "internet.alt", &[ApnType::Default, ApnType::Supl]),
        ApnSetting {
            proxy: Some("10.10.0.1".into()),
            ..ApnSetting::new(3, "mms", &[ApnType::Mms])
        },
        ApnSetting::new(4, "ims", &[ApnType::Ims]),
    ]
}

// ─── Simulated Modem ────────────────────────────────────────────────────────

enum RadioJob {
    BringUp(BringUpRequest),
    TearDown(TearDownRequest),
}

/// Hands requests to the modem thread.
struct SimRadio {
    jobs: Sender<RadioJob>,
}

impl RadioCommands for SimRadio {
    fn bring_up(&mut self, req: BringUpRequest) -> anyhow::Result<()> {
        self.jobs
            .send(RadioJob::BringUp(req))
            .map_err(|_| anyhow::anyhow!("modem thread gone"))
    }

    fn tear_down(&mut self, req: TearDownRequest) -> anyhow::Result<()> {
        self.jobs
            .send(RadioJob::TearDown(req))
            .map_err(|_| anyhow::anyhow!("modem thread gone"))
    }
}

struct SimNetwork {
    latency: Duration,
    reject: HashSet<String>,
    flaky: HashSet<String>,
    failed_once: HashSet<String>,
}

impl SimNetwork {
    fn run(mut self, jobs: Receiver<RadioJob>, events: EventSender) {
        while let Ok(job) = jobs.recv() {
            std::thread::sleep(self.latency);
            let event = match job {
                RadioJob::BringUp(req) => TrackerEvent::BringUpComplete {
                    tag: req.tag,
                    result: self.answer(&req),
                },
                RadioJob::TearDown(req) => TrackerEvent::TearDownComplete { tag: req.tag },
            };
            if events.post(event).is_err() {
                break;
            }
        }
        tracing::debug!("simulated modem stopped");
    }

    fn answer(&mut self, req: &BringUpRequest) -> BringUpResult {
        let apn = req.apn.apn.as_str();
        if self.reject.contains(apn) {
            return BringUpResult::Failure(FailCause::MissingUnknownApn);
        }
        if self.flaky.contains(apn) && self.failed_once.insert(apn.to_string()) {
            return BringUpResult::Failure(FailCause::InsufficientResources);
        }
        let n = req.tag.bearer.0 as u8;
        BringUpResult::Success(LinkProperties {
            interface: Some(format!("rmnet{n}")),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(10, 64, n, 2))],
            gateways: vec![IpAddr::V4(Ipv4Addr::new(10, 64, n, 1))],
            dns: vec![IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))],
            mtu: Some(1500),
            proxy: None,
        })
    }
}
