use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use crate::apn::ApnType;
use crate::error::TrackerError;
use crate::tracker::{DataConnectionTracker, DisableOutcome, EnableOutcome, TrackerEvent, TrackerSnapshot};

/// Longest the worker sleeps between retry-deadline checks.
const IDLE_POLL: Duration = Duration::from_millis(100);

enum Command {
    Enable(ApnType, Sender<Result<EnableOutcome, TrackerError>>),
    Disable(ApnType, Sender<Result<DisableOutcome, TrackerError>>),
    Event(Box<TrackerEvent>),
    Shutdown,
}

/// Cloneable handle for posting events (radio completions, radio and
/// subscription state) to the tracker worker.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Command>,
}

impl EventSender {
    pub fn post(&self, event: TrackerEvent) -> Result<(), TrackerError> {
        self.tx
            .send(Command::Event(Box::new(event)))
            .map_err(|_| TrackerError::Disconnected)
    }
}

/// Thread-safe handle to the tracker worker.
///
/// Owns a background thread that runs the [`DataConnectionTracker`]: it
/// applies requests and events in arrival order, fires retry tickets when
/// they come due, and publishes a snapshot after every step.
///
/// Dropping the runtime triggers a graceful shutdown of the worker thread.
pub struct TrackerRuntime {
    tx: Sender<Command>,
    snapshot: Arc<Mutex<TrackerSnapshot>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TrackerRuntime {
    /// Build the tracker with `build` and start the worker.
    ///
    /// `build` receives the [`EventSender`] that radio and observer
    /// implementations use to post completions back.
    pub fn start<F>(build: F) -> anyhow::Result<Self>
    where
        F: FnOnce(EventSender) -> DataConnectionTracker,
    {
        let (tx, rx) = unbounded();
        let tracker = build(EventSender { tx: tx.clone() });
        let snapshot = Arc::new(Mutex::new(tracker.snapshot()));
        let snapshot_clone = snapshot.clone();

        let handle = thread::Builder::new()
            .name("strata-dct".into())
            .spawn(move || runtime_worker(tracker, rx, snapshot_clone))?;

        Ok(Self {
            tx,
            snapshot,
            handle: Some(handle),
        })
    }

    pub fn enable(&self, t: ApnType) -> Result<EnableOutcome, TrackerError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(Command::Enable(t, reply_tx))
            .map_err(|_| TrackerError::Disconnected)?;
        reply_rx.recv().map_err(|_| TrackerError::Disconnected)?
    }

    pub fn disable(&self, t: ApnType) -> Result<DisableOutcome, TrackerError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(Command::Disable(t, reply_tx))
            .map_err(|_| TrackerError::Disconnected)?;
        reply_rx.recv().map_err(|_| TrackerError::Disconnected)?
    }

    pub fn post(&self, event: TrackerEvent) -> Result<(), TrackerError> {
        self.event_sender().post(event)
    }

    pub fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Latest published snapshot (thread-safe clone).
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_type_active(&self, t: ApnType) -> bool {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .context(t)
            .is_some_and(|c| c.bearer.is_some())
    }

    /// Gracefully shuts down the worker thread. Idempotent.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TrackerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn runtime_worker(
    mut tracker: DataConnectionTracker,
    rx: Receiver<Command>,
    snapshot: Arc<Mutex<TrackerSnapshot>>,
) {
    info!("tracker worker started");
    loop {
        let wait = tracker
            .next_retry_in()
            .map_or(IDLE_POLL, |d| d.min(IDLE_POLL));
        // Requests publish before replying so the caller sees its own change.
        let mut changed = match rx.recv_timeout(wait) {
            Ok(Command::Enable(t, reply)) => {
                let result = tracker.enable(t);
                publish(&tracker, &snapshot);
                let _ = reply.send(result);
                false
            }
            Ok(Command::Disable(t, reply)) => {
                let result = tracker.disable(t);
                publish(&tracker, &snapshot);
                let _ = reply.send(result);
                false
            }
            Ok(Command::Event(event)) => {
                tracker.handle_event(*event);
                true
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => false,
        };
        let fired = tracker.fire_due_retries();
        if fired > 0 {
            debug!(fired, "retry tickets fired");
            changed = true;
        }
        if changed {
            publish(&tracker, &snapshot);
        }
    }
    info!("tracker worker stopped");
}

fn publish(tracker: &DataConnectionTracker, snapshot: &Mutex<TrackerSnapshot>) {
    *snapshot.lock().unwrap_or_else(|e| e.into_inner()) = tracker.snapshot();
}
