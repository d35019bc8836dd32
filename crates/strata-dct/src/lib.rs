//! # strata-dct
//!
//! Data-connection tracker for cellular modems.
//!
//! Multiplexes logical APN contexts (default, MMS, SUPL, DUN, IMS, ...) over
//! a small pool of physical radio bearers. Each context runs its own state
//! machine; bring-up and teardown are fire-and-forget requests to the modem
//! whose completions come back as events on a single consumer queue.
//!
//! ## Crate structure
//!
//! - [`apn`] — APN types, candidate configurations, radio technologies
//! - [`cause`] — Bring-up failure causes and their permanent/transient class
//! - [`context`] — Logical contexts and the priority-ordered registry
//! - [`bearer`] — Physical bearers and the shared bearer pool
//! - [`retry`] — Fixed-delay retry tickets driven by a `quanta` clock
//! - [`radio`] — Modem command seam and bearer capability descriptor
//! - [`store`] — APN configuration store with carrier/MVNO filtering
//! - [`gate`] — Global data-allowed gate
//! - [`observer`] — Connectivity notifications
//! - [`tracker`] — The orchestrator and its event enum
//! - [`runtime`] — Worker thread owning the tracker
//! - [`config`] — TOML configuration
//! - [`metrics`] — Counters and Prometheus rendering

pub mod apn;
pub mod bearer;
pub mod cause;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod observer;
pub mod radio;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod tracker;

pub use apn::{ApnSetting, ApnType, RadioTech};
pub use cause::FailCause;
pub use context::{ContextState, Reason};
pub use error::{SetupError, TrackerError};
pub use tracker::{BringUpOutcome, DataConnectionTracker, DisableOutcome, EnableOutcome, TrackerEvent};
