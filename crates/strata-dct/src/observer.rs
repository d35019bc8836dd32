//! Connectivity notifications.

use crossbeam_channel::{Sender, TrySendError};
use serde::Serialize;
use tracing::warn;

use crate::apn::ApnType;
use crate::bearer::LinkProperties;
use crate::cause::FailCause;
use crate::context::{ContextState, Reason};

/// Published on every context state change and on availability broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextNotification {
    pub apn_type: ApnType,
    pub state: ContextState,
    pub reason: Reason,
    /// Present while the context is bound to an active bearer.
    pub properties: Option<LinkProperties>,
    /// Set when the context just gave up on every candidate.
    pub failure: Option<FailCause>,
}

pub trait ConnectivityObserver: Send {
    fn notify(&self, n: &ContextNotification);
}

impl ConnectivityObserver for Sender<ContextNotification> {
    fn notify(&self, n: &ContextNotification) {
        match self.try_send(n.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!(apn_type = %n.apn_type, state = n.state.as_str(), "observer queue full, dropping notification")
            }
        }
    }
}
