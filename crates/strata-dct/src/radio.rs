//! Modem command seam.
//!
//! The tracker never blocks on the modem. [`RadioCommands`] implementations
//! accept a request and return immediately; the outcome is posted back later
//! as [`TrackerEvent::BringUpComplete`](crate::tracker::TrackerEvent) or
//! `TearDownComplete` carrying the request's [`RequestTag`].

use serde::{Deserialize, Serialize};

use crate::apn::{ApnSetting, ApnType, RadioTech};
use crate::bearer::{LinkProperties, RequestTag};
use crate::cause::FailCause;
use crate::context::Reason;

/// Modem data profile selected by the requesting APN type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataProfile {
    Default = 0,
    Tethered = 1,
    Ims = 2,
    Fota = 3,
    Cbs = 4,
}

impl DataProfile {
    pub fn for_apn_type(t: ApnType) -> Self {
        match t {
            ApnType::Ims => DataProfile::Ims,
            ApnType::Fota => DataProfile::Fota,
            ApnType::Cbs => DataProfile::Cbs,
            ApnType::Dun => DataProfile::Tethered,
            _ => DataProfile::Default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BringUpRequest {
    pub tag: RequestTag,
    pub apn: ApnSetting,
    /// Context that initiated the request.
    pub apn_type: ApnType,
    pub profile: DataProfile,
    pub radio_tech: RadioTech,
}

#[derive(Debug, Clone, Copy)]
pub struct TearDownRequest {
    pub tag: RequestTag,
    pub reason: Reason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BringUpResult {
    Success(LinkProperties),
    Failure(FailCause),
}

/// Commands issued to the modem.
///
/// An `Err` means the request could not be submitted at all; the tracker
/// treats it as an immediate transient failure.
pub trait RadioCommands: Send {
    fn bring_up(&mut self, req: BringUpRequest) -> anyhow::Result<()>;
    fn tear_down(&mut self, req: TearDownRequest) -> anyhow::Result<()>;
}

/// How many bearers the modem can hold per radio technology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BearerPolicy {
    /// Technologies that only support one bearer at a time.
    pub single_bearer_techs: Vec<RadioTech>,
    /// Concurrency limit on every other technology.
    pub max_bearers: usize,
}

impl Default for BearerPolicy {
    fn default() -> Self {
        Self {
            single_bearer_techs: vec![
                RadioTech::IS95A,
                RadioTech::IS95B,
                RadioTech::ONE_X_RTT,
                RadioTech::EVDO_0,
                RadioTech::EVDO_A,
                RadioTech::EVDO_B,
            ],
            max_bearers: 4,
        }
    }
}

impl BearerPolicy {
    pub fn is_single_bearer(&self, rat: RadioTech) -> bool {
        self.single_bearer_techs.contains(&rat)
    }

    pub fn bearer_limit(&self, rat: RadioTech) -> usize {
        if self.is_single_bearer(rat) {
            1
        } else {
            self.max_bearers.max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_mapping() {
        assert_eq!(DataProfile::for_apn_type(ApnType::Dun), DataProfile::Tethered);
        assert_eq!(DataProfile::for_apn_type(ApnType::Ims), DataProfile::Ims);
        assert_eq!(DataProfile::for_apn_type(ApnType::Ia), DataProfile::Default);
        assert_eq!(DataProfile::for_apn_type(ApnType::Mms), DataProfile::Default);
    }

    #[test]
    fn cdma_is_single_bearer() {
        let policy = BearerPolicy::default();
        assert_eq!(policy.bearer_limit(RadioTech::EVDO_A), 1);
        assert_eq!(policy.bearer_limit(RadioTech::LTE), 4);
        let zero = BearerPolicy {
            max_bearers: 0,
            ..Default::default()
        };
        assert_eq!(zero.bearer_limit(RadioTech::LTE), 1);
    }
}
