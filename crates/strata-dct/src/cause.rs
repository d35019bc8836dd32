//! # Bring-up Failure Causes
//!
//! Cause values reported by the modem when a bearer activation fails, or
//! when the network drops an active bearer. The numeric codes follow the
//! 3GPP TS 24.008 session-management cause values where one exists.
//!
//! The permanent/transient split drives the candidate list: a permanent
//! cause discards the configuration for the rest of the attempt and counts
//! toward "every candidate rejected", which stops automatic retries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a failure may succeed if retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureClass {
    /// May succeed on a later attempt (next candidate or whole restart).
    Transient,
    /// Configuration rejected; it will not succeed until configuration changes.
    Permanent,
}

/// Failure cause carried by a bring-up completion or a bearer drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailCause {
    OperatorBarred,
    InsufficientResources,
    MissingUnknownApn,
    UnknownPdpAddressType,
    UserAuthentication,
    ActivationRejectGgsn,
    ActivationRejectUnspecified,
    ServiceOptionNotSupported,
    ServiceOptionNotSubscribed,
    ServiceOptionOutOfOrder,
    NsapiInUse,
    OnlyIpv4Allowed,
    OnlyIpv6Allowed,
    OnlySingleBearerAllowed,
    ProtocolErrors,
    RegularDeactivation,
    RadioPowerOff,
    RadioNotAvailable,
    SignalLost,
    Unknown,
}

impl FailCause {
    /// Map a modem cause code to a cause. Unrecognised codes are `Unknown`.
    pub fn from_code(code: u32) -> Self {
        match code {
            0x08 => FailCause::OperatorBarred,
            0x1A => FailCause::InsufficientResources,
            0x1B => FailCause::MissingUnknownApn,
            0x1C => FailCause::UnknownPdpAddressType,
            0x1D => FailCause::UserAuthentication,
            0x1E => FailCause::ActivationRejectGgsn,
            0x1F => FailCause::ActivationRejectUnspecified,
            0x20 => FailCause::ServiceOptionNotSupported,
            0x21 => FailCause::ServiceOptionNotSubscribed,
            0x22 => FailCause::ServiceOptionOutOfOrder,
            0x23 => FailCause::NsapiInUse,
            0x24 => FailCause::RegularDeactivation,
            0x32 => FailCause::OnlyIpv4Allowed,
            0x33 => FailCause::OnlyIpv6Allowed,
            0x34 => FailCause::OnlySingleBearerAllowed,
            0x6F => FailCause::ProtocolErrors,
            0x10000 => FailCause::RadioPowerOff,
            0x10001 => FailCause::RadioNotAvailable,
            0x10004 => FailCause::SignalLost,
            _ => FailCause::Unknown,
        }
    }

    /// Modem cause code for this cause.
    pub fn code(&self) -> u32 {
        match self {
            FailCause::OperatorBarred => 0x08,
            FailCause::InsufficientResources => 0x1A,
            FailCause::MissingUnknownApn => 0x1B,
            FailCause::UnknownPdpAddressType => 0x1C,
            FailCause::UserAuthentication => 0x1D,
            FailCause::ActivationRejectGgsn => 0x1E,
            FailCause::ActivationRejectUnspecified => 0x1F,
            FailCause::ServiceOptionNotSupported => 0x20,
            FailCause::ServiceOptionNotSubscribed => 0x21,
            FailCause::ServiceOptionOutOfOrder => 0x22,
            FailCause::NsapiInUse => 0x23,
            FailCause::RegularDeactivation => 0x24,
            FailCause::OnlyIpv4Allowed => 0x32,
            FailCause::OnlyIpv6Allowed => 0x33,
            FailCause::OnlySingleBearerAllowed => 0x34,
            FailCause::ProtocolErrors => 0x6F,
            FailCause::RadioPowerOff => 0x10000,
            FailCause::RadioNotAvailable => 0x10001,
            FailCause::SignalLost => 0x10004,
            FailCause::Unknown => 0xFFFF,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            FailCause::OperatorBarred
            | FailCause::MissingUnknownApn
            | FailCause::UnknownPdpAddressType
            | FailCause::UserAuthentication
            | FailCause::ActivationRejectGgsn
            | FailCause::ServiceOptionNotSupported
            | FailCause::ServiceOptionNotSubscribed
            | FailCause::NsapiInUse
            | FailCause::OnlyIpv4Allowed
            | FailCause::OnlyIpv6Allowed
            | FailCause::ProtocolErrors => FailureClass::Permanent,
            _ => FailureClass::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.class() == FailureClass::Permanent
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailCause::OperatorBarred => "operator_barred",
            FailCause::InsufficientResources => "insufficient_resources",
            FailCause::MissingUnknownApn => "missing_unknown_apn",
            FailCause::UnknownPdpAddressType => "unknown_pdp_address_type",
            FailCause::UserAuthentication => "user_authentication",
            FailCause::ActivationRejectGgsn => "activation_reject_ggsn",
            FailCause::ActivationRejectUnspecified => "activation_reject_unspecified",
            FailCause::ServiceOptionNotSupported => "service_option_not_supported",
            FailCause::ServiceOptionNotSubscribed => "service_option_not_subscribed",
            FailCause::ServiceOptionOutOfOrder => "service_option_out_of_order",
            FailCause::NsapiInUse => "nsapi_in_use",
            FailCause::OnlyIpv4Allowed => "only_ipv4_allowed",
            FailCause::OnlyIpv6Allowed => "only_ipv6_allowed",
            FailCause::OnlySingleBearerAllowed => "only_single_bearer_allowed",
            FailCause::ProtocolErrors => "protocol_errors",
            FailCause::RegularDeactivation => "regular_deactivation",
            FailCause::RadioPowerOff => "radio_power_off",
            FailCause::RadioNotAvailable => "radio_not_available",
            FailCause::SignalLost => "signal_lost",
            FailCause::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_causes() {
        assert!(FailCause::MissingUnknownApn.is_permanent());
        assert!(FailCause::UserAuthentication.is_permanent());
        assert!(FailCause::ProtocolErrors.is_permanent());
        assert!(!FailCause::InsufficientResources.is_permanent());
        assert!(!FailCause::SignalLost.is_permanent());
        assert!(!FailCause::Unknown.is_permanent());
    }

    #[test]
    fn code_mapping_is_stable() {
        for cause in [
            FailCause::OperatorBarred,
            FailCause::MissingUnknownApn,
            FailCause::ServiceOptionOutOfOrder,
            FailCause::OnlySingleBearerAllowed,
            FailCause::RadioNotAvailable,
        ] {
            assert_eq!(FailCause::from_code(cause.code()), cause);
        }
        assert_eq!(FailCause::from_code(0x7777), FailCause::Unknown);
    }
}
