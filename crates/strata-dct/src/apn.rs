//! # APN Types and Candidate Configurations
//!
//! An [`ApnType`] names a traffic category that needs its own logical
//! context. An [`ApnSetting`] is one carrier-provided configuration able to
//! carry a set of those types, restricted to a set of radio technologies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::bearer::ProxyInfo;
use crate::error::TrackerError;

/// Proxy port used when a configuration names a proxy host without a port.
pub const DEFAULT_PROXY_PORT: u16 = 8080;

// ─── APN Types ──────────────────────────────────────────────────────────────

/// Traffic category served by a logical context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApnType {
    Default,
    Mms,
    Supl,
    Dun,
    Hipri,
    Fota,
    Ims,
    Cbs,
    Ia,
    Emergency,
}

impl ApnType {
    pub const ALL: [ApnType; 10] = [
        ApnType::Default,
        ApnType::Mms,
        ApnType::Supl,
        ApnType::Dun,
        ApnType::Hipri,
        ApnType::Fota,
        ApnType::Ims,
        ApnType::Cbs,
        ApnType::Ia,
        ApnType::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApnType::Default => "default",
            ApnType::Mms => "mms",
            ApnType::Supl => "supl",
            ApnType::Dun => "dun",
            ApnType::Hipri => "hipri",
            ApnType::Fota => "fota",
            ApnType::Ims => "ims",
            ApnType::Cbs => "cbs",
            ApnType::Ia => "ia",
            ApnType::Emergency => "emergency",
        }
    }

    /// Default arbitration rank. Lower ranks win.
    pub fn default_priority(&self) -> u8 {
        match self {
            ApnType::Emergency => 0,
            ApnType::Ims => 1,
            ApnType::Hipri => 2,
            ApnType::Mms => 3,
            ApnType::Supl => 4,
            ApnType::Dun => 5,
            ApnType::Fota => 6,
            ApnType::Cbs => 7,
            ApnType::Ia => 8,
            ApnType::Default => 9,
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for ApnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApnType {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ApnType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| TrackerError::UnknownType(s.to_string()))
    }
}

// ─── Type Mask ──────────────────────────────────────────────────────────────

const WILDCARD_BIT: u16 = 1 << 15;

/// Set of APN types a configuration can carry. `"*"` matches every type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ApnTypeMask(u16);

impl ApnTypeMask {
    pub const ALL: ApnTypeMask = ApnTypeMask(WILDCARD_BIT);

    pub fn empty() -> Self {
        ApnTypeMask(0)
    }

    pub fn of(types: &[ApnType]) -> Self {
        types.iter().fold(Self::empty(), |m, t| m.with(*t))
    }

    pub fn with(self, t: ApnType) -> Self {
        ApnTypeMask(self.0 | t.bit())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 & WILDCARD_BIT != 0
    }

    pub fn contains(&self, t: ApnType) -> bool {
        self.is_wildcard() || self.0 & t.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Parse a type list. An empty list means "all types"; unknown entries
    /// are skipped with a warning.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut mask = Self::empty();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry == "*" {
                return Self::ALL;
            }
            match entry.parse::<ApnType>() {
                Ok(t) => mask = mask.with(t),
                Err(_) => warn!(entry, "ignoring unknown APN type"),
            }
        }
        if mask.is_empty() {
            Self::ALL
        } else {
            mask
        }
    }
}

impl From<Vec<String>> for ApnTypeMask {
    fn from(v: Vec<String>) -> Self {
        ApnTypeMask::parse(&v)
    }
}

impl From<ApnTypeMask> for Vec<String> {
    fn from(mask: ApnTypeMask) -> Self {
        if mask.is_wildcard() {
            return vec!["*".to_string()];
        }
        ApnType::ALL
            .iter()
            .filter(|t| mask.contains(**t))
            .map(|t| t.as_str().to_string())
            .collect()
    }
}

// ─── Radio Technology ───────────────────────────────────────────────────────

/// Radio access technology currently serving the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RadioTech(pub u8);

impl RadioTech {
    pub const UNKNOWN: RadioTech = RadioTech(0);
    pub const GPRS: RadioTech = RadioTech(1);
    pub const EDGE: RadioTech = RadioTech(2);
    pub const UMTS: RadioTech = RadioTech(3);
    pub const IS95A: RadioTech = RadioTech(4);
    pub const IS95B: RadioTech = RadioTech(5);
    pub const ONE_X_RTT: RadioTech = RadioTech(6);
    pub const EVDO_0: RadioTech = RadioTech(7);
    pub const EVDO_A: RadioTech = RadioTech(8);
    pub const HSDPA: RadioTech = RadioTech(9);
    pub const HSUPA: RadioTech = RadioTech(10);
    pub const HSPA: RadioTech = RadioTech(11);
    pub const EVDO_B: RadioTech = RadioTech(12);
    pub const EHRPD: RadioTech = RadioTech(13);
    pub const LTE: RadioTech = RadioTech(14);
    pub const HSPAP: RadioTech = RadioTech(15);
    pub const GSM: RadioTech = RadioTech(16);
}

impl fmt::Display for RadioTech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            RadioTech::GPRS => "gprs",
            RadioTech::EDGE => "edge",
            RadioTech::UMTS => "umts",
            RadioTech::IS95A => "is95a",
            RadioTech::IS95B => "is95b",
            RadioTech::ONE_X_RTT => "1xrtt",
            RadioTech::EVDO_0 => "evdo_0",
            RadioTech::EVDO_A => "evdo_a",
            RadioTech::HSDPA => "hsdpa",
            RadioTech::HSUPA => "hsupa",
            RadioTech::HSPA => "hspa",
            RadioTech::EVDO_B => "evdo_b",
            RadioTech::EHRPD => "ehrpd",
            RadioTech::LTE => "lte",
            RadioTech::HSPAP => "hspap",
            RadioTech::GSM => "gsm",
            _ => return write!(f, "rat{}", self.0),
        };
        f.write_str(name)
    }
}

/// Radio technologies a configuration may be used on. Empty means any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u8>", into = "Vec<u8>")]
pub struct BearerMask(u32);

impl BearerMask {
    pub const ANY: BearerMask = BearerMask(0);

    pub fn of(techs: &[RadioTech]) -> Self {
        BearerMask(
            techs
                .iter()
                .filter(|t| t.0 > 0 && t.0 <= 32)
                .fold(0, |m, t| m | 1 << (t.0 - 1)),
        )
    }

    pub fn admits(&self, rat: RadioTech) -> bool {
        if self.0 == 0 {
            return true;
        }
        rat.0 > 0 && rat.0 <= 32 && self.0 & (1 << (rat.0 - 1)) != 0
    }
}

impl From<Vec<u8>> for BearerMask {
    fn from(v: Vec<u8>) -> Self {
        let techs: Vec<RadioTech> = v.into_iter().map(RadioTech).collect();
        BearerMask::of(&techs)
    }
}

impl From<BearerMask> for Vec<u8> {
    fn from(mask: BearerMask) -> Self {
        (1..=32u8).filter(|bit| mask.0 & (1 << (bit - 1)) != 0).collect()
    }
}

// ─── Candidate Configuration ────────────────────────────────────────────────

/// Carrier-variant discriminator for MVNO configurations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "match", rename_all = "lowercase")]
pub enum Mvno {
    /// Service provider name, case-insensitive exact match.
    Spn(String),
    /// Subscriber identity pattern; `x` matches any digit.
    Imsi(String),
    /// Group identifier prefix, case-insensitive.
    Gid(String),
}

/// One carrier-provided candidate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApnSetting {
    pub id: u32,
    /// Carrier numeric identity (MCC+MNC) this entry belongs to.
    pub numeric: String,
    /// Human-readable carrier label.
    pub name: String,
    /// Network-selector string sent to the modem.
    pub apn: String,
    pub types: ApnTypeMask,
    pub bearers: BearerMask,
    pub protocol: String,
    pub roaming_protocol: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub auth_type: u8,
    pub proxy: Option<String>,
    pub port: Option<String>,
    pub carrier_enabled: bool,
    pub mvno: Option<Mvno>,
}

impl Default for ApnSetting {
    fn default() -> Self {
        Self {
            id: 0,
            numeric: String::new(),
            name: String::new(),
            apn: String::new(),
            types: ApnTypeMask::ALL,
            bearers: BearerMask::ANY,
            protocol: "IP".into(),
            roaming_protocol: "IP".into(),
            user: None,
            password: None,
            auth_type: 0,
            proxy: None,
            port: None,
            carrier_enabled: true,
            mvno: None,
        }
    }
}

impl ApnSetting {
    /// Convenience constructor used by tests and the simulator.
    pub fn new(id: u32, apn: &str, types: &[ApnType]) -> Self {
        Self {
            id,
            name: apn.to_string(),
            apn: apn.to_string(),
            types: if types.is_empty() {
                ApnTypeMask::ALL
            } else {
                ApnTypeMask::of(types)
            },
            ..Default::default()
        }
    }

    /// Whether this configuration can carry `t`. A default-capable entry
    /// also carries hipri traffic.
    pub fn can_handle(&self, t: ApnType) -> bool {
        self.types.contains(t) || (t == ApnType::Hipri && self.types.contains(ApnType::Default))
    }

    pub fn admits(&self, rat: RadioTech) -> bool {
        self.bearers.admits(rat)
    }

    /// Two configurations are equivalent when they select the same network
    /// with the same capabilities and credentials, ignoring labels and ids.
    pub fn is_equivalent(&self, other: &ApnSetting) -> bool {
        normalize(&self.apn) == normalize(&other.apn)
            && self.types == other.types
            && self.protocol.eq_ignore_ascii_case(&other.protocol)
            && self.roaming_protocol.eq_ignore_ascii_case(&other.roaming_protocol)
            && self.user == other.user
            && self.password == other.password
            && self.auth_type == other.auth_type
    }

    /// Proxy advertised with the link, if the entry names a usable one.
    pub fn proxy_info(&self) -> Option<ProxyInfo> {
        let host = self.proxy.as_deref().map(str::trim).filter(|h| !h.is_empty())?;
        let port = match self.port.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            None => DEFAULT_PROXY_PORT,
            Some(raw) => match raw.parse::<u16>() {
                Ok(p) => p,
                Err(e) => {
                    warn!(apn = %self.apn, port = raw, error = %e, "bad proxy port, ignoring proxy");
                    return None;
                }
            },
        };
        Some(ProxyInfo {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ApnSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.id, self.apn, self.numeric)
    }
}

fn normalize(apn: &str) -> String {
    apn.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_types_case_insensitively() {
        assert_eq!("MMS".parse::<ApnType>().unwrap(), ApnType::Mms);
        assert_eq!(" dun ".parse::<ApnType>().unwrap(), ApnType::Dun);
        assert!(matches!(
            "bogus".parse::<ApnType>(),
            Err(TrackerError::UnknownType(_))
        ));
    }

    #[test]
    fn empty_type_list_means_all() {
        let mask = ApnTypeMask::parse::<&str>(&[]);
        assert!(mask.is_wildcard());
        assert!(mask.contains(ApnType::Ims));
    }

    #[test]
    fn wildcard_wins_over_explicit_types() {
        let mask = ApnTypeMask::parse(&["mms", "*"]);
        assert!(mask.contains(ApnType::Fota));
    }

    #[test]
    fn unknown_entries_are_skipped() {
        let mask = ApnTypeMask::parse(&["mms", "xcap"]);
        assert!(mask.contains(ApnType::Mms));
        assert!(!mask.contains(ApnType::Default));
    }

    #[test]
    fn default_entry_carries_hipri() {
        let apn = ApnSetting::new(1, "internet", &[ApnType::Default]);
        assert!(apn.can_handle(ApnType::Hipri));
        assert!(!apn.can_handle(ApnType::Mms));
    }

    #[test]
    fn bearer_mask_zero_admits_everything() {
        assert!(BearerMask::ANY.admits(RadioTech::LTE));
        assert!(BearerMask::ANY.admits(RadioTech::UNKNOWN));
        let lte_only = BearerMask::of(&[RadioTech::LTE]);
        assert!(lte_only.admits(RadioTech::LTE));
        assert!(!lte_only.admits(RadioTech::UMTS));
        assert!(!lte_only.admits(RadioTech::UNKNOWN));
    }

    #[test]
    fn equivalence_ignores_label_and_case() {
        let mut a = ApnSetting::new(1, "Internet.Example ", &[ApnType::Default]);
        let mut b = ApnSetting::new(2, "internet.example", &[ApnType::Default]);
        a.name = "A".into();
        b.name = "B".into();
        assert!(a.is_equivalent(&b));
        b.user = Some("u".into());
        assert!(!a.is_equivalent(&b));
    }

    #[test]
    fn proxy_port_defaults_to_8080() {
        let mut apn = ApnSetting::new(1, "mms", &[ApnType::Mms]);
        apn.proxy = Some("10.0.0.1".into());
        let proxy = apn.proxy_info().unwrap();
        assert_eq!(proxy.port, DEFAULT_PROXY_PORT);

        apn.port = Some("3128".into());
        assert_eq!(apn.proxy_info().unwrap().port, 3128);

        apn.port = Some("not-a-port".into());
        assert!(apn.proxy_info().is_none());
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let apn: ApnSetting = toml::from_str(
            r#"
            id = 7
            apn = "ims"
            types = ["ims"]
            bearers = [14]
            mvno = { type = "spn", match = "Lyca" }
            "#,
        )
        .unwrap();
        assert!(apn.carrier_enabled);
        assert_eq!(apn.protocol, "IP");
        assert!(apn.can_handle(ApnType::Ims));
        assert!(apn.admits(RadioTech::LTE));
        assert!(!apn.admits(RadioTech::HSPA));
        assert_eq!(apn.mvno, Some(Mvno::Spn("Lyca".into())));
    }
}
