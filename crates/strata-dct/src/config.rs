use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::apn::{ApnSetting, ApnType, RadioTech};
use crate::context::{ContextRegistry, ContextDef};
use crate::error::ConfigError;
use crate::radio::BearerPolicy;
use crate::retry::RetryPolicy;
use crate::store::{CarrierIdentity, StaticApnStore};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrackerConfigInput {
    pub version: u32,
    pub radio: RadioConfigInput,
    pub retry: RetryConfigInput,
    pub data: DataConfigInput,
    pub contexts: Vec<ContextConfigInput>,
    pub carrier: CarrierIdentity,
    pub apns: Vec<ApnSetting>,
    pub dun_apn: Option<ApnSetting>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RadioConfigInput {
    pub tech: Option<u8>,
    pub single_bearer_techs: Option<Vec<u8>>,
    pub max_bearers: Option<usize>,
    pub concurrent_voice_data: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetryConfigInput {
    pub candidate_delay_ms: Option<u64>,
    pub restart_delay_ms: Option<u64>,
    pub fail_fast_delay_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub fail_fast: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DataConfigInput {
    pub user_data_enabled: Option<bool>,
    pub data_roaming_enabled: Option<bool>,
    pub default_enabled: Option<bool>,
    pub prefer_apn: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextConfigInput {
    #[serde(rename = "type")]
    pub apn_type: String,
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    /// Technology assumed until the modem reports one.
    pub tech: RadioTech,
    pub bearer: BearerPolicy,
    pub concurrent_voice_data: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tech: RadioTech::LTE,
            bearer: BearerPolicy::default(),
            concurrent_voice_data: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataConfig {
    pub user_data_enabled: bool,
    pub data_roaming_enabled: bool,
    /// Enable the default context at start-up.
    pub default_enabled: bool,
    /// Remember the first configuration the default context connects with
    /// and try it alone on later attempts.
    pub prefer_apn: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            user_data_enabled: true,
            data_roaming_enabled: false,
            default_enabled: true,
            prefer_apn: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub version: u32,
    pub radio: RadioConfig,
    pub retry: RetryPolicy,
    pub data: DataConfig,
    pub contexts: Vec<ContextDef>,
    pub carrier: CarrierIdentity,
    pub apns: Vec<ApnSetting>,
    pub dun_apn: Option<ApnSetting>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            radio: RadioConfig::default(),
            retry: RetryPolicy::default(),
            data: DataConfig::default(),
            contexts: ContextRegistry::default_defs(),
            carrier: CarrierIdentity::default(),
            apns: Vec::new(),
            dun_apn: None,
        }
    }
}

impl TrackerConfigInput {
    pub fn resolve(self) -> Result<TrackerConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = RadioConfig::default();
        let radio = RadioConfig {
            tech: self.radio.tech.map(RadioTech).unwrap_or(defaults.tech),
            bearer: BearerPolicy {
                single_bearer_techs: self
                    .radio
                    .single_bearer_techs
                    .map(|v| v.into_iter().map(RadioTech).collect())
                    .unwrap_or(defaults.bearer.single_bearer_techs),
                max_bearers: self
                    .radio
                    .max_bearers
                    .unwrap_or(defaults.bearer.max_bearers)
                    .max(1),
            },
            concurrent_voice_data: self
                .radio
                .concurrent_voice_data
                .unwrap_or(defaults.concurrent_voice_data),
        };

        let base = RetryPolicy::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        let retry = RetryPolicy {
            candidate_delay: ms(self.retry.candidate_delay_ms, base.candidate_delay),
            restart_delay: ms(self.retry.restart_delay_ms, base.restart_delay),
            fail_fast_delay: ms(self.retry.fail_fast_delay_ms, base.fail_fast_delay),
            reconnect_delay: ms(self.retry.reconnect_delay_ms, base.reconnect_delay),
            fail_fast: self.retry.fail_fast.unwrap_or(base.fail_fast),
        };

        let d = DataConfig::default();
        let data = DataConfig {
            user_data_enabled: self.data.user_data_enabled.unwrap_or(d.user_data_enabled),
            data_roaming_enabled: self.data.data_roaming_enabled.unwrap_or(d.data_roaming_enabled),
            default_enabled: self.data.default_enabled.unwrap_or(d.default_enabled),
            prefer_apn: self.data.prefer_apn.unwrap_or(d.prefer_apn),
        };

        let contexts = if self.contexts.is_empty() {
            ContextRegistry::default_defs()
        } else {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for c in self.contexts {
                let apn_type: ApnType = c
                    .apn_type
                    .parse()
                    .map_err(|e| ConfigError::Invalid(format!("contexts: {e}")))?;
                if !seen.insert(apn_type) {
                    continue;
                }
                out.push(ContextDef {
                    apn_type,
                    priority: c.priority.unwrap_or(apn_type.default_priority()),
                });
            }
            out
        };

        let mut ids = HashSet::new();
        let mut apns = Vec::new();
        for mut apn in self.apns {
            apn.apn = apn.apn.trim().to_string();
            if apn.apn.is_empty() || !ids.insert(apn.id) {
                continue;
            }
            apns.push(apn);
        }

        let dun_apn = self.dun_apn.filter(|a| !a.apn.trim().is_empty());

        Ok(TrackerConfig {
            version,
            radio,
            retry,
            data,
            contexts,
            carrier: self.carrier,
            apns,
            dun_apn,
        })
    }
}

impl TrackerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(TrackerConfig::default());
        }
        let parsed: TrackerConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Store seeded with this configuration's APN list.
    pub fn apn_store(&self) -> StaticApnStore {
        StaticApnStore::new(self.carrier.clone(), self.apns.clone(), self.dun_apn.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_config_basic() {
        let toml = r#"
            version = 1

            [radio]
            tech = 13
            max_bearers = 2
            single_bearer_techs = [6, 7, 8]

            [retry]
            candidate_delay_ms = 10
            restart_delay_ms = 1000
            fail_fast = true

            [data]
            default_enabled = false
            data_roaming_enabled = true

            [[contexts]]
            type = "default"

            [[contexts]]
            type = "mms"
            priority = 2

            [carrier]
            numeric = "310260"
            spn = "Lyca"

            [[apns]]
            id = 1
            numeric = "310260"
            apn = " fast.t-mobile.com "
            types = ["default", "supl", "mms"]
            proxy = "10.0.0.1"

            [dun_apn]
            id = 99
            apn = "pcweb.tmobile.com"
            types = ["dun"]
        "#;

        let cfg = TrackerConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.radio.tech, RadioTech::EHRPD);
        assert_eq!(cfg.radio.bearer.max_bearers, 2);
        assert!(cfg.radio.bearer.is_single_bearer(RadioTech::EVDO_0));
        assert_eq!(cfg.retry.candidate_delay, Duration::from_millis(10));
        assert_eq!(cfg.retry.restart_delay, Duration::from_millis(1000));
        assert_eq!(cfg.retry.reconnect_delay, RetryPolicy::default().reconnect_delay);
        assert!(cfg.retry.fail_fast);
        assert!(!cfg.data.default_enabled);
        assert!(cfg.data.data_roaming_enabled);
        assert!(cfg.data.user_data_enabled);
        assert_eq!(cfg.contexts.len(), 2);
        assert_eq!(cfg.contexts[1].priority, 2);
        assert_eq!(cfg.carrier.spn.as_deref(), Some("Lyca"));
        assert_eq!(cfg.apns.len(), 1);
        assert_eq!(cfg.apns[0].apn, "fast.t-mobile.com");
        assert!(cfg.apns[0].can_handle(ApnType::Mms));
        assert_eq!(cfg.dun_apn.unwrap().id, 99);
    }

    #[test]
    fn empty_input_is_default() {
        let cfg = TrackerConfig::from_toml_str("  ").unwrap();
        assert_eq!(cfg.contexts.len(), ApnType::ALL.len());
        assert_eq!(cfg.radio.bearer.max_bearers, 4);
        assert!(cfg.apns.is_empty());
    }

    #[test]
    fn parse_toml_config_dedup() {
        let toml = r#"
            [[apns]]
            id = 1
            apn = "a"
            [[apns]]
            id = 1
            apn = "b"
            [[apns]]
            id = 2
            apn = "  "
            [[contexts]]
            type = "dun"
            priority = 1
            [[contexts]]
            type = "DUN"
            priority = 7
        "#;
        let cfg = TrackerConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.apns.len(), 1);
        assert_eq!(cfg.apns[0].apn, "a");
        assert_eq!(cfg.contexts.len(), 1);
        assert_eq!(cfg.contexts[0].priority, 1);
    }

    #[test]
    fn rejects_unknown_context_type() {
        let toml = r#"
            [[contexts]]
            type = "xcap"
        "#;
        assert!(matches!(
            TrackerConfig::from_toml_str(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_future_version() {
        assert!(matches!(
            TrackerConfig::from_toml_str("version = 2"),
            Err(ConfigError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn apn_store_filters_by_carrier() {
        let toml = r#"
            [carrier]
            numeric = "310260"
            [[apns]]
            id = 1
            numeric = "310260"
            apn = "home"
            [[apns]]
            id = 2
            numeric = "23410"
            apn = "away"
        "#;
        let cfg = TrackerConfig::from_toml_str(toml).unwrap();
        let store = cfg.apn_store();
        assert_eq!(store.apns().len(), 1);
        assert_eq!(store.apns()[0].apn, "home");
    }

    #[test]
    fn max_bearers_is_at_least_one() {
        let cfg = TrackerConfig::from_toml_str("[radio]\nmax_bearers = 0").unwrap();
        assert_eq!(cfg.radio.bearer.max_bearers, 1);
    }
}
