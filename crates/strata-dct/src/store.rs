//! APN configuration store.
//!
//! The tracker reads candidate configurations through [`ApnStore`]. The
//! bundled [`StaticApnStore`] holds a list loaded from configuration and
//! filters it for the current carrier:
//!
//! - entries for another carrier numeric, or disabled by the carrier, are dropped;
//! - if any MVNO entry matches the subscriber, only matching MVNO entries are kept;
//! - otherwise only entries without MVNO discriminators are kept.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::apn::{ApnSetting, ApnType, Mvno};

/// Source of candidate configurations.
pub trait ApnStore: Send {
    /// Configurations able to serve `apn_type`, in store order.
    fn list_candidates(&self, apn_type: ApnType) -> Vec<ApnSetting>;

    /// Dedicated tethering configuration, if the carrier mandates one.
    fn dun_apn(&self) -> Option<ApnSetting> {
        None
    }

    fn preferred_apn_id(&self) -> Option<u32> {
        None
    }

    fn set_preferred_apn_id(&mut self, _id: Option<u32>) {}

    /// Reload after an external configuration change.
    fn refresh(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<S: ApnStore> ApnStore for Arc<Mutex<S>> {
    fn list_candidates(&self, apn_type: ApnType) -> Vec<ApnSetting> {
        self.lock().unwrap_or_else(|e| e.into_inner()).list_candidates(apn_type)
    }

    fn dun_apn(&self) -> Option<ApnSetting> {
        self.lock().unwrap_or_else(|e| e.into_inner()).dun_apn()
    }

    fn preferred_apn_id(&self) -> Option<u32> {
        self.lock().unwrap_or_else(|e| e.into_inner()).preferred_apn_id()
    }

    fn set_preferred_apn_id(&mut self, id: Option<u32>) {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_preferred_apn_id(id)
    }

    fn refresh(&mut self) -> anyhow::Result<()> {
        self.lock().unwrap_or_else(|e| e.into_inner()).refresh()
    }
}

// ─── Carrier Identity ───────────────────────────────────────────────────────

/// Subscriber identity used to select carrier and MVNO entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarrierIdentity {
    /// MCC+MNC. Empty accepts entries for any carrier.
    pub numeric: String,
    pub spn: Option<String>,
    pub imsi: Option<String>,
    pub gid1: Option<String>,
}

impl CarrierIdentity {
    pub fn mvno_matches(&self, mvno: &Mvno) -> bool {
        match mvno {
            Mvno::Spn(spn) => self
                .spn
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(spn)),
            Mvno::Imsi(pattern) => self
                .imsi
                .as_deref()
                .is_some_and(|imsi| imsi_matches(pattern, imsi)),
            Mvno::Gid(prefix) => self.gid1.as_deref().is_some_and(|gid| {
                gid.len() >= prefix.len()
                    && gid.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
            }),
        }
    }
}

/// `x`/`X` in the pattern matches any character. The pattern may be shorter
/// than the IMSI but not longer.
pub fn imsi_matches(pattern: &str, imsi: &str) -> bool {
    if pattern.is_empty() || pattern.len() > imsi.len() {
        return false;
    }
    pattern
        .chars()
        .zip(imsi.chars())
        .all(|(p, c)| p == 'x' || p == 'X' || p == c)
}

/// Apply carrier and MVNO filtering to a raw configuration list.
pub fn filter_for_carrier(apns: &[ApnSetting], carrier: &CarrierIdentity) -> Vec<ApnSetting> {
    let usable: Vec<&ApnSetting> = apns
        .iter()
        .filter(|a| a.carrier_enabled)
        .filter(|a| carrier.numeric.is_empty() || a.numeric.is_empty() || a.numeric == carrier.numeric)
        .collect();

    let mvno: Vec<ApnSetting> = usable
        .iter()
        .filter(|a| a.mvno.as_ref().is_some_and(|m| carrier.mvno_matches(m)))
        .map(|a| (*a).clone())
        .collect();
    if !mvno.is_empty() {
        debug!(count = mvno.len(), "using MVNO entries only");
        return mvno;
    }
    usable
        .into_iter()
        .filter(|a| a.mvno.is_none())
        .cloned()
        .collect()
}

// ─── Static Store ───────────────────────────────────────────────────────────

/// In-memory store built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticApnStore {
    carrier: CarrierIdentity,
    source: Vec<ApnSetting>,
    apns: Vec<ApnSetting>,
    dun: Option<ApnSetting>,
    preferred: Option<u32>,
}

impl StaticApnStore {
    pub fn new(carrier: CarrierIdentity, apns: Vec<ApnSetting>, dun: Option<ApnSetting>) -> Self {
        let mut store = Self {
            carrier,
            source: apns,
            apns: Vec::new(),
            dun,
            preferred: None,
        };
        store.rebuild();
        store
    }

    /// Filtered configurations.
    pub fn apns(&self) -> &[ApnSetting] {
        &self.apns
    }

    /// Replace the raw list. Takes effect immediately; the tracker should be
    /// told with an `ApnChanged` event.
    pub fn replace(&mut self, apns: Vec<ApnSetting>) {
        self.source = apns;
        self.rebuild();
    }

    pub fn set_carrier(&mut self, carrier: CarrierIdentity) {
        self.carrier = carrier;
        self.rebuild();
    }

    pub fn set_dun(&mut self, dun: Option<ApnSetting>) {
        self.dun = dun;
    }

    fn rebuild(&mut self) {
        self.apns = filter_for_carrier(&self.source, &self.carrier);
        if let Some(id) = self.preferred {
            if !self.apns.iter().any(|a| a.id == id) {
                info!(id, "preferred APN no longer present, clearing");
                self.preferred = None;
            }
        }
    }
}

impl ApnStore for StaticApnStore {
    fn list_candidates(&self, apn_type: ApnType) -> Vec<ApnSetting> {
        self.apns
            .iter()
            .filter(|a| a.can_handle(apn_type))
            .cloned()
            .collect()
    }

    fn dun_apn(&self) -> Option<ApnSetting> {
        self.dun.clone()
    }

    fn preferred_apn_id(&self) -> Option<u32> {
        self.preferred
    }

    fn set_preferred_apn_id(&mut self, id: Option<u32>) {
        self.preferred = id;
    }

    fn refresh(&mut self) -> anyhow::Result<()> {
        self.rebuild();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apn(id: u32, numeric: &str, types: &[ApnType]) -> ApnSetting {
        let mut a = ApnSetting::new(id, &format!("apn{id}"), types);
        a.numeric = numeric.into();
        a
    }

    fn carrier() -> CarrierIdentity {
        CarrierIdentity {
            numeric: "310260".into(),
            spn: Some("Lyca".into()),
            imsi: Some("310260123456789".into()),
            gid1: Some("BAE0000000000000".into()),
        }
    }

    #[test]
    fn imsi_wildcards() {
        assert!(imsi_matches("310260x", "3102601"));
        assert!(imsi_matches("31026XX", "3102699999"));
        assert!(!imsi_matches("310261", "310260123"));
        assert!(!imsi_matches("3102601234567890", "310260"));
        assert!(!imsi_matches("", "310260"));
    }

    #[test]
    fn gid_is_case_insensitive_prefix() {
        let c = carrier();
        assert!(c.mvno_matches(&Mvno::Gid("bae0".into())));
        assert!(!c.mvno_matches(&Mvno::Gid("bae1".into())));
        assert!(c.mvno_matches(&Mvno::Spn("LYCA".into())));
    }

    #[test]
    fn filters_other_carriers_and_disabled_entries() {
        let mut disabled = apn(3, "310260", &[ApnType::Default]);
        disabled.carrier_enabled = false;
        let list = vec![
            apn(1, "310260", &[ApnType::Default]),
            apn(2, "234150", &[ApnType::Default]),
            disabled,
        ];
        let ids: Vec<u32> = filter_for_carrier(&list, &carrier()).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn mvno_match_replaces_host_entries() {
        let mut mvno = apn(2, "310260", &[ApnType::Default]);
        mvno.mvno = Some(Mvno::Spn("Lyca".into()));
        let mut other = apn(3, "310260", &[ApnType::Default]);
        other.mvno = Some(Mvno::Spn("Other".into()));
        let list = vec![apn(1, "310260", &[ApnType::Default]), mvno, other];

        let ids: Vec<u32> = filter_for_carrier(&list, &carrier()).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2]);

        let no_spn = CarrierIdentity {
            spn: None,
            ..carrier()
        };
        let ids: Vec<u32> = filter_for_carrier(&list, &no_spn).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn candidates_by_type() {
        let store = StaticApnStore::new(
            carrier(),
            vec![
                apn(1, "310260", &[ApnType::Default, ApnType::Supl]),
                apn(2, "310260", &[ApnType::Mms]),
            ],
            None,
        );
        assert_eq!(store.list_candidates(ApnType::Mms).len(), 1);
        assert_eq!(store.list_candidates(ApnType::Hipri)[0].id, 1);
        assert!(store.list_candidates(ApnType::Ims).is_empty());
    }

    #[test]
    fn preferred_cleared_when_entry_disappears() {
        let mut store = StaticApnStore::new(
            carrier(),
            vec![apn(1, "310260", &[ApnType::Default])],
            None,
        );
        store.set_preferred_apn_id(Some(1));
        store.replace(vec![apn(2, "310260", &[ApnType::Default])]);
        assert_eq!(store.preferred_apn_id(), None);
    }

    #[test]
    fn shared_store_sees_updates() {
        let shared = Arc::new(Mutex::new(StaticApnStore::new(carrier(), vec![], None)));
        let reader: Box<dyn ApnStore> = Box::new(shared.clone());
        assert!(reader.list_candidates(ApnType::Default).is_empty());
        shared
            .lock()
            .unwrap()
            .replace(vec![apn(1, "310260", &[ApnType::Default])]);
        assert_eq!(reader.list_candidates(ApnType::Default).len(), 1);
    }
}
