//! Global data-allowed gate.
//!
//! Collects the radio, user and policy flags that must all agree before any
//! bring-up may be issued. [`DataGate::blockers`] reports every condition
//! currently preventing data so the tracker can log them in one line.

use serde::Serialize;

/// A condition currently preventing data bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Blocker {
    NotAttached,
    RadioOff,
    VoiceCall,
    InternalDataDisabled,
    UserDataDisabled,
    PolicyDataDisabled,
    Roaming,
    PsRestricted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataGate {
    pub attached: bool,
    /// Set once the modem has attached at least once; allows bring-up to be
    /// queued while a re-attach is in progress.
    pub auto_attach_on_creation: bool,
    pub radio_on: bool,
    pub voice_call_active: bool,
    pub concurrent_voice_data: bool,
    pub internal_data_enabled: bool,
    pub user_data_enabled: bool,
    pub policy_data_enabled: bool,
    pub roaming: bool,
    pub data_roaming_enabled: bool,
    pub ps_restricted: bool,
    pub emergency_only: bool,
}

impl Default for DataGate {
    fn default() -> Self {
        Self {
            attached: false,
            auto_attach_on_creation: false,
            radio_on: true,
            voice_call_active: false,
            concurrent_voice_data: true,
            internal_data_enabled: true,
            user_data_enabled: true,
            policy_data_enabled: true,
            roaming: false,
            data_roaming_enabled: false,
            ps_restricted: false,
            emergency_only: false,
        }
    }
}

impl DataGate {
    /// Internal, user and policy switches all on.
    pub fn any_data_enabled(&self) -> bool {
        self.internal_data_enabled && self.user_data_enabled && self.policy_data_enabled
    }

    pub fn voice_blocks_data(&self) -> bool {
        self.voice_call_active && !self.concurrent_voice_data
    }

    pub fn blockers(&self) -> Vec<Blocker> {
        let mut out = Vec::new();
        if !(self.attached || self.auto_attach_on_creation) {
            out.push(Blocker::NotAttached);
        }
        if !self.radio_on {
            out.push(Blocker::RadioOff);
        }
        if self.voice_blocks_data() {
            out.push(Blocker::VoiceCall);
        }
        if !self.internal_data_enabled {
            out.push(Blocker::InternalDataDisabled);
        }
        if !self.user_data_enabled {
            out.push(Blocker::UserDataDisabled);
        }
        if !self.policy_data_enabled {
            out.push(Blocker::PolicyDataDisabled);
        }
        if self.roaming && !self.data_roaming_enabled {
            out.push(Blocker::Roaming);
        }
        if self.ps_restricted {
            out.push(Blocker::PsRestricted);
        }
        out
    }

    pub fn is_data_allowed(&self) -> bool {
        self.blockers().is_empty()
    }
}
