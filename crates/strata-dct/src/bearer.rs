//! # Bearer Pool
//!
//! Slab-backed pool of physical bearers. A bearer is shared by every logical
//! context whose configuration is equivalent to the one it was activated
//! with, and is torn down when the last reference is released.
//!
//! ```text
//!   Inactive ──activate──▶ Activating ──success──▶ Active ──teardown──▶ Disconnecting
//!      ▲                      │                                              │
//!      └──────────failure─────┘◀──────────────────done───────────────────────┘
//! ```
//!
//! Every activation or teardown is stamped with a fresh generation. A
//! completion whose [`RequestTag`] does not match the bearer's current
//! generation and state is stale and must be discarded.

use serde::Serialize;
use slab::Slab;
use std::net::IpAddr;

use crate::apn::{ApnSetting, ApnType};

// ─── Identifiers ────────────────────────────────────────────────────────────

/// Slot of a bearer in the pool. Stable for the bearer's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BearerId(pub usize);

/// Identifies one outstanding radio request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RequestTag {
    pub bearer: BearerId,
    pub generation: u64,
}

// ─── Link Properties ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyInfo {
    pub host: String,
    pub port: u16,
}

/// Addressing reported by the modem for an active bearer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkProperties {
    pub interface: Option<String>,
    pub addresses: Vec<IpAddr>,
    pub gateways: Vec<IpAddr>,
    pub dns: Vec<IpAddr>,
    pub mtu: Option<u32>,
    pub proxy: Option<ProxyInfo>,
}

// ─── Bearer ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BearerState {
    Inactive,
    Activating,
    Active,
    Disconnecting,
}

/// One physical bearer.
#[derive(Debug, Clone)]
pub struct BearerConnection {
    pub id: BearerId,
    pub state: BearerState,
    /// Bumped for every request and on reset.
    pub generation: u64,
    /// Configuration the bearer was activated with.
    pub apn: Option<ApnSetting>,
    pub properties: Option<LinkProperties>,
    /// Contexts holding a reference, in bind order.
    pub refs: Vec<ApnType>,
}

impl BearerConnection {
    fn new(id: BearerId) -> Self {
        Self {
            id,
            state: BearerState::Inactive,
            generation: 0,
            apn: None,
            properties: None,
            refs: Vec::new(),
        }
    }

    pub fn tag(&self) -> RequestTag {
        RequestTag {
            bearer: self.id,
            generation: self.generation,
        }
    }

    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    fn clear(&mut self) {
        self.state = BearerState::Inactive;
        self.apn = None;
        self.properties = None;
    }
}

// ─── Pool ───────────────────────────────────────────────────────────────────

/// Bearer pool. Inactive slots are reused before new ones are allocated.
pub struct BearerPool {
    bearers: Slab<BearerConnection>,
    next_generation: u64,
}

impl BearerPool {
    pub fn new(capacity: usize) -> Self {
        BearerPool {
            bearers: Slab::with_capacity(capacity),
            next_generation: 1,
        }
    }

    pub fn get(&self, id: BearerId) -> Option<&BearerConnection> {
        self.bearers.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BearerConnection> {
        self.bearers.iter().map(|(_, b)| b)
    }

    pub fn state(&self, id: BearerId) -> Option<BearerState> {
        self.get(id).map(|b| b.state)
    }

    /// Bearers not in `Inactive`.
    pub fn in_use(&self) -> usize {
        self.iter().filter(|b| b.state != BearerState::Inactive).count()
    }

    /// Find a bearer whose configuration is equivalent to one of
    /// `candidates`. Active bearers are preferred over ones still activating;
    /// among equals the lowest slot wins.
    pub fn find_shareable(&self, candidates: &[ApnSetting]) -> Option<BearerId> {
        let matches = |b: &&BearerConnection| {
            b.apn
                .as_ref()
                .is_some_and(|apn| candidates.iter().any(|c| c.is_equivalent(apn)))
        };
        self.iter()
            .filter(|b| b.state == BearerState::Active)
            .find(matches)
            .or_else(|| {
                self.iter()
                    .filter(|b| b.state == BearerState::Activating)
                    .find(matches)
            })
            .map(|b| b.id)
    }

    /// Reserve an inactive bearer, allocating one if fewer than `limit`
    /// bearers are in use. `None` when the pool is exhausted.
    pub fn acquire(&mut self, limit: usize) -> Option<BearerId> {
        if self.in_use() >= limit {
            return None;
        }
        if let Some(b) = self
            .bearers
            .iter()
            .map(|(_, b)| b)
            .find(|b| b.state == BearerState::Inactive && b.refs.is_empty())
        {
            return Some(b.id);
        }
        let entry = self.bearers.vacant_entry();
        let id = BearerId(entry.key());
        entry.insert(BearerConnection::new(id));
        Some(id)
    }

    /// Start activating `id` with `apn`. Returns the request tag.
    pub fn begin_activation(&mut self, id: BearerId, apn: ApnSetting) -> Option<RequestTag> {
        let generation = self.bump();
        let bearer = self.bearers.get_mut(id.0)?;
        bearer.state = BearerState::Activating;
        bearer.generation = generation;
        bearer.apn = Some(apn);
        bearer.properties = None;
        Some(bearer.tag())
    }

    /// Whether `tag` is the current request for its bearer and the bearer is
    /// in `expected`.
    pub fn is_current(&self, tag: RequestTag, expected: BearerState) -> bool {
        self.get(tag.bearer)
            .is_some_and(|b| b.generation == tag.generation && b.state == expected)
    }

    /// Activation succeeded.
    pub fn activated(&mut self, id: BearerId, properties: LinkProperties) {
        if let Some(b) = self.bearers.get_mut(id.0) {
            b.state = BearerState::Active;
            b.properties = Some(properties);
        }
    }

    /// Activation failed, or the network dropped the bearer. Returns the
    /// contexts that held references.
    pub fn deactivated(&mut self, id: BearerId) -> Vec<ApnType> {
        match self.bearers.get_mut(id.0) {
            Some(b) => {
                b.clear();
                std::mem::take(&mut b.refs)
            }
            None => Vec::new(),
        }
    }

    /// Start tearing down `id`. Returns the request tag, or `None` if the
    /// bearer is not active.
    pub fn begin_teardown(&mut self, id: BearerId) -> Option<RequestTag> {
        if self.state(id) != Some(BearerState::Active) {
            return None;
        }
        let generation = self.bump();
        let bearer = self.bearers.get_mut(id.0)?;
        bearer.state = BearerState::Disconnecting;
        bearer.generation = generation;
        Some(bearer.tag())
    }

    /// Teardown completed. Returns the contexts that held references.
    pub fn teardown_complete(&mut self, id: BearerId) -> Vec<ApnType> {
        self.deactivated(id)
    }

    /// Forget the bearer's state without a radio round-trip. Any completion
    /// still in flight for it becomes stale. Returns the former references.
    pub fn reset(&mut self, id: BearerId) -> Vec<ApnType> {
        let generation = self.bump();
        match self.bearers.get_mut(id.0) {
            Some(b) => {
                b.generation = generation;
                b.clear();
                std::mem::take(&mut b.refs)
            }
            None => Vec::new(),
        }
    }

    pub fn bind(&mut self, id: BearerId, t: ApnType) {
        if let Some(b) = self.bearers.get_mut(id.0) {
            if !b.refs.contains(&t) {
                b.refs.push(t);
            }
        }
    }

    /// Drop `t`'s reference. Returns the remaining reference count.
    pub fn unbind(&mut self, id: BearerId, t: ApnType) -> usize {
        match self.bearers.get_mut(id.0) {
            Some(b) => {
                b.refs.retain(|r| *r != t);
                b.refs.len()
            }
            None => 0,
        }
    }

    fn bump(&mut self) -> u64 {
        let g = self.next_generation;
        self.next_generation += 1;
        g
    }
}
