//! Time-bounded cache of the full device state
//!
//! Readers get an immutable [`CacheSnapshot`] behind an `Arc`; writers build
//! a new snapshot and swap it in. Writers are serialized by the device core
//! lock, so the `RwLock` here is only ever held for a pointer swap.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::property::{Property, PropertyKey, PropertyValue};
use super::state::{DeviceState, PartialState};

/// Published view of the cache at one instant
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    state: DeviceState,
    valid: bool,
    last_updated: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
    /// When each property was last confirmed by a refresh or push
    field_updated: BTreeMap<PropertyKey, Instant>,
}

impl CacheSnapshot {
    fn empty() -> Self {
        Self {
            state: DeviceState::default(),
            valid: false,
            last_updated: None,
            updated_at: None,
            field_updated: BTreeMap::new(),
        }
    }

    /// Last known state, returned even when invalid
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Wall-clock time of the last refresh or merge
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn last_updated(&self) -> Option<Instant> {
        self.last_updated
    }

    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_updated.map(|t| now.saturating_duration_since(t))
    }

    pub fn field_age(&self, key: PropertyKey, now: Instant) -> Option<Duration> {
        self.field_updated
            .get(&key)
            .map(|t| now.saturating_duration_since(*t))
    }

    /// Age of the least recently confirmed property
    ///
    /// `None` until every property has been confirmed at least once.
    pub fn oldest_field_age(&self, now: Instant) -> Option<Duration> {
        if self.field_updated.len() < PropertyKey::ALL.len() {
            return None;
        }
        self.field_updated
            .values()
            .map(|t| now.saturating_duration_since(*t))
            .max()
    }

    /// Valid and every property confirmed within `max_age`
    pub fn is_fresh(&self, max_age: Duration, now: Instant) -> bool {
        self.valid
            && self
                .oldest_field_age(now)
                .is_some_and(|age| age <= max_age)
    }

    /// Value for `key`, or `None` when the cache is invalid
    pub fn get(&self, key: PropertyKey) -> Option<&PropertyValue> {
        self.valid.then(|| self.state.get(key))
    }

    pub fn get_typed<P: Property>(&self) -> Option<P::Value> {
        self.get(P::KEY).and_then(P::decode)
    }
}

/// Holder of the current [`CacheSnapshot`]
pub struct StateCache {
    current: RwLock<Arc<CacheSnapshot>>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(CacheSnapshot::empty())),
        }
    }

    /// Current snapshot; no network, no failure
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&self.current.read())
    }

    fn update(&self, f: impl FnOnce(&mut CacheSnapshot)) -> Arc<CacheSnapshot> {
        let mut next = (*self.snapshot()).clone();
        f(&mut next);
        let next = Arc::new(next);
        *self.current.write() = Arc::clone(&next);
        next
    }

    /// Apply a successful full refresh that was started at `started`
    ///
    /// Properties pushed after `started` are newer than the fetched values
    /// and are kept.
    pub(crate) fn replace(
        &self,
        fetched: DeviceState,
        started: Instant,
        now: Instant,
    ) -> Arc<CacheSnapshot> {
        self.update(|snap| {
            let mut next_state = fetched;
            for key in PropertyKey::ALL {
                match snap.field_updated.get(&key) {
                    Some(pushed) if *pushed > started => {
                        next_state.set(key, snap.state.get(key).clone());
                    },
                    _ => {
                        snap.field_updated.insert(key, now);
                    },
                }
            }
            snap.state = next_state;
            snap.valid = true;
            snap.last_updated = Some(now);
            snap.updated_at = Some(Utc::now());
        })
    }

    /// Overwrite only the keys present in `partial`
    pub(crate) fn merge(&self, partial: &PartialState, now: Instant) -> Arc<CacheSnapshot> {
        self.update(|snap| {
            snap.state.merge(partial);
            for key in partial.keys() {
                snap.field_updated.insert(key, now);
            }
            snap.valid = true;
            snap.last_updated = Some(now);
            snap.updated_at = Some(Utc::now());
        })
    }

    /// Mark the cache stale while keeping the last known values
    pub(crate) fn invalidate(&self) -> bool {
        let was_valid = self.snapshot().valid;
        if was_valid {
            self.update(|snap| snap.valid = false);
        }
        was_valid
    }
}
