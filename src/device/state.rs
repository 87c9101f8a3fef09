//! Device state snapshots
//!
//! [`DeviceState`] always holds one value per [`PropertyKey`];
//! [`PartialState`] holds whatever subset the device chose to report.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::warn;

use super::property::{Property, PropertyKey, PropertyValue};

/// Subset of properties reported by the device (push events, write echoes)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialState {
    values: BTreeMap<PropertyKey, PropertyValue>,
}

impl PartialState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and the simulator
    pub fn with(mut self, key: PropertyKey, value: impl Into<PropertyValue>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn insert(&mut self, key: PropertyKey, value: PropertyValue) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: PropertyKey) -> Option<&PropertyValue> {
        self.values.get(&key)
    }

    pub fn contains(&self, key: PropertyKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = PropertyKey> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyKey, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// Parse a wire `dps` object
    ///
    /// Unknown data-point ids are ignored; values of the wrong type are
    /// dropped with a warning.
    pub fn from_dps(dps: &Map<String, Value>) -> Self {
        let mut partial = Self::new();
        for (id, raw) in dps {
            let Some(key) = PropertyKey::from_dps(id) else {
                continue;
            };
            match PropertyValue::from_json(raw) {
                Some(value) if value.kind() == key.kind() => partial.insert(key, value),
                _ => warn!(key = %key, raw = %raw, "Ignoring value with unexpected type"),
            }
        }
        partial
    }

    pub fn to_dps(&self) -> Map<String, Value> {
        self.iter()
            .map(|(key, value)| (key.dps().to_string(), value.to_json()))
            .collect()
    }

    /// Multi-line dump with friendly property names
    pub fn format_status(&self) -> String {
        format_entries(self.iter())
    }
}

/// Complete device state: one typed value per property
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    device_id: Option<String>,
    values: BTreeMap<PropertyKey, PropertyValue>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            device_id: None,
            values: PropertyKey::ALL
                .iter()
                .map(|key| (*key, key.default_value()))
                .collect(),
        }
    }
}

impl DeviceState {
    /// Build a full state from a report, filling unreported keys with defaults
    pub fn from_report(device_id: Option<String>, report: &PartialState) -> Self {
        let mut state = Self {
            device_id,
            ..Self::default()
        };
        state.merge(report);
        state
    }

    /// Parse a full `{"devId": .., "dps": {..}}` status response
    pub fn from_status_json(status: &Value) -> Option<Self> {
        let dps = status.get("dps")?.as_object()?;
        let device_id = status
            .get("devId")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self::from_report(device_id, &PartialState::from_dps(dps)))
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn get(&self, key: PropertyKey) -> &PropertyValue {
        // Every key is seeded in Default and never removed
        &self.values[&key]
    }

    pub fn get_typed<P: Property>(&self) -> Option<P::Value> {
        P::decode(self.get(P::KEY))
    }

    /// Key-by-key overwrite; keys absent from `partial` are untouched
    pub fn merge(&mut self, partial: &PartialState) {
        for (key, value) in partial.iter() {
            self.values.insert(key, value.clone());
        }
    }

    pub(crate) fn set(&mut self, key: PropertyKey, value: PropertyValue) {
        self.values.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyKey, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn to_status_json(&self) -> Value {
        let dps: Map<String, Value> = self
            .iter()
            .map(|(key, value)| (key.dps().to_string(), value.to_json()))
            .collect();
        serde_json::json!({
            "devId": self.device_id.clone().unwrap_or_else(|| "default - invalid".to_string()),
            "dps": dps,
        })
    }

    pub fn format_status(&self) -> String {
        format_entries(self.iter())
    }
}

fn format_entries<'a>(entries: impl Iterator<Item = (PropertyKey, &'a PropertyValue)>) -> String {
    let mut out = String::from("-- Status Start --\n");
    for (key, value) in entries {
        let _ = writeln!(out, "- {}: {}", key.friendly_name(), value);
    }
    out.push_str("-- Status End --");
    out
}
