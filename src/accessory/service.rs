//! Services and characteristics exposed to the home-automation host

use std::fmt;
use thiserror::Error;

use crate::device::{ErrorCode, WorkStatus};

/// Status the host receives when a get/set cannot be served
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapStatusError {
    #[error("service communication failure")]
    ServiceCommunicationFailure,
    #[error("characteristic is read-only")]
    ReadOnlyCharacteristic,
    #[error("resource does not exist")]
    ResourceDoesNotExist,
    #[error("invalid value in request")]
    InvalidValueInRequest,
}

/// Host-side service types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    AccessoryInformation,
    Fan,
    Switch,
    Battery,
    MotionSensor,
}

/// Stable identity of each service this accessory publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    Information,
    Vacuum,
    Battery,
    FindRobot,
    ErrorSensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    Identify,
    Manufacturer,
    Model,
    Name,
    SerialNumber,
    FirmwareRevision,
    On,
    BatteryLevel,
    ChargingState,
    StatusLowBattery,
    MotionDetected,
}

impl Characteristic {
    pub fn is_writable(&self) -> bool {
        matches!(self, Characteristic::On | Characteristic::Identify)
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Value carried by a characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharacteristicValue {
    Bool(bool),
    UInt8(u8),
    Text(String),
}

impl CharacteristicValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CharacteristicValue::Bool(b) => Some(*b),
            CharacteristicValue::UInt8(n) => Some(*n != 0),
            CharacteristicValue::Text(_) => None,
        }
    }
}

impl fmt::Display for CharacteristicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharacteristicValue::Bool(b) => write!(f, "{}", b),
            CharacteristicValue::UInt8(n) => write!(f, "{}", n),
            CharacteristicValue::Text(s) => f.write_str(s),
        }
    }
}

/// `ChargingState` values
pub const NOT_CHARGING: u8 = 0;
pub const CHARGING: u8 = 1;

/// `StatusLowBattery` values
pub const BATTERY_LEVEL_NORMAL: u8 = 0;
pub const BATTERY_LEVEL_LOW: u8 = 1;

/// Anything other than `Charging`, including unrecognised statuses, is not charging
pub fn charging_state(status: &WorkStatus) -> CharacteristicValue {
    CharacteristicValue::UInt8(if *status == WorkStatus::Charging {
        CHARGING
    } else {
        NOT_CHARGING
    })
}

/// Host battery level; the device reports -1 before its first status
pub fn battery_level(level: i64) -> CharacteristicValue {
    CharacteristicValue::UInt8(level.clamp(0, 100) as u8)
}

pub fn low_battery(level: i64, threshold: u8) -> CharacteristicValue {
    CharacteristicValue::UInt8(if level < i64::from(threshold) {
        BATTERY_LEVEL_LOW
    } else {
        BATTERY_LEVEL_NORMAL
    })
}

pub fn error_detected(code: &ErrorCode) -> CharacteristicValue {
    CharacteristicValue::Bool(code.is_fault())
}

/// One published service and the characteristics it carries
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    pub service_type: ServiceType,
    pub name: String,
    pub characteristics: Vec<Characteristic>,
}

impl ServiceDescriptor {
    pub fn has(&self, characteristic: Characteristic) -> bool {
        self.characteristics.contains(&characteristic)
    }
}

/// Characteristic change pushed to the host
#[derive(Debug, Clone, PartialEq)]
pub struct CharacteristicUpdate {
    pub service: ServiceId,
    pub characteristic: Characteristic,
    pub value: CharacteristicValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_mapping() {
        assert_eq!(battery_level(-1), CharacteristicValue::UInt8(0));
        assert_eq!(battery_level(64), CharacteristicValue::UInt8(64));
        assert_eq!(battery_level(140), CharacteristicValue::UInt8(100));

        assert_eq!(low_battery(29, 30), CharacteristicValue::UInt8(BATTERY_LEVEL_LOW));
        assert_eq!(low_battery(30, 30), CharacteristicValue::UInt8(BATTERY_LEVEL_NORMAL));
    }

    #[test]
    fn test_charging_only_when_docked_and_charging() {
        assert_eq!(charging_state(&WorkStatus::Charging), CharacteristicValue::UInt8(CHARGING));
        for status in [
            WorkStatus::Completed,
            WorkStatus::Running,
            WorkStatus::RechargeNeeded,
            WorkStatus::Other("Paused".to_string()),
        ] {
            assert_eq!(charging_state(&status), CharacteristicValue::UInt8(NOT_CHARGING));
        }
    }

    #[test]
    fn test_error_sensor() {
        assert_eq!(error_detected(&ErrorCode::NoError), CharacteristicValue::Bool(false));
        assert_eq!(error_detected(&ErrorCode::WheelStuck), CharacteristicValue::Bool(true));
    }
}
