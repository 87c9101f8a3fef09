//! Property schema for the RoboVac
//!
//! Every device attribute is addressed by a [`PropertyKey`] bound to a
//! data-point id (`dps`) on the wire and to a fixed value type. Enumerated
//! attributes carry their exact wire spelling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DeviceError, Result};

/// Fixed identifier for one scalar device attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKey {
    Default,
    Running,
    Direction,
    WorkMode,
    WorkStatus,
    GoHome,
    CleanSpeed,
    FindRobot,
    BatteryLevel,
    ErrorCode,
}

/// Value type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Integer,
    Text,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 10] = [
        PropertyKey::Default,
        PropertyKey::Running,
        PropertyKey::Direction,
        PropertyKey::WorkMode,
        PropertyKey::WorkStatus,
        PropertyKey::GoHome,
        PropertyKey::CleanSpeed,
        PropertyKey::FindRobot,
        PropertyKey::BatteryLevel,
        PropertyKey::ErrorCode,
    ];

    /// Data-point id used by the device protocol
    pub fn dps(&self) -> &'static str {
        match self {
            PropertyKey::Default => "1",
            PropertyKey::Running => "2",
            PropertyKey::Direction => "3",
            PropertyKey::WorkMode => "5",
            PropertyKey::WorkStatus => "15",
            PropertyKey::GoHome => "101",
            PropertyKey::CleanSpeed => "102",
            PropertyKey::FindRobot => "103",
            PropertyKey::BatteryLevel => "104",
            PropertyKey::ErrorCode => "106",
        }
    }

    pub fn from_dps(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.dps() == id)
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            PropertyKey::Default => "Default Property (ignore)",
            PropertyKey::Running => "Running",
            PropertyKey::Direction => "Direction",
            PropertyKey::WorkMode => "Work Mode",
            PropertyKey::WorkStatus => "Work Status",
            PropertyKey::GoHome => "Go Home",
            PropertyKey::CleanSpeed => "Clean Speed",
            PropertyKey::FindRobot => "Find Robot",
            PropertyKey::BatteryLevel => "Battery Level",
            PropertyKey::ErrorCode => "Error Code",
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            PropertyKey::Default
            | PropertyKey::Running
            | PropertyKey::GoHome
            | PropertyKey::FindRobot => ValueKind::Bool,
            PropertyKey::BatteryLevel => ValueKind::Integer,
            PropertyKey::Direction
            | PropertyKey::WorkMode
            | PropertyKey::WorkStatus
            | PropertyKey::CleanSpeed
            | PropertyKey::ErrorCode => ValueKind::Text,
        }
    }

    /// Only commands are writable; reported status is not
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            PropertyKey::Running
                | PropertyKey::Direction
                | PropertyKey::WorkMode
                | PropertyKey::GoHome
                | PropertyKey::CleanSpeed
                | PropertyKey::FindRobot
        )
    }

    /// Value held before the device has reported anything
    pub fn default_value(&self) -> PropertyValue {
        match self {
            PropertyKey::Default
            | PropertyKey::Running
            | PropertyKey::GoHome
            | PropertyKey::FindRobot => PropertyValue::Bool(false),
            PropertyKey::Direction => Direction::Forward.into(),
            PropertyKey::WorkMode => WorkMode::NoSweep.into(),
            PropertyKey::WorkStatus => WorkStatus::Charging.into(),
            PropertyKey::CleanSpeed => CleanSpeed::NoSuction.into(),
            PropertyKey::BatteryLevel => PropertyValue::Integer(-1),
            PropertyKey::ErrorCode => PropertyValue::Text("default - invalid".to_string()),
        }
    }

    /// Check that a value may be written: right type, and a known spelling for enums
    pub fn validate(&self, value: &PropertyValue) -> Result<()> {
        if value.kind() != self.kind() {
            return Err(DeviceError::InvalidValue {
                key: *self,
                detail: format!("expected {:?}, got {:?}", self.kind(), value.kind()),
            });
        }

        let known = match (self, value) {
            (PropertyKey::Direction, PropertyValue::Text(s)) => Direction::from_known(s).is_some(),
            (PropertyKey::WorkMode, PropertyValue::Text(s)) => WorkMode::from_known(s).is_some(),
            (PropertyKey::WorkStatus, PropertyValue::Text(s)) => {
                WorkStatus::from_known(s).is_some()
            },
            (PropertyKey::CleanSpeed, PropertyValue::Text(s)) => {
                CleanSpeed::from_known(s).is_some()
            },
            _ => true,
        };

        if !known {
            return Err(DeviceError::InvalidValue {
                key: *self,
                detail: format!("'{}' is not a recognised value", value),
            });
        }
        Ok(())
    }

    /// Parse user input (`on`, `72`, `Boost_IQ`, ...) into a value for this key
    pub fn parse_value(&self, raw: &str) -> Result<PropertyValue> {
        let raw = raw.trim();
        let value = match self.kind() {
            ValueKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "on" | "1" | "yes" => PropertyValue::Bool(true),
                "false" | "off" | "0" | "no" => PropertyValue::Bool(false),
                _ => {
                    return Err(DeviceError::InvalidValue {
                        key: *self,
                        detail: format!("'{}' is not a boolean", raw),
                    })
                },
            },
            ValueKind::Integer => raw
                .parse::<i64>()
                .map(PropertyValue::Integer)
                .map_err(|e| DeviceError::InvalidValue {
                    key: *self,
                    detail: e.to_string(),
                })?,
            ValueKind::Text => PropertyValue::Text(canonical_spelling(*self, raw)),
        };

        self.validate(&value)?;
        Ok(value)
    }
}

/// Match enum input case-insensitively, returning the exact wire spelling
fn canonical_spelling(key: PropertyKey, raw: &str) -> String {
    let candidates: Vec<&'static str> = match key {
        PropertyKey::Direction => Direction::ALL.iter().map(|v| v.as_str()).collect(),
        PropertyKey::WorkMode => WorkMode::ALL.iter().map(|v| v.as_str()).collect(),
        PropertyKey::WorkStatus => WorkStatus::ALL.iter().map(|v| v.as_str()).collect(),
        PropertyKey::CleanSpeed => CleanSpeed::ALL.iter().map(|v| v.as_str()).collect(),
        _ => Vec::new(),
    };

    candidates
        .into_iter()
        .find(|c| c.eq_ignore_ascii_case(raw))
        .map(str::to_string)
        .unwrap_or_else(|| raw.to_string())
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.friendly_name())
    }
}

impl FromStr for PropertyKey {
    type Err = DeviceError;

    /// Accepts a dps id, the snake_case name, or a short alias
    fn from_str(s: &str) -> Result<Self> {
        if let Some(key) = Self::from_dps(s) {
            return Ok(key);
        }
        let key = match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "default" => PropertyKey::Default,
            "running" | "play" | "play_pause" => PropertyKey::Running,
            "direction" => PropertyKey::Direction,
            "work_mode" | "mode" => PropertyKey::WorkMode,
            "work_status" | "status" => PropertyKey::WorkStatus,
            "go_home" | "home" => PropertyKey::GoHome,
            "clean_speed" | "speed" => PropertyKey::CleanSpeed,
            "find_robot" | "find" => PropertyKey::FindRobot,
            "battery_level" | "battery" => PropertyKey::BatteryLevel,
            "error_code" | "error" => PropertyKey::ErrorCode,
            _ => return Err(DeviceError::UnknownProperty(s.to_string())),
        };
        Ok(key)
    }
}

/// Typed property value as carried in the device state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl PropertyValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            PropertyValue::Bool(_) => ValueKind::Bool,
            PropertyValue::Integer(_) => ValueKind::Integer,
            PropertyValue::Text(_) => ValueKind::Text,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a raw JSON value from the wire
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(PropertyValue::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(PropertyValue::Integer),
            serde_json::Value::String(s) => Some(PropertyValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Bool(b) => serde_json::Value::Bool(*b),
            PropertyValue::Integer(n) => serde_json::Value::from(*n),
            PropertyValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Integer(n) => write!(f, "{}", n),
            PropertyValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Integer(n)
    }
}

impl From<i32> for PropertyValue {
    fn from(n: i32) -> Self {
        PropertyValue::Integer(n.into())
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

/// Generate an enumerated property with its wire spellings
///
/// Spellings the firmware reports that are not listed land in `Other`, so
/// reads never fail on them. Writes only accept the listed variants.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// Reported by the device but not one of the known spellings
            Other(String),
        }

        impl $name {
            /// Known variants, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $wire,)+
                    $name::Other(raw) => raw,
                }
            }

            /// Lenient decode for values read from the device
            pub fn from_wire(s: &str) -> Self {
                Self::from_known(s).unwrap_or_else(|| $name::Other(s.to_string()))
            }

            /// Strict decode: only the listed spellings
            pub fn from_known(s: &str) -> Option<Self> {
                match s {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, $name::Other(_))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for PropertyValue {
            fn from(v: $name) -> Self {
                PropertyValue::Text(v.as_str().to_string())
            }
        }
    };
}

wire_enum!(
    /// Manual drive direction
    Direction {
        Forward => "forward",
        Backward => "backward",
        Left => "left",
        Right => "right",
    }
);

wire_enum!(
    WorkMode {
        Auto => "auto",
        SmallRoom => "SmallRoom",
        Spot => "Spot",
        Edge => "Edge",
        NoSweep => "Nosweep",
    }
);

wire_enum!(
    /// What the vacuum reports it is doing
    WorkStatus {
        /// Cleaning
        Running => "Running",
        /// Not in the dock, paused
        StandBy => "standby",
        /// Not in the dock, paused for a while
        Sleeping => "Sleeping",
        /// In the dock, charging
        Charging => "Charging",
        /// In the dock, fully charged
        Completed => "completed",
        /// Heading home, battery depleted or home requested
        RechargeNeeded => "Recharge",
    }
);

wire_enum!(
    /// Suction power
    CleanSpeed {
        Standard => "Standard",
        BoostIq => "Boost_IQ",
        Max => "Max",
        NoSuction => "No_suction",
    }
);

/// Fault reported by the vacuum
///
/// Codes the firmware adds later are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    Stuck5Min,
    CrashBarStuck,
    SensorDirty,
    NotEnoughPower,
    WheelStuck,
    SideBrushStuck,
    FanStuck,
    RollingBrushStuck,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::NoError => "no_error",
            ErrorCode::Stuck5Min => "Stuck_5_min",
            ErrorCode::CrashBarStuck => "Crash_bar_stuck",
            ErrorCode::SensorDirty => "sensor_dirty",
            ErrorCode::NotEnoughPower => "N_enough_pow",
            ErrorCode::WheelStuck => "Wheel_stuck",
            ErrorCode::SideBrushStuck => "S_brush_stuck",
            ErrorCode::FanStuck => "Fan_stuck",
            ErrorCode::RollingBrushStuck => "R_brush_stuck",
            ErrorCode::Other(code) => code,
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match s {
            "no_error" => ErrorCode::NoError,
            "Stuck_5_min" => ErrorCode::Stuck5Min,
            "Crash_bar_stuck" => ErrorCode::CrashBarStuck,
            "sensor_dirty" => ErrorCode::SensorDirty,
            "N_enough_pow" => ErrorCode::NotEnoughPower,
            "Wheel_stuck" => ErrorCode::WheelStuck,
            "S_brush_stuck" => ErrorCode::SideBrushStuck,
            "Fan_stuck" => ErrorCode::FanStuck,
            "R_brush_stuck" => ErrorCode::RollingBrushStuck,
            other => ErrorCode::Other(other.to_string()),
        }
    }

    pub fn is_fault(&self) -> bool {
        *self != ErrorCode::NoError
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile-time binding of a property key to its Rust type
pub trait Property {
    const KEY: PropertyKey;
    type Value: Clone + fmt::Debug + Send + Sync + 'static;

    fn decode(value: &PropertyValue) -> Option<Self::Value>;
    fn encode(value: Self::Value) -> PropertyValue;
}

/// Marker types, one per [`PropertyKey`]
pub mod props {
    use super::*;

    macro_rules! bool_property {
        ($name:ident) => {
            pub struct $name;

            impl Property for $name {
                const KEY: PropertyKey = PropertyKey::$name;
                type Value = bool;

                fn decode(value: &PropertyValue) -> Option<bool> {
                    value.as_bool()
                }

                fn encode(value: bool) -> PropertyValue {
                    PropertyValue::Bool(value)
                }
            }
        };
    }

    macro_rules! enum_property {
        ($name:ident) => {
            pub struct $name;

            impl Property for $name {
                const KEY: PropertyKey = PropertyKey::$name;
                type Value = super::$name;

                fn decode(value: &PropertyValue) -> Option<super::$name> {
                    value.as_str().map(super::$name::from_wire)
                }

                fn encode(value: super::$name) -> PropertyValue {
                    value.into()
                }
            }
        };
    }

    bool_property!(Default);
    bool_property!(Running);
    bool_property!(GoHome);
    bool_property!(FindRobot);
    enum_property!(Direction);
    enum_property!(WorkMode);
    enum_property!(WorkStatus);
    enum_property!(CleanSpeed);

    pub struct BatteryLevel;

    impl Property for BatteryLevel {
        const KEY: PropertyKey = PropertyKey::BatteryLevel;
        type Value = i64;

        fn decode(value: &PropertyValue) -> Option<i64> {
            value.as_i64()
        }

        fn encode(value: i64) -> PropertyValue {
            PropertyValue::Integer(value)
        }
    }

    pub struct ErrorCode;

    impl Property for ErrorCode {
        const KEY: PropertyKey = PropertyKey::ErrorCode;
        type Value = super::ErrorCode;

        fn decode(value: &PropertyValue) -> Option<super::ErrorCode> {
            value.as_str().map(super::ErrorCode::from_wire)
        }

        fn encode(value: super::ErrorCode) -> PropertyValue {
            PropertyValue::Text(value.as_str().to_string())
        }
    }
}
