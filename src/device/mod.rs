//! RoboVac device core
//!
//! A [`RoboVac`] hides the unreliable local session behind a cached,
//! self-healing view of the vacuum: reads are served from a time-bounded
//! cache, concurrent refreshes and connects are coalesced, push updates are
//! merged as they arrive, and any transport failure tears the session down so
//! the next access starts clean.

mod accessors;
pub mod cache;
pub mod property;
mod push;
mod refresh;
mod robovac;
mod session;
pub mod state;

pub use accessors::with_deadline;
pub use cache::{CacheSnapshot, StateCache};
pub use property::{
    props, CleanSpeed, Direction, ErrorCode, Property, PropertyKey, PropertyValue, ValueKind,
    WorkMode, WorkStatus,
};
pub use robovac::{PushCallback, RoboVac, RoboVacOptions, SessionState, StatusCallback};
pub use state::{DeviceState, PartialState};
