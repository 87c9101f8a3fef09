//! Typed property accessors
//!
//! Reads go through the cache ([`RoboVac::read_fresh`]); writes go straight to
//! the device and leave the cache alone. The device echoes accepted writes as
//! push updates, which is what moves the cache.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info};

use super::property::{
    props, CleanSpeed, Direction, ErrorCode, Property, PropertyKey, PropertyValue, WorkMode,
    WorkStatus,
};
use super::robovac::RoboVac;
use crate::error::{DeviceError, Result};

/// Run `fut` with a caller-side deadline
///
/// The future is dropped on expiry; work it spawned keeps running.
pub async fn with_deadline<T>(deadline: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(deadline, fut)
        .await
        .unwrap_or(Err(DeviceError::Timeout(deadline)))
}

impl RoboVac {
    /// Typed value of `P`, refreshing if the cache is older than `max_age`
    pub async fn get<P: Property>(&self, max_age: Duration) -> Result<P::Value> {
        let state = self.read_fresh(max_age).await?;
        // Only a value of the wrong type lands here; unknown spellings decode to `Other`
        P::decode(state.get(P::KEY)).ok_or_else(|| {
            DeviceError::Fetch(format!("device reported {} for {}", state.get(P::KEY), P::KEY))
        })
    }

    /// Typed value of `P` from the cache; `None` when invalid or undecodable
    pub fn get_cached<P: Property>(&self) -> Option<P::Value> {
        self.read_cached().get_typed::<P>()
    }

    /// Untyped read for callers that pick the key at runtime
    pub async fn get_value(&self, key: PropertyKey, max_age: Duration) -> Result<PropertyValue> {
        Ok(self.read_fresh(max_age).await?.get(key).clone())
    }

    pub async fn set<P: Property>(&self, value: P::Value) -> Result<()> {
        self.set_value(P::KEY, P::encode(value)).await
    }

    /// Write one property to the device
    ///
    /// The write runs in its own task so a caller timing out does not cancel
    /// a command the device may already have accepted.
    pub async fn set_value(&self, key: PropertyKey, value: PropertyValue) -> Result<()> {
        if !key.is_writable() {
            return Err(DeviceError::ReadOnlyProperty(key));
        }
        key.validate(&value)?;

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_write(key, value).await });
        handle.await.unwrap_or_else(|e| {
            Err(DeviceError::Write {
                key,
                detail: format!("write task failed: {}", e),
            })
        })
    }

    async fn run_write(&self, key: PropertyKey, value: PropertyValue) -> Result<()> {
        self.ensure_connected().await?;
        let (session, epoch) = self.current_session().ok_or_else(|| {
            DeviceError::Connection("session closed before write".to_string())
        })?;

        debug!(device = %self.name, "Setting {} to {}...", key, value);
        match session.write_property(key, value.clone()).await {
            Ok(()) => {
                info!(device = %self.name, "Setting {} to {} successful.", key, value);
                Ok(())
            },
            Err(e) => {
                error!(device = %self.name, error = %format!("{:#}", e), "Setting {} to {} failed", key, value);
                self.disconnect_session(Some(epoch)).await;
                Err(DeviceError::Write {
                    key,
                    detail: format!("{:#}", e),
                })
            },
        }
    }
}

macro_rules! getters {
    ($($get:ident, $cached:ident => $prop:ident : $ty:ty;)*) => {
        impl RoboVac {
            $(
                pub async fn $get(&self, max_age: Duration) -> Result<$ty> {
                    self.get::<props::$prop>(max_age).await
                }

                pub fn $cached(&self) -> Option<$ty> {
                    self.get_cached::<props::$prop>()
                }
            )*
        }
    };
}

getters! {
    get_play_pause, get_play_pause_cached => Running: bool;
    get_direction, get_direction_cached => Direction: Direction;
    get_work_mode, get_work_mode_cached => WorkMode: WorkMode;
    get_work_status, get_work_status_cached => WorkStatus: WorkStatus;
    get_go_home, get_go_home_cached => GoHome: bool;
    get_clean_speed, get_clean_speed_cached => CleanSpeed: CleanSpeed;
    get_find_robot, get_find_robot_cached => FindRobot: bool;
    get_battery_level, get_battery_level_cached => BatteryLevel: i64;
    get_error_code, get_error_code_cached => ErrorCode: ErrorCode;
}

impl RoboVac {
    pub async fn set_play_pause(&self, running: bool) -> Result<()> {
        self.set::<props::Running>(running).await
    }

    pub async fn set_direction(&self, direction: Direction) -> Result<()> {
        self.set::<props::Direction>(direction).await
    }

    pub async fn set_work_mode(&self, mode: WorkMode) -> Result<()> {
        self.set::<props::WorkMode>(mode).await
    }

    pub async fn set_go_home(&self, go_home: bool) -> Result<()> {
        self.set::<props::GoHome>(go_home).await
    }

    pub async fn set_clean_speed(&self, speed: CleanSpeed) -> Result<()> {
        self.set::<props::CleanSpeed>(speed).await
    }

    pub async fn set_find_robot(&self, find: bool) -> Result<()> {
        self.set::<props::FindRobot>(find).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PartialState, RoboVacOptions, SessionState};
    use crate::error::ErrorKind;
    use crate::transport::SimulatedTransport;
    use std::sync::Arc;

    fn device(transport: &SimulatedTransport) -> RoboVac {
        let mut options = RoboVacOptions::new("vac-1", "secret");
        options.device_ip = Some("10.0.0.7".to_string());
        RoboVac::new(options, Arc::new(transport.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_getters_read_through_cache() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(20));
        transport.set_device_state(
            &PartialState::new()
                .with(PropertyKey::BatteryLevel, 64)
                .with(PropertyKey::CleanSpeed, CleanSpeed::BoostIq)
                .with(PropertyKey::WorkStatus, WorkStatus::Charging),
        );
        let vac = device(&transport);
        let max_age = Duration::from_secs(15);

        assert_eq!(vac.get_battery_level(max_age).await.unwrap(), 64);
        assert_eq!(vac.get_clean_speed(max_age).await.unwrap(), CleanSpeed::BoostIq);
        assert_eq!(vac.get_work_status(max_age).await.unwrap(), WorkStatus::Charging);
        assert_eq!(vac.get_error_code(max_age).await.unwrap(), ErrorCode::NoError);
        assert_eq!(transport.fetch_calls(), 1);

        assert_eq!(vac.get_battery_level_cached(), Some(64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_battery_reads_share_slow_fetch() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(200));
        transport.set_device_state(
            &PartialState::new()
                .with(PropertyKey::BatteryLevel, 72)
                .with(PropertyKey::Running, true),
        );
        let vac = device(&transport);
        let max_age = Duration::from_millis(15_000);

        let (a, b) = tokio::join!(vac.get_battery_level(max_age), vac.get_battery_level(max_age));
        assert_eq!(a.unwrap(), 72);
        assert_eq!(b.unwrap(), 72);
        assert_eq!(transport.fetch_calls(), 1);
        assert_eq!(vac.get_play_pause_cached(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognised_status_still_reads() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(20));
        transport.set_device_state(&PartialState::new().with(PropertyKey::WorkStatus, "Paused"));
        let vac = device(&transport);

        let status = vac.get_work_status(Duration::from_secs(15)).await.unwrap();
        assert_eq!(status, WorkStatus::Other("Paused".to_string()));
        assert!(!status.is_known());
        assert!(vac.read_cached().is_valid());
        assert_eq!(vac.get_work_status_cached(), Some(WorkStatus::Other("Paused".to_string())));
        assert_eq!(transport.fetch_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_write_tears_down_before_cache_goes_invalid() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let vac = device(&transport);
        vac.read_fresh(Duration::ZERO).await.unwrap();

        let watcher = {
            let vac = vac.clone();
            tokio::spawn(async move {
                while vac.read_cached().is_valid() {
                    tokio::task::yield_now().await;
                }
                vac.session_state()
            })
        };

        transport.fail_next_write(1);
        let err = vac.set_find_robot(true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Write);
        assert_eq!(watcher.await.unwrap(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unrecognised_spelling_cannot_be_written() {
        let transport = SimulatedTransport::new("vac-1");
        let vac = device(&transport);

        let err = vac.set_work_mode(WorkMode::Other("Zigzag".to_string())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(transport.open_calls(), 0);
    }

    #[tokio::test]
    async fn test_cached_getters_need_valid_cache() {
        let vac = device(&SimulatedTransport::new("vac-1"));
        assert_eq!(vac.get_play_pause_cached(), None);
        assert_eq!(vac.get_battery_level_cached(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_does_not_touch_cache_until_push() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(20));
        transport.set_echo_writes(false);
        let vac = device(&transport);
        vac.read_fresh(Duration::from_secs(15)).await.unwrap();

        vac.set_play_pause(true).await.unwrap();
        assert_eq!(transport.write_calls(), 1);
        assert_eq!(vac.get_play_pause_cached(), Some(false));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(transport.push(PartialState::new().with(PropertyKey::Running, true)));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(vac.get_play_pause_cached(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_echoed_write_updates_cache() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(20));
        let vac = device(&transport);
        vac.read_fresh(Duration::from_secs(15)).await.unwrap();

        vac.set_go_home(true).await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(vac.get_go_home_cached(), Some(true));
        assert_eq!(vac.get_play_pause_cached(), Some(false));
        assert_eq!(vac.get_work_status_cached(), Some(WorkStatus::RechargeNeeded));
    }

    #[tokio::test]
    async fn test_write_failure_disconnects() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let vac = device(&transport);
        vac.ensure_connected().await.unwrap();

        transport.fail_next_write(1);
        let err = vac.set_find_robot(true).await.unwrap_err();
        assert!(matches!(err, DeviceError::Write { key: PropertyKey::FindRobot, .. }));
        assert_eq!(vac.session_state(), SessionState::Disconnected);

        // Next write reconnects
        vac.set_find_robot(true).await.unwrap();
        assert_eq!(transport.open_calls(), 2);
    }

    #[tokio::test]
    async fn test_rejected_writes_never_reach_device() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let vac = device(&transport);

        let err = vac
            .set_value(PropertyKey::BatteryLevel, PropertyValue::Integer(5))
            .await
            .unwrap_err();
        assert_eq!(err, DeviceError::ReadOnlyProperty(PropertyKey::BatteryLevel));

        let err = vac
            .set_value(PropertyKey::WorkMode, PropertyValue::Text("Zigzag".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);

        assert_eq!(transport.open_calls(), 0);
        assert_eq!(transport.write_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_distinct_from_device_errors() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_secs(4));
        let vac = device(&transport);

        let err = with_deadline(Duration::from_secs(3), vac.get_battery_level(Duration::from_secs(15)))
            .await
            .unwrap_err();
        assert_eq!(err, DeviceError::Timeout(Duration::from_secs(3)));
        assert_eq!(err.kind(), ErrorKind::Timeout);

        // The refresh finishes in the background and populates the cache
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(vac.get_battery_level_cached(), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_outlives_caller_deadline() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_secs(2));
        let vac = device(&transport);

        let err = with_deadline(Duration::from_secs(3), vac.set_play_pause(true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.write_calls(), 1);
        assert_eq!(
            transport.device_state().get(PropertyKey::Running),
            &PropertyValue::Bool(true)
        );
    }
}
