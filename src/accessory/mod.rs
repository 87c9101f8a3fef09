//! Home-automation accessory for one RoboVac
//!
//! Maps host characteristic reads and writes onto the device core, enforcing
//! the host's response deadline, and turns push updates into characteristic
//! updates.

pub mod service;

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::device::{with_deadline, ErrorCode, PartialState, PropertyKey, RoboVac, WorkStatus};
use crate::error::Result as DeviceResult;

pub use service::{
    Characteristic, CharacteristicUpdate, CharacteristicValue, HapStatusError, ServiceDescriptor,
    ServiceId, ServiceType,
};

/// Callback receiving characteristic updates derived from push events
pub type UpdateCallback = Arc<dyn Fn(&[CharacteristicUpdate]) + Send + Sync>;

/// Presentation options for the accessory
#[derive(Debug, Clone, PartialEq)]
pub struct AccessoryOptions {
    pub name: String,
    pub use_switch_service: bool,
    pub hide_find_button: bool,
    pub hide_error_sensor: bool,
    pub low_battery_threshold: u8,
}

impl AccessoryOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: config.name.clone(),
            use_switch_service: config.use_switch_service,
            hide_find_button: config.hide_find_button,
            hide_error_sensor: config.hide_error_sensor,
            low_battery_threshold: config.low_battery_threshold,
        }
    }
}

/// Accessory bridging the host to a [`RoboVac`]
#[derive(Clone)]
pub struct RoboVacAccessory {
    vac: RoboVac,
    options: Arc<AccessoryOptions>,
    services: Arc<Vec<ServiceDescriptor>>,
    update_callback: Arc<RwLock<Option<UpdateCallback>>>,
}

impl RoboVacAccessory {
    /// Build the accessory and subscribe it to the device's push updates
    pub fn new(vac: RoboVac, options: AccessoryOptions) -> Self {
        info!("Eufy Robovac starting");
        let services = build_services(&options);
        let accessory = Self {
            vac,
            options: Arc::new(options),
            services: Arc::new(services),
            update_callback: Arc::new(RwLock::new(None)),
        };

        // The subscription must not hold the device itself
        let options = Arc::clone(&accessory.options);
        let services = Arc::clone(&accessory.services);
        let update_callback = Arc::clone(&accessory.update_callback);
        accessory
            .vac
            .subscribe_push(Arc::new(move |partial: &PartialState| {
                let updates = derive_updates(&options, &services, partial);
                publish_updates(&options.name, &update_callback, updates);
            }));

        accessory
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn device(&self) -> &RoboVac {
        &self.vac
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn service(&self, id: ServiceId) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Set the callback that receives characteristic updates
    pub fn set_update_callback(&self, callback: UpdateCallback) {
        *self.update_callback.write() = Some(callback);
    }

    fn ensure_published(
        &self,
        service: ServiceId,
        characteristic: Characteristic,
    ) -> Result<(), HapStatusError> {
        if is_published(&self.services, service, characteristic) {
            Ok(())
        } else {
            Err(HapStatusError::ResourceDoesNotExist)
        }
    }

    /// Race a device operation against the host deadline
    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = DeviceResult<T>>,
    ) -> Result<T, HapStatusError> {
        with_deadline(self.vac.response_deadline(), fut)
            .await
            .map_err(|e| {
                warn!(accessory = %self.options.name, kind = ?e.kind(), error = %e, "{} failed", what);
                HapStatusError::ServiceCommunicationFailure
            })
    }

    /// Serve a host read
    pub async fn handle_get(
        &self,
        service: ServiceId,
        characteristic: Characteristic,
    ) -> Result<CharacteristicValue, HapStatusError> {
        self.ensure_published(service, characteristic)?;
        debug!(accessory = %self.options.name, ?service, %characteristic, "get");

        let max_age = self.vac.cache_duration();
        let value = match (service, characteristic) {
            (ServiceId::Information, Characteristic::Manufacturer) => {
                CharacteristicValue::Text("Eufy".to_string())
            },
            (ServiceId::Information, Characteristic::Model) => {
                CharacteristicValue::Text("RoboVac".to_string())
            },
            (ServiceId::Information, Characteristic::Name) => {
                CharacteristicValue::Text(self.options.name.clone())
            },
            (ServiceId::Information, Characteristic::SerialNumber) => {
                CharacteristicValue::Text(self.vac.device_id().to_string())
            },
            (ServiceId::Information, Characteristic::FirmwareRevision) => {
                CharacteristicValue::Text("unknown".to_string())
            },
            (ServiceId::Vacuum, Characteristic::On) => CharacteristicValue::Bool(
                self.bounded("getRunning", self.vac.get_play_pause(max_age))
                    .await?,
            ),
            (ServiceId::FindRobot, Characteristic::On) => CharacteristicValue::Bool(
                self.bounded("getFindRobot", self.vac.get_find_robot(max_age))
                    .await?,
            ),
            (ServiceId::Battery, Characteristic::BatteryLevel) => service::battery_level(
                self.bounded("getBatteryLevel", self.vac.get_battery_level(max_age))
                    .await?,
            ),
            (ServiceId::Battery, Characteristic::StatusLowBattery) => service::low_battery(
                self.bounded("getBatteryLevel", self.vac.get_battery_level(max_age))
                    .await?,
                self.options.low_battery_threshold,
            ),
            (ServiceId::Battery, Characteristic::ChargingState) => service::charging_state(
                &self
                    .bounded("getWorkStatus", self.vac.get_work_status(max_age))
                    .await?,
            ),
            (ServiceId::ErrorSensor, Characteristic::MotionDetected) => service::error_detected(
                &self
                    .bounded("getErrorCode", self.vac.get_error_code(max_age))
                    .await?,
            ),
            _ => return Err(HapStatusError::ResourceDoesNotExist),
        };

        Ok(value)
    }

    /// Serve a host write
    pub async fn handle_set(
        &self,
        service: ServiceId,
        characteristic: Characteristic,
        value: CharacteristicValue,
    ) -> Result<(), HapStatusError> {
        self.ensure_published(service, characteristic)?;
        if !characteristic.is_writable() {
            return Err(HapStatusError::ReadOnlyCharacteristic);
        }
        debug!(accessory = %self.options.name, ?service, %characteristic, %value, "set");

        match (service, characteristic) {
            (ServiceId::Information, Characteristic::Identify) => {
                info!(accessory = %self.options.name, "Triggered SET Identify: {}", value);
                Ok(())
            },
            (ServiceId::Vacuum, Characteristic::On) => {
                let on = value.as_bool().ok_or(HapStatusError::InvalidValueInRequest)?;
                // Turning the vacuum off sends it home rather than pausing it
                if on {
                    self.bounded("setRunning", self.vac.set_play_pause(true)).await
                } else {
                    self.bounded("setRunning", self.vac.set_go_home(true)).await
                }
            },
            (ServiceId::FindRobot, Characteristic::On) => {
                let on = value.as_bool().ok_or(HapStatusError::InvalidValueInRequest)?;
                self.bounded("setFindRobot", self.vac.set_find_robot(on)).await
            },
            _ => Err(HapStatusError::ReadOnlyCharacteristic),
        }
    }

    /// Characteristic updates implied by a push event
    pub fn characteristic_updates(&self, partial: &PartialState) -> Vec<CharacteristicUpdate> {
        derive_updates(&self.options, &self.services, partial)
    }
}

fn is_published(services: &[ServiceDescriptor], service: ServiceId, characteristic: Characteristic) -> bool {
    services
        .iter()
        .any(|s| s.id == service && s.has(characteristic))
}

fn derive_updates(
    options: &AccessoryOptions,
    services: &[ServiceDescriptor],
    partial: &PartialState,
) -> Vec<CharacteristicUpdate> {
    let mut updates = Vec::new();
    let mut push = |service: ServiceId, characteristic: Characteristic, value| {
        if is_published(services, service, characteristic) {
            updates.push(CharacteristicUpdate {
                service,
                characteristic,
                value,
            });
        }
    };

    for (key, value) in partial.iter() {
        match key {
            PropertyKey::Running => {
                if let Some(on) = value.as_bool() {
                    push(ServiceId::Vacuum, Characteristic::On, CharacteristicValue::Bool(on));
                }
            },
            PropertyKey::FindRobot => {
                if let Some(on) = value.as_bool() {
                    push(ServiceId::FindRobot, Characteristic::On, CharacteristicValue::Bool(on));
                }
            },
            PropertyKey::BatteryLevel => {
                if let Some(level) = value.as_i64() {
                    push(
                        ServiceId::Battery,
                        Characteristic::BatteryLevel,
                        service::battery_level(level),
                    );
                    push(
                        ServiceId::Battery,
                        Characteristic::StatusLowBattery,
                        service::low_battery(level, options.low_battery_threshold),
                    );
                }
            },
            PropertyKey::WorkStatus => {
                if let Some(status) = value.as_str() {
                    push(
                        ServiceId::Battery,
                        Characteristic::ChargingState,
                        service::charging_state(&WorkStatus::from_wire(status)),
                    );
                }
            },
            PropertyKey::ErrorCode => {
                if let Some(code) = value.as_str() {
                    push(
                        ServiceId::ErrorSensor,
                        Characteristic::MotionDetected,
                        service::error_detected(&ErrorCode::from_wire(code)),
                    );
                }
            },
            _ => {},
        }
    }

    updates
}

fn publish_updates(
    name: &str,
    callback: &RwLock<Option<UpdateCallback>>,
    updates: Vec<CharacteristicUpdate>,
) {
    for update in &updates {
        debug!(
            accessory = %name,
            service = ?update.service,
            characteristic = %update.characteristic,
            value = %update.value,
            "updating characteristic"
        );
    }

    if !updates.is_empty() {
        let callback = callback.read().clone();
        if let Some(callback) = callback {
            callback(&updates);
        }
    }

    info!(
        "New data from {} received - updated {} characteristics.",
        name,
        updates.len()
    );
}

fn build_services(options: &AccessoryOptions) -> Vec<ServiceDescriptor> {
    let mut services = vec![
        ServiceDescriptor {
            id: ServiceId::Information,
            service_type: ServiceType::AccessoryInformation,
            name: options.name.clone(),
            characteristics: vec![
                Characteristic::Identify,
                Characteristic::Manufacturer,
                Characteristic::Model,
                Characteristic::Name,
                Characteristic::SerialNumber,
                Characteristic::FirmwareRevision,
            ],
        },
        ServiceDescriptor {
            id: ServiceId::Vacuum,
            service_type: if options.use_switch_service {
                ServiceType::Switch
            } else {
                ServiceType::Fan
            },
            name: "Vacuum".to_string(),
            characteristics: vec![Characteristic::On],
        },
        ServiceDescriptor {
            id: ServiceId::Battery,
            service_type: ServiceType::Battery,
            name: "Battery".to_string(),
            characteristics: vec![
                Characteristic::BatteryLevel,
                Characteristic::ChargingState,
                Characteristic::StatusLowBattery,
            ],
        },
    ];

    if !options.hide_find_button {
        services.push(ServiceDescriptor {
            id: ServiceId::FindRobot,
            service_type: ServiceType::Switch,
            name: format!("Find {}", options.name),
            characteristics: vec![Characteristic::On],
        });
    }

    if !options.hide_error_sensor {
        services.push(ServiceDescriptor {
            id: ServiceId::ErrorSensor,
            service_type: ServiceType::MotionSensor,
            name: format!("{} Error", options.name),
            characteristics: vec![Characteristic::MotionDetected],
        });
    }

    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PropertyValue, RoboVacOptions};
    use crate::transport::SimulatedTransport;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn options() -> AccessoryOptions {
        AccessoryOptions {
            name: "RoboVac".to_string(),
            use_switch_service: false,
            hide_find_button: false,
            hide_error_sensor: false,
            low_battery_threshold: 30,
        }
    }

    fn accessory(transport: &SimulatedTransport, options: AccessoryOptions) -> RoboVacAccessory {
        let mut device = RoboVacOptions::new("vac-1", "secret");
        device.device_ip = Some("10.0.0.7".to_string());
        RoboVacAccessory::new(RoboVac::new(device, Arc::new(transport.clone())), options)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_service_layout_honours_options() {
        let all = build_services(&options());
        assert_eq!(all.len(), 5);
        assert_eq!(all[1].service_type, ServiceType::Fan);

        let trimmed = build_services(&AccessoryOptions {
            use_switch_service: true,
            hide_find_button: true,
            hide_error_sensor: true,
            ..options()
        });
        let ids: Vec<_> = trimmed.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![ServiceId::Information, ServiceId::Vacuum, ServiceId::Battery]);
        assert_eq!(trimmed[1].service_type, ServiceType::Switch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_information_needs_no_device() {
        let transport = SimulatedTransport::new("vac-1");
        let acc = accessory(&transport, options());

        let serial = acc
            .handle_get(ServiceId::Information, Characteristic::SerialNumber)
            .await
            .unwrap();
        assert_eq!(serial, CharacteristicValue::Text("vac-1".into()));
        assert_eq!(transport.open_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gets_map_device_state() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(20));
        transport.set_device_state(
            &PartialState::new()
                .with(PropertyKey::BatteryLevel, 20)
                .with(PropertyKey::WorkStatus, WorkStatus::Charging)
                .with(PropertyKey::ErrorCode, ErrorCode::SideBrushStuck.as_str()),
        );
        let acc = accessory(&transport, options());

        let get = |c| acc.handle_get(ServiceId::Battery, c);
        assert_eq!(get(Characteristic::BatteryLevel).await, Ok(CharacteristicValue::UInt8(20)));
        assert_eq!(
            get(Characteristic::StatusLowBattery).await,
            Ok(CharacteristicValue::UInt8(service::BATTERY_LEVEL_LOW))
        );
        assert_eq!(
            get(Characteristic::ChargingState).await,
            Ok(CharacteristicValue::UInt8(service::CHARGING))
        );
        assert_eq!(
            acc.handle_get(ServiceId::ErrorSensor, Characteristic::MotionDetected).await,
            Ok(CharacteristicValue::Bool(true))
        );
        assert_eq!(
            acc.handle_get(ServiceId::Vacuum, Characteristic::On).await,
            Ok(CharacteristicValue::Bool(false))
        );
        assert_eq!(transport.fetch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_status_reads_as_not_charging() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(20));
        transport.set_device_state(&PartialState::new().with(PropertyKey::WorkStatus, "Paused"));
        let acc = accessory(&transport, options());

        assert_eq!(
            acc.handle_get(ServiceId::Battery, Characteristic::ChargingState).await,
            Ok(CharacteristicValue::UInt8(service::NOT_CHARGING))
        );

        let updates = acc.characteristic_updates(
            &PartialState::new().with(PropertyKey::WorkStatus, "Docking"),
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].value, CharacteristicValue::UInt8(service::NOT_CHARGING));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_services_are_absent() {
        let transport = SimulatedTransport::new("vac-1");
        let acc = accessory(
            &transport,
            AccessoryOptions {
                hide_find_button: true,
                ..options()
            },
        );

        assert_eq!(
            acc.handle_set(ServiceId::FindRobot, Characteristic::On, CharacteristicValue::Bool(true))
                .await,
            Err(HapStatusError::ResourceDoesNotExist)
        );
        assert_eq!(transport.write_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_off_maps_to_run_and_go_home() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(20));
        let acc = accessory(&transport, options());

        acc.handle_set(ServiceId::Vacuum, Characteristic::On, CharacteristicValue::Bool(true))
            .await
            .unwrap();
        assert_eq!(
            transport.device_state().get(PropertyKey::Running),
            &PropertyValue::Bool(true)
        );

        acc.handle_set(ServiceId::Vacuum, Characteristic::On, CharacteristicValue::Bool(false))
            .await
            .unwrap();
        let device = transport.device_state();
        assert_eq!(device.get(PropertyKey::GoHome), &PropertyValue::Bool(true));
        assert_eq!(device.get(PropertyKey::Running), &PropertyValue::Bool(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_only_characteristics_reject_writes() {
        let acc = accessory(&SimulatedTransport::new("vac-1"), options());
        assert_eq!(
            acc.handle_set(ServiceId::Battery, Characteristic::BatteryLevel, CharacteristicValue::UInt8(5))
                .await,
            Err(HapStatusError::ReadOnlyCharacteristic)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_device_is_communication_failure() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_secs(4));
        let acc = accessory(&transport, options());

        assert_eq!(
            acc.handle_get(ServiceId::Vacuum, Characteristic::On).await,
            Err(HapStatusError::ServiceCommunicationFailure)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_failure_is_communication_failure() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(20));
        transport.fail_next_open(1);
        let acc = accessory(&transport, options());

        assert_eq!(
            acc.handle_get(ServiceId::Battery, Characteristic::BatteryLevel).await,
            Err(HapStatusError::ServiceCommunicationFailure)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_becomes_characteristic_updates() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(20));
        let acc = accessory(&transport, options());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        acc.set_update_callback(Arc::new(move |updates: &[CharacteristicUpdate]| {
            sink.lock().extend_from_slice(updates);
        }));

        acc.device().ensure_connected().await.unwrap();
        assert!(transport.push(
            PartialState::new()
                .with(PropertyKey::Running, true)
                .with(PropertyKey::BatteryLevel, 12)
                .with(PropertyKey::CleanSpeed, "Max"),
        ));
        settle().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen.contains(&CharacteristicUpdate {
            service: ServiceId::Vacuum,
            characteristic: Characteristic::On,
            value: CharacteristicValue::Bool(true),
        }));
        assert!(seen.contains(&CharacteristicUpdate {
            service: ServiceId::Battery,
            characteristic: Characteristic::StatusLowBattery,
            value: CharacteristicValue::UInt8(service::BATTERY_LEVEL_LOW),
        }));
    }

    #[test]
    fn test_hidden_error_sensor_gets_no_updates() {
        let acc = accessory(
            &SimulatedTransport::new("vac-1"),
            AccessoryOptions {
                hide_error_sensor: true,
                ..options()
            },
        );

        let updates =
            acc.characteristic_updates(&PartialState::new().with(PropertyKey::ErrorCode, "Fan_stuck"));
        assert!(updates.is_empty());
    }
}
