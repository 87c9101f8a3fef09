//! Push updates and the per-session event listener

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

use super::robovac::RoboVac;
use super::state::PartialState;
use crate::transport::TransportEvent;

impl RoboVac {
    /// Merge an unsolicited update into the cache
    ///
    /// Only the keys present in `partial` change. Subscribers are notified
    /// after the merge is visible.
    pub fn on_push_event(&self, partial: PartialState) {
        self.apply_push(partial, None);
    }

    /// Merge a push, but only while the session with `epoch` is still live
    ///
    /// The epoch is checked under the same lock as teardown, so a push from a
    /// session that has just been closed never revalidates the cache.
    fn apply_push(&self, partial: PartialState, epoch: Option<u64>) {
        if partial.is_empty() {
            return;
        }

        {
            let core = self.core.lock();
            if let Some(epoch) = epoch {
                if core.session.as_ref().map(|s| s.epoch) != Some(epoch) {
                    debug!(device = %self.name, epoch, "Dropping push from closed session");
                    return;
                }
            }
            self.cache.merge(&partial, Instant::now());
        }
        debug!(device = %self.name, "Received data from device:\n{}", partial.format_status());

        let callbacks = self.push_callbacks.read().clone();
        for callback in callbacks {
            callback(&partial);
        }
    }

    /// Drain the event channel of the session opened with `epoch`
    pub(super) fn spawn_event_listener(
        &self,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        epoch: u64,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut stream = UnboundedReceiverStream::new(events);

            while let Some(event) = stream.next().await {
                if !this.is_current_epoch(epoch) {
                    debug!(device = %this.name, epoch, "Dropping event from closed session");
                    break;
                }

                match event {
                    TransportEvent::Connected => {
                        info!(device = %this.name, "Device session established");
                    },
                    TransportEvent::Disconnected => {
                        info!(device = %this.name, "Device closed the session");
                        this.disconnect_session(Some(epoch)).await;
                        break;
                    },
                    TransportEvent::Error(detail) => {
                        error!(device = %this.name, error = %detail, "Transport reported an error");
                        this.disconnect_session(Some(epoch)).await;
                        break;
                    },
                    TransportEvent::PushUpdate(partial) => this.apply_push(partial, Some(epoch)),
                }
            }

            debug!(device = %this.name, epoch, "Event listener stopped");
        });
    }

    fn is_current_epoch(&self, epoch: u64) -> bool {
        self.core.lock().session.as_ref().map(|s| s.epoch) == Some(epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PropertyKey, PropertyValue, RoboVacOptions, SessionState};
    use crate::transport::SimulatedTransport;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn device(transport: &SimulatedTransport) -> RoboVac {
        let mut options = RoboVacOptions::new("vac-1", "secret");
        options.device_ip = Some("10.0.0.7".to_string());
        RoboVac::new(options, Arc::new(transport.clone()))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_updates_only_mentioned_keys() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::from_millis(10));
        transport.set_device_state(&PartialState::new().with(PropertyKey::BatteryLevel, 80));
        let vac = device(&transport);
        vac.read_fresh(Duration::from_secs(15)).await.unwrap();

        assert!(transport.push(PartialState::new().with(PropertyKey::Running, true)));
        settle().await;

        let snapshot = vac.read_cached();
        assert_eq!(snapshot.get(PropertyKey::Running), Some(&PropertyValue::Bool(true)));
        assert_eq!(snapshot.get(PropertyKey::BatteryLevel), Some(&PropertyValue::Integer(80)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_revalidates_invalid_cache() {
        let vac = device(&SimulatedTransport::new("vac-1"));
        assert!(!vac.read_cached().is_valid());

        vac.on_push_event(PartialState::new().with(PropertyKey::BatteryLevel, 33));

        let snapshot = vac.read_cached();
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.get(PropertyKey::BatteryLevel), Some(&PropertyValue::Integer(33)));
        // Keys never confirmed keep the cache from counting as fresh
        assert!(!snapshot.is_fresh(Duration::from_secs(15), Instant::now()));
    }

    #[tokio::test]
    async fn test_subscribers_see_merged_update() {
        let vac = device(&SimulatedTransport::new("vac-1"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reader = vac.clone();
        vac.subscribe_push(Arc::new(move |partial: &PartialState| {
            let cached = reader.read_cached().get(PropertyKey::GoHome).cloned();
            sink.lock().push((partial.len(), cached));
        }));

        vac.on_push_event(PartialState::new().with(PropertyKey::GoHome, true));
        vac.on_push_event(PartialState::new());

        assert_eq!(*seen.lock(), vec![(1, Some(PropertyValue::Bool(true)))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_drop_marks_disconnected() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let vac = device(&transport);
        vac.ensure_connected().await.unwrap();

        transport.drop_connection();
        settle().await;

        assert_eq!(vac.session_state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_from_old_session_are_ignored() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let vac = device(&transport);

        vac.ensure_connected().await.unwrap();
        vac.disconnect().await;
        vac.ensure_connected().await.unwrap();
        settle().await;

        // The first session's Disconnected event must not tear down the second
        assert_eq!(vac.session_state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_from_closed_session_does_not_revalidate() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let vac = device(&transport);
        vac.read_fresh(Duration::ZERO).await.unwrap();
        let (_, epoch) = vac.current_session().unwrap();

        vac.disconnect().await;
        vac.apply_push(PartialState::new().with(PropertyKey::BatteryLevel, 12), Some(epoch));

        let snapshot = vac.read_cached();
        assert!(!snapshot.is_valid());
        assert_ne!(snapshot.state().get(PropertyKey::BatteryLevel), &PropertyValue::Integer(12));

        vac.ensure_connected().await.unwrap();
        let (_, live) = vac.current_session().unwrap();
        vac.apply_push(PartialState::new().with(PropertyKey::BatteryLevel, 12), Some(live));
        assert_eq!(vac.read_cached().get(PropertyKey::BatteryLevel), Some(&PropertyValue::Integer(12)));
    }

    fn arb_partial() -> impl Strategy<Value = PartialState> {
        let entry = prop_oneof![
            any::<bool>().prop_map(|b| (PropertyKey::Running, PropertyValue::Bool(b))),
            any::<bool>().prop_map(|b| (PropertyKey::GoHome, PropertyValue::Bool(b))),
            any::<bool>().prop_map(|b| (PropertyKey::FindRobot, PropertyValue::Bool(b))),
            (0i64..=100).prop_map(|n| (PropertyKey::BatteryLevel, PropertyValue::Integer(n))),
        ];
        prop::collection::vec(entry, 0..4).prop_map(|entries| {
            let mut partial = PartialState::new();
            for (key, value) in entries {
                partial.insert(key, value);
            }
            partial
        })
    }

    proptest! {
        #[test]
        fn prop_push_touches_only_its_keys(partial in arb_partial()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let vac = device(&SimulatedTransport::new("vac-1"));
                let before = vac.read_cached().state().clone();

                vac.on_push_event(partial.clone());
                let after = vac.read_cached().state().clone();

                for key in PropertyKey::ALL {
                    match partial.get(key) {
                        Some(value) => prop_assert_eq!(after.get(key), value),
                        None => prop_assert_eq!(after.get(key), before.get(key)),
                    }
                }
                Ok(())
            })?;
        }
    }
}
