// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end sync tests against the simulated appliance.

#![cfg(feature = "mock")]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;

use miot_sync::protocol::mock::{MockConnector, MockTransport};
use miot_sync::protocol::{GET_PROPERTIES, SET_PROPERTIES};
use miot_sync::state::{DerivedStateStore, MemoryDerivedStore, MemorySettingsStore, SettingsStore};
use miot_sync::{CapabilityValue, Device, DeviceConfig, DeviceEvent, Error, PropertyAddress};

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn drain(events: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

fn settings_map(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

fn device(model: &str, appliance: &MockTransport) -> (Device<MockConnector>, MockConnector) {
    let connector = MockConnector::new(appliance.clone());
    let config = DeviceConfig::new("10.0.0.20", "token", model);
    let device = Device::builder(config, connector.clone()).build().unwrap();
    (device, connector)
}

// ============================================================================
// Reconciliation
// ============================================================================

mod reconciliation {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn mode_change_fires_one_trigger() {
        let appliance = MockTransport::new();
        appliance.set_property(PropertyAddress::new(2, 2), json!(2));
        let (device, _) = device("miot.fountain.v1", &appliance);
        let mut events = device.subscribe();
        device.connection().connect_now().await.unwrap();

        device.poll_now().await.unwrap();
        device.poll_now().await.unwrap();
        appliance.set_property(PropertyAddress::new(2, 2), json!(0));
        let report = device.poll_now().await.unwrap().unwrap();

        assert_eq!(report.triggered, 1);
        assert_eq!(device.capability("mode"), Some("continuous".into()));
        let triggers: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::Triggered { trigger_id, payload, .. } => Some((trigger_id, payload)),
                _ => None,
            })
            .collect();
        assert_eq!(
            triggers,
            vec![("mode_changed".to_string(), json!({"previous": 2, "new": 0}))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_values_publish_nothing() {
        let appliance = MockTransport::new();
        appliance.set_property(PropertyAddress::new(2, 1), json!(true));
        let (device, _) = device("miot.humidifier.v1", &appliance);
        device.connection().connect_now().await.unwrap();

        let first = device.poll_now().await.unwrap().unwrap();
        let second = device.poll_now().await.unwrap().unwrap();

        assert_eq!(first.updated, 1);
        assert_eq!(second.updated, 0);
    }
}

// ============================================================================
// Availability
// ============================================================================

mod availability {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn failed_read_reconnects_after_delay() {
        let appliance = MockTransport::new();
        appliance.set_property(PropertyAddress::new(2, 1), json!(true));
        let (device, connector) = device("miot.humidifier.v1", &appliance);
        let mut events = device.subscribe();
        device.connection().connect_now().await.unwrap();

        // One chunk, attempted twice.
        appliance.fail_next(2);
        let result = device.poll_now().await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!device.is_available());
        assert!(device.connection().reconnect_pending());
        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            DeviceEvent::ConnectionChanged { connected: false, .. }
        )));

        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;
        assert_eq!(connector.connects(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(connector.connects(), 2);
        assert!(device.state().is_connected());
        // A handshake alone does not restore availability.
        assert!(!device.is_available());

        device.poll_now().await.unwrap();
        assert!(device.is_available());
        assert!(drain(&mut events).contains(&DeviceEvent::available(device.id())));
    }

    #[tokio::test(start_paused = true)]
    async fn property_error_keeps_device_available() {
        let appliance = MockTransport::new();
        appliance.set_property(PropertyAddress::new(2, 1), json!(true));
        appliance.set_property(PropertyAddress::new(3, 1), json!(40));
        let (device, _) = device("miot.humidifier.v1", &appliance);
        device.connection().connect_now().await.unwrap();
        device.poll_now().await.unwrap();

        appliance.set_code(PropertyAddress::new(3, 1), -4004);
        appliance.set_property(PropertyAddress::new(2, 1), json!(false));
        let report = device.poll_now().await.unwrap().unwrap();

        assert_eq!(report.failed_chunks, 0);
        assert!(device.is_available());
        assert_eq!(device.capability("power"), Some(false.into()));
        assert_eq!(device.capability("humidity"), Some(CapabilityValue::Number(40.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn running_device_recovers_from_outage() {
        let appliance = MockTransport::new();
        appliance.set_property(PropertyAddress::new(2, 1), json!(true));
        let (device, connector) = device("miot.humidifier.v1", &appliance);
        device.start();
        settle().await;
        assert!(device.state().is_connected());

        appliance.fail_always(true);
        tokio::time::advance(Duration::from_secs(31)).await;
        settle().await;
        assert!(!device.is_available());
        assert!(device.state().is_failed());

        appliance.fail_always(false);
        appliance.clear_calls();
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(connector.connects(), 2);
        assert!(device.is_available());
        assert!(appliance.call_count(GET_PROPERTIES) >= 1);
        device.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn write_while_disconnected_fails_fast() {
        let appliance = MockTransport::new();
        let (device, connector) = device("miot.humidifier.v1", &appliance);

        let result = device.dispatch("power", true.into()).await;

        assert!(matches!(result, Err(Error::NotReady(_))));
        assert_eq!(appliance.call_count(SET_PROPERTIES), 0);
        settle().await;
        assert_eq!(connector.connects(), 1);
    }
}

// ============================================================================
// Derived State
// ============================================================================

mod derived_state {
    use super::*;

    fn clocked(
        model: &str,
        appliance: &MockTransport,
        now: &Arc<Mutex<DateTime<Utc>>>,
        persistence: Arc<MemoryDerivedStore>,
    ) -> Device<MockConnector> {
        let now = Arc::clone(now);
        Device::builder(
            DeviceConfig::new("10.0.0.21", "token", model),
            MockConnector::new(appliance.clone()),
        )
        .with_persistence(persistence)
        .with_clock(move || *now.lock())
        .build()
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn daily_counter_resets_on_new_day() {
        let appliance = MockTransport::new();
        let now = Arc::new(Mutex::new(at(1, 20)));
        let persistence = Arc::new(MemoryDerivedStore::new());
        let device = clocked("miot.feeder.v2", &appliance, &now, persistence.clone());
        device.connection().connect_now().await.unwrap();

        appliance.set_property(PropertyAddress::new(2, 10), json!(120));
        device.poll_now().await.unwrap();
        assert_eq!(device.capability("food_today"), Some(CapabilityValue::Number(120.0)));

        *now.lock() = at(2, 8);
        appliance.set_property(PropertyAddress::new(2, 10), json!(5));
        device.poll_now().await.unwrap();

        assert_eq!(device.capability("food_today"), Some(CapabilityValue::Number(5.0)));
        let saved = persistence.load(device.id()).unwrap().unwrap();
        assert_eq!(saved.accumulated, 5.0);
        assert_eq!(saved, device.derived_record().await);
    }

    #[tokio::test(start_paused = true)]
    async fn dispensing_decreases_are_credited_on_completion() {
        let appliance = MockTransport::new();
        let now = Arc::new(Mutex::new(at(1, 8)));
        let device = clocked("miot.feeder.v1", &appliance, &now, Arc::new(MemoryDerivedStore::new()));
        device.connection().connect_now().await.unwrap();

        let bowl = PropertyAddress::new(2, 6);
        let progress = PropertyAddress::new(2, 8);
        for (weight, percent) in [(300, 100), (290, 40), (285, 80)] {
            appliance.set_property(bowl, json!(weight));
            appliance.set_property(progress, json!(percent));
            device.poll_now().await.unwrap();
        }
        assert_eq!(device.capability("food_today"), Some(CapabilityValue::Number(0.0)));
        assert_eq!(device.derived_record().await.pending_delta, 15.0);

        appliance.set_property(bowl, json!(284));
        appliance.set_property(progress, json!(100));
        device.poll_now().await.unwrap();

        assert_eq!(device.capability("food_today"), Some(CapabilityValue::Number(16.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn consumable_days_follow_percent() {
        let appliance = MockTransport::new();
        appliance.set_property(PropertyAddress::new(4, 1), json!(50));
        let (device, _) = device("miot.airp.v1", &appliance);
        device.connection().connect_now().await.unwrap();

        device.poll_now().await.unwrap();

        assert_eq!(device.capability("filter_life"), Some(CapabilityValue::Number(50.0)));
        assert_eq!(device.capability("filter_days"), Some(CapabilityValue::Number(90.0)));
    }
}

// ============================================================================
// Settings
// ============================================================================

mod host_settings {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn device_values_are_not_echoed_back() {
        let appliance = MockTransport::new();
        appliance.set_property(PropertyAddress::new(6, 1), json!(true));
        let settings = Arc::new(MemorySettingsStore::new());
        let device = Device::builder(
            DeviceConfig::new("10.0.0.22", "token", "miot.humidifier.v1"),
            MockConnector::new(appliance.clone()),
        )
        .with_settings_store(settings.clone())
        .build()
        .unwrap();
        device.connection().connect_now().await.unwrap();

        let report = device.poll_now().await.unwrap().unwrap();
        assert_eq!(report.settings_patched, 1);
        assert_eq!(settings.get("child_lock"), Some(json!(true)));

        device.on_settings_changed(&["child_lock".to_string()]).await.unwrap();
        assert_eq!(appliance.call_count(SET_PROPERTIES), 0);

        settings.patch(settings_map(&[("child_lock", json!(false))])).unwrap();
        device.on_settings_changed(&["child_lock".to_string()]).await.unwrap();
        assert_eq!(appliance.call_count(SET_PROPERTIES), 1);
        assert_eq!(appliance.property(PropertyAddress::new(6, 1)), Some(json!(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn address_change_reconnects() {
        let appliance = MockTransport::new();
        let settings = Arc::new(MemorySettingsStore::new());
        let connector = MockConnector::new(appliance);
        let device = Device::builder(DeviceConfig::new("10.0.0.23", "token", "miot.fan.v1"), connector.clone())
            .with_settings_store(settings.clone())
            .build()
            .unwrap();
        device.connection().connect_now().await.unwrap();

        settings.patch(settings_map(&[("address", json!("10.0.0.99"))])).unwrap();
        device.on_settings_changed(&["address".to_string()]).await.unwrap();
        settle().await;

        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.endpoints().last().map(|e| e.address().to_string()), Some("10.0.0.99".to_string()));
        assert_eq!(device.config().endpoint.address(), "10.0.0.99");
        assert!(device.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_polling_is_rejected() {
        let appliance = MockTransport::new();
        let (device, _) = device("miot.fan.v1", &appliance);

        let result = device.reconfigure(&settings_map(&[("polling", json!("soon"))]));

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(device.config().poll_interval, Duration::from_secs(30));
    }
}
