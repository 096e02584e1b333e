// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device configuration and multi-device management.
//!
//! [`DeviceConfig`] describes one appliance: endpoint, model, poll interval
//! and the read and reconnection policies. It can be built in code or from
//! the host's settings map.
//!
//! The [`DeviceManager`] owns any number of [`Device`](crate::Device)s that
//! share a connector and an event bus:
//!
//! - **Centralized device management**: add, remove and look up devices
//! - **Event system**: one broadcast subscription for every device
//! - **Shared persistence**: derived state of all devices in one store
//!
//! # Examples
//!
//! ## Configuration from host settings
//!
//! ```
//! use miot_sync::manager::DeviceConfig;
//! use serde_json::json;
//!
//! let settings = json!({"address": "192.168.1.40", "token": "ffee", "polling": 20});
//! let config = DeviceConfig::from_settings(settings.as_object().unwrap(), "miot.fan.v1").unwrap();
//!
//! assert_eq!(config.endpoint.address(), "192.168.1.40");
//! assert_eq!(config.poll_interval.as_secs(), 20);
//! ```
//!
//! ## Event subscription
//!
//! ```no_run
//! use miot_sync::event::DeviceEvent;
//! use miot_sync::manager::DeviceManager;
//! use miot_sync::protocol::mock::{MockConnector, MockTransport};
//!
//! # fn example() {
//! let manager = DeviceManager::new(MockConnector::new(MockTransport::new()));
//! let mut events = manager.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             DeviceEvent::CapabilityChanged { device_id, update } => {
//!                 println!("{device_id}: {} = {:?}", update.name, update.value);
//!             }
//!             DeviceEvent::ConnectionChanged { device_id, connected, .. } => {
//!                 println!("{device_id} available: {connected}");
//!             }
//!             _ => {}
//!         }
//!     }
//! });
//! # }
//! ```

mod device_config;
mod device_manager;

pub use device_config::{
    ADDRESS_KEY, CONNECTION_KEYS, DEFAULT_POLL_INTERVAL, DeviceConfig, POLLING_KEY, ReconnectionPolicy,
    TOKEN_KEY,
};
pub use device_manager::DeviceManager;
