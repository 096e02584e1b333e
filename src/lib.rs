// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `miot_sync` - keeps home-automation capabilities in sync with Wi-Fi
//! appliances that speak a property-oriented RPC protocol.
//!
//! Each appliance exposes numbered properties (`siid`/`piid`) and actions
//! (`siid`/`aiid`). This library reads them in batches, turns the readings
//! into typed capability values and writes user intents back.
//!
//! # Features
//!
//! - **Batched reads**: bounded chunks with per-chunk retry and partial results
//! - **Availability**: connection state, reconnect with a fixed delay, fail-fast writes
//! - **Reconciliation**: value mapping, change detection, edge-triggered events
//! - **Derived state**: daily counters, consumable lifetimes, duration units
//! - **Dispatch**: validated writes, actions, settings sync without echo loops
//! - **Model catalog**: built-in tables for common appliance families
//!
//! # Quick Start
//!
//! ```no_run
//! use miot_sync::{Device, DeviceConfig};
//! use miot_sync::protocol::mock::{MockConnector, MockTransport};
//!
//! #[tokio::main]
//! async fn main() -> miot_sync::Result<()> {
//!     // A real host supplies its own `Connector` for the wire protocol
//!     let connector = MockConnector::new(MockTransport::new());
//!     let config = DeviceConfig::new("192.168.1.40", "token", "miot.airp.v1");
//!
//!     let device = Device::builder(config, connector).build()?;
//!     let mut events = device.subscribe();
//!     device.start();
//!
//!     device.dispatch("mode", "sleep".into()).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Several devices
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use miot_sync::{DeviceConfig, DeviceManager};
//! use miot_sync::protocol::mock::{MockConnector, MockTransport};
//! use miot_sync::state::JsonFileStore;
//!
//! # async fn example() -> miot_sync::Result<()> {
//! let manager = DeviceManager::new(MockConnector::new(MockTransport::new()))
//!     .with_persistence(Arc::new(JsonFileStore::new("/var/lib/miot")));
//!
//! let feeder = manager.add_device(DeviceConfig::new("192.168.1.41", "token", "miot.feeder.v2")).await?;
//! manager.dispatch_action(feeder, "feed", vec![2.into()]).await?;
//! # Ok(())
//! # }
//! ```

mod device;
pub mod error;
pub mod event;
pub mod manager;
pub mod model;
pub mod protocol;
pub mod state;
pub mod sync;
pub mod types;

pub use device::{Clock, Device, DeviceBuilder, PollReport, ProbeReport};
pub use error::{Error, ProtocolError, Result, TransportError, ValueError};
pub use event::{DeviceEvent, DeviceId, EventBus, TriggerSink};
pub use manager::{DeviceConfig, DeviceManager, ReconnectionPolicy};
pub use model::{ActionSpec, DeviceCategory, ModelTable, PropertySpec};
pub use protocol::{CallOptions, Connector, Endpoint, Transport};
pub use state::{CapabilityStore, CapabilityUpdate, DerivedRecord, DerivedStateStore, SettingsStore};
pub use types::{ActionAddress, CapabilityValue, DayKey, PropertyAddress, ValueKind};
