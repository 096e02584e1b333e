// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system for device state changes.
//!
//! Devices publish availability changes, capability changes and fired
//! triggers on an [`EventBus`], a tokio broadcast channel that any number
//! of subscribers can listen to.
//!
//! # Examples
//!
//! ```
//! use miot_sync::event::{DeviceEvent, DeviceId, EventBus};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! let device_id = DeviceId::new();
//! bus.publish(DeviceEvent::DeviceAdded { device_id });
//! ```

mod device_event;
mod device_id;
mod event_bus;

pub use device_event::DeviceEvent;
pub use device_id::DeviceId;
pub use event_bus::EventBus;

use serde_json::Value;

use crate::error::Result;

/// Receives fired triggers.
///
/// Firing is fire-and-forget: the engine logs a returned error and moves on.
pub trait TriggerSink: Send + Sync {
    /// Fires `trigger_id` for `device_id` with `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host could not accept the trigger.
    fn fire(&self, device_id: DeviceId, trigger_id: &str, payload: Value) -> Result<()>;
}
