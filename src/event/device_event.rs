// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DeviceId;
use crate::state::CapabilityUpdate;

/// Events emitted by devices and the device manager.
///
/// # Examples
///
/// ```
/// use miot_sync::event::{DeviceEvent, DeviceId};
///
/// let device_id = DeviceId::new();
/// let lost = DeviceEvent::unavailable(device_id, "request timed out after 5000 ms");
/// assert!(lost.is_connection());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// A device was added to the manager.
    DeviceAdded {
        /// The ID of the added device.
        device_id: DeviceId,
    },

    /// A device was removed from the manager.
    DeviceRemoved {
        /// The ID of the removed device.
        device_id: DeviceId,
    },

    /// Availability changed.
    ConnectionChanged {
        /// The ID of the device.
        device_id: DeviceId,
        /// Whether the device is now available.
        connected: bool,
        /// Readable reason when the device became unavailable.
        error: Option<String>,
    },

    /// A capability took a new value.
    CapabilityChanged {
        /// The ID of the device.
        device_id: DeviceId,
        /// The applied update.
        update: CapabilityUpdate,
    },

    /// An edge-triggered property changed between two polls.
    Triggered {
        /// The ID of the device.
        device_id: DeviceId,
        /// The trigger that fired.
        trigger_id: String,
        /// `{"previous": .., "new": ..}`.
        payload: Value,
    },
}

impl DeviceEvent {
    /// Returns the device ID associated with this event.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        match self {
            Self::DeviceAdded { device_id }
            | Self::DeviceRemoved { device_id }
            | Self::ConnectionChanged { device_id, .. }
            | Self::CapabilityChanged { device_id, .. }
            | Self::Triggered { device_id, .. } => *device_id,
        }
    }

    /// Returns `true` for added/removed events.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::DeviceAdded { .. } | Self::DeviceRemoved { .. })
    }

    /// Returns `true` for availability events.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::ConnectionChanged { .. })
    }

    /// Creates an available event.
    #[must_use]
    pub fn available(device_id: DeviceId) -> Self {
        Self::ConnectionChanged {
            device_id,
            connected: true,
            error: None,
        }
    }

    /// Creates an unavailable event with a reason.
    #[must_use]
    pub fn unavailable(device_id: DeviceId, reason: impl Into<String>) -> Self {
        Self::ConnectionChanged {
            device_id,
            connected: false,
            error: Some(reason.into()),
        }
    }
}
