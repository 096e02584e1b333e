// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for broadcasting device events.

use serde_json::Value;
use tokio::sync::broadcast;

use super::{DeviceEvent, DeviceId, TriggerSink};
use crate::error::Result;

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcasts device events to any number of subscribers.
///
/// A slow subscriber that falls more than the capacity behind loses the
/// oldest events and sees `RecvError::Lagged`.
///
/// The bus also serves as the default [`TriggerSink`]: fired triggers are
/// published as [`DeviceEvent::Triggered`].
///
/// # Examples
///
/// ```
/// use miot_sync::event::{DeviceEvent, DeviceId, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(DeviceEvent::DeviceAdded {
///     device_id: DeviceId::new(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus buffering up to `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event. Without subscribers the event is dropped.
    pub fn publish(&self, event: DeviceEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSink for EventBus {
    fn fire(&self, device_id: DeviceId, trigger_id: &str, payload: Value) -> Result<()> {
        self.publish(DeviceEvent::Triggered {
            device_id,
            trigger_id: trigger_id.to_string(),
            payload,
        });
        Ok(())
    }
}
