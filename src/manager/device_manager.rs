// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device manager for coordinating multiple appliances.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use crate::device::{Device, DeviceBuilder};
use crate::error::{Error, Result};
use crate::event::{DeviceEvent, DeviceId, EventBus};
use crate::protocol::Connector;
use crate::state::DerivedStateStore;
use crate::sync::Ack;
use crate::types::CapabilityValue;

use super::device_config::DeviceConfig;

/// Manager for coordinating multiple appliances.
///
/// All devices share the manager's connector and event bus, so one
/// subscription sees the events of every device.
///
/// # Examples
///
/// ```no_run
/// use miot_sync::manager::{DeviceConfig, DeviceManager};
/// use miot_sync::protocol::mock::{MockConnector, MockTransport};
///
/// # async fn example() -> miot_sync::Result<()> {
/// let manager = DeviceManager::new(MockConnector::new(MockTransport::new()));
///
/// let mut events = manager.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = events.recv().await {
///         println!("Event: {event:?}");
///     }
/// });
///
/// let config = DeviceConfig::new("192.168.1.40", "token", "miot.airp.v1");
/// let device_id = manager.add_device(config).await?;
/// manager.dispatch(device_id, "power", true.into()).await?;
/// # Ok(())
/// # }
/// ```
pub struct DeviceManager<C: Connector> {
    /// Managed devices, keyed by device ID.
    devices: Arc<RwLock<HashMap<DeviceId, Device<C>>>>,
    /// Shared by every device.
    connector: Arc<C>,
    /// Event bus for broadcasting device events.
    event_bus: EventBus,
    /// Where devices persist derived state.
    persistence: Option<Arc<dyn DerivedStateStore>>,
}

impl<C: Connector> std::fmt::Debug for DeviceManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("event_bus", &self.event_bus)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> DeviceManager<C> {
    /// Creates a manager connecting devices through `connector`.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self::with_event_bus(connector, EventBus::new())
    }

    /// Creates a manager with a custom event bus capacity.
    #[must_use]
    pub fn with_capacity(connector: C, event_capacity: usize) -> Self {
        Self::with_event_bus(connector, EventBus::with_capacity(event_capacity))
    }

    fn with_event_bus(connector: C, event_bus: EventBus) -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            connector: Arc::new(connector),
            event_bus,
            persistence: None,
        }
    }

    /// Persists derived state of every device in `store`.
    #[must_use]
    pub fn with_persistence(mut self, store: Arc<dyn DerivedStateStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribes to the events of every managed device.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_bus.subscribe()
    }

    /// Returns the number of active event subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.event_bus.subscriber_count()
    }

    // =========================================================================
    // Device Management
    // =========================================================================

    /// Adds and starts a device with default stores.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the model is unknown.
    pub async fn add_device(&self, config: DeviceConfig) -> Result<DeviceId> {
        self.add_device_with(config, |builder| builder).await
    }

    /// Adds and starts a device, letting `configure` customize its builder.
    ///
    /// The manager's event bus and persistence are applied before
    /// `configure` runs.
    ///
    /// # Errors
    ///
    /// Returns the builder's error.
    pub async fn add_device_with<F>(&self, config: DeviceConfig, configure: F) -> Result<DeviceId>
    where
        F: FnOnce(DeviceBuilder<C>) -> DeviceBuilder<C>,
    {
        let mut builder = DeviceBuilder::new(config, Arc::clone(&self.connector)).with_event_bus(self.event_bus.clone());
        if let Some(persistence) = &self.persistence {
            builder = builder.with_persistence(Arc::clone(persistence));
        }
        let device = configure(builder).build()?;
        let device_id = device.id();

        if let Some(previous) = self.devices.write().await.insert(device_id, device.clone()) {
            previous.shutdown();
        }
        device.start();
        self.event_bus.publish(DeviceEvent::DeviceAdded { device_id });
        tracing::debug!(%device_id, model = %device.table().model(), "Device added");

        Ok(device_id)
    }

    /// Removes a device, stopping its polling and connection.
    ///
    /// Returns `true` if the device was found and removed.
    pub async fn remove_device(&self, device_id: DeviceId) -> bool {
        let removed = self.devices.write().await.remove(&device_id);
        let Some(device) = removed else {
            return false;
        };

        device.shutdown();
        self.event_bus.publish(DeviceEvent::DeviceRemoved { device_id });
        true
    }

    /// Returns a handle to a device.
    pub async fn device(&self, device_id: DeviceId) -> Option<Device<C>> {
        self.devices.read().await.get(&device_id).cloned()
    }

    /// Returns a list of all device IDs.
    pub async fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.read().await.keys().copied().collect()
    }

    /// Returns the number of managed devices.
    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Returns true if the device is available.
    pub async fn is_available(&self, device_id: DeviceId) -> bool {
        self.devices
            .read()
            .await
            .get(&device_id)
            .is_some_and(Device::is_available)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Writes a capability of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] or the dispatch error.
    pub async fn dispatch(&self, device_id: DeviceId, capability: &str, value: CapabilityValue) -> Result<Ack> {
        self.get(device_id).await?.dispatch(capability, value).await
    }

    /// Invokes an action of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] or the dispatch error.
    pub async fn dispatch_action(&self, device_id: DeviceId, action: &str, args: Vec<Value>) -> Result<Ack> {
        self.get(device_id).await?.dispatch_action(action, args).await
    }

    /// Stops every device and forgets them.
    pub async fn shutdown(&self) {
        let devices: Vec<_> = self.devices.write().await.drain().collect();
        for (device_id, device) in devices {
            device.shutdown();
            self.event_bus.publish(DeviceEvent::DeviceRemoved { device_id });
        }
    }

    async fn get(&self, device_id: DeviceId) -> Result<Device<C>> {
        self.device(device_id).await.ok_or(Error::DeviceNotFound)
    }
}
