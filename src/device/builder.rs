// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device builder.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::device::{Clock, Device};
use crate::error::{Error, Result};
use crate::event::{EventBus, TriggerSink};
use crate::manager::DeviceConfig;
use crate::model::ModelTable;
use crate::protocol::Connector;
use crate::state::{
    CapabilityStore, DerivedRecord, DerivedStateStore, MemoryCapabilityStore, MemoryDerivedStore,
    MemorySettingsStore, SettingsStore,
};

/// Builder for [`Device`].
///
/// Only the configuration and the connector are required. Everything else
/// defaults to an in-memory implementation:
///
/// - the model table is resolved from [`DeviceConfig::model`]
/// - the capability store registers every capability of the table
/// - triggers are published on the event bus
///
/// # Examples
///
/// ```
/// use miot_sync::{Device, DeviceConfig};
/// use miot_sync::protocol::mock::{MockConnector, MockTransport};
///
/// # fn example() -> miot_sync::Result<()> {
/// let config = DeviceConfig::new("192.168.1.40", "token", "miot.airp.v1");
/// let device = Device::builder(config, MockConnector::new(MockTransport::new())).build()?;
/// assert_eq!(device.table().model(), "miot.airp.v1");
/// # Ok(())
/// # }
/// ```
pub struct DeviceBuilder<C: Connector> {
    config: DeviceConfig,
    connector: Arc<C>,
    table: Option<ModelTable>,
    store: Option<Arc<dyn CapabilityStore>>,
    settings: Option<Arc<dyn SettingsStore>>,
    triggers: Option<Arc<dyn TriggerSink>>,
    persistence: Option<Arc<dyn DerivedStateStore>>,
    events: Option<EventBus>,
    clock: Option<Clock>,
}

impl<C: Connector> std::fmt::Debug for DeviceBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuilder")
            .field("config", &self.config)
            .field("table", &self.table.as_ref().map(ModelTable::model))
            .finish_non_exhaustive()
    }
}

impl<C: Connector> DeviceBuilder<C> {
    pub(crate) fn new(config: DeviceConfig, connector: Arc<C>) -> Self {
        Self {
            config,
            connector,
            table: None,
            store: None,
            settings: None,
            triggers: None,
            persistence: None,
            events: None,
            clock: None,
        }
    }

    /// Uses a custom model table instead of the built-in one.
    #[must_use]
    pub fn with_table(mut self, table: ModelTable) -> Self {
        self.table = Some(table);
        self
    }

    /// Sets the host capability store.
    #[must_use]
    pub fn with_capability_store(mut self, store: Arc<dyn CapabilityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the host settings store.
    #[must_use]
    pub fn with_settings_store(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the trigger sink.
    #[must_use]
    pub fn with_trigger_sink(mut self, triggers: Arc<dyn TriggerSink>) -> Self {
        self.triggers = Some(triggers);
        self
    }

    /// Sets where derived state is persisted.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn DerivedStateStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Publishes events on `events` instead of a private bus.
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Reads wall-clock time from `clock`; used for day keys.
    #[must_use]
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Builds the device.
    ///
    /// The derived-state record is loaded here, once. A record that cannot
    /// be loaded is logged and replaced by an empty one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the poll interval is zero, or if no
    /// table was given and the model is not in the built-in catalog.
    pub fn build(self) -> Result<Device<C>> {
        if self.config.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }
        let table = match self.table {
            Some(table) => table,
            None => ModelTable::for_model(&self.config.model)
                .ok_or_else(|| Error::Config(format!("unknown model {}", self.config.model)))?,
        };

        let store: Arc<dyn CapabilityStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryCapabilityStore::with_capabilities(table.capability_names())),
        };
        let settings: Arc<dyn SettingsStore> = match self.settings {
            Some(settings) => settings,
            None => Arc::new(MemorySettingsStore::new()),
        };
        let events = self.events.unwrap_or_default();
        let triggers: Arc<dyn TriggerSink> = match self.triggers {
            Some(triggers) => triggers,
            None => Arc::new(events.clone()),
        };
        let persistence: Arc<dyn DerivedStateStore> = match self.persistence {
            Some(persistence) => persistence,
            None => Arc::new(MemoryDerivedStore::new()),
        };
        let clock: Clock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(Utc::now),
        };

        let record = match persistence.load(self.config.id) {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(device_id = %self.config.id, error = %e, "Derived state not loaded, starting fresh");
                DerivedRecord::default()
            }
        };

        Ok(Device::assemble(
            self.config,
            self.connector,
            table,
            store,
            settings,
            triggers,
            persistence,
            events,
            clock,
            record,
        ))
    }
}
