// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One synchronized appliance.
//!
//! A [`Device`] wires the sync components into a poll cycle:
//!
//! 1. batched read of every table property
//! 2. reconciliation into capability updates and triggers
//! 3. derived state (daily counters, consumables, durations)
//! 4. settings sync for mirrored properties
//!
//! The cycle runs on a per-device timer while the connection is up. A read
//! failure stops the timer until the connection manager has reconnected.
//! Cycles never overlap: a tick that finds a cycle in flight is skipped,
//! not queued.
//!
//! # Examples
//!
//! ```
//! use miot_sync::{Device, DeviceConfig};
//! use miot_sync::protocol::mock::{MockConnector, MockTransport};
//!
//! # async fn example() -> miot_sync::Result<()> {
//! let appliance = MockTransport::new();
//! let config = DeviceConfig::new("192.168.1.40", "token", "miot.humidifier.v1");
//! let device = Device::builder(config, MockConnector::new(appliance)).build()?;
//!
//! device.start();
//! device.dispatch("power", true.into()).await?;
//! device.shutdown();
//! # Ok(())
//! # }
//! ```

mod builder;

pub use builder::DeviceBuilder;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result, TransportError};
use crate::event::{DeviceEvent, DeviceId, EventBus, TriggerSink};
use crate::manager::DeviceConfig;
use crate::model::ModelTable;
use crate::protocol::{BatchedReader, Connector};
use crate::state::{CapabilityStore, CapabilityUpdate, DerivedRecord, DerivedStateStore, SettingsStore};
use crate::sync::{Ack, ConnectionManager, ConnectionState, DerivedStateTracker, Dispatcher, Reconciler};
use crate::types::CapabilityValue;

/// Source of wall-clock time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Capability values that changed, derived ones included.
    pub updated: usize,
    /// Triggers fired.
    pub triggered: usize,
    /// Read chunks that failed after their retry.
    pub failed_chunks: usize,
    /// Readings dropped because a write raced the read.
    pub masked: usize,
    /// Host settings patched from device values.
    pub settings_patched: usize,
}

/// Capabilities registered or removed by [`Device::probe`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Capabilities registered because their property answered.
    pub added: Vec<String>,
    /// Capabilities removed because their property answered with an error.
    pub removed: Vec<String>,
}

struct Cycle {
    reconciler: Reconciler,
    tracker: DerivedStateTracker,
}

struct Inner<C: Connector> {
    id: DeviceId,
    config: RwLock<DeviceConfig>,
    table: Arc<ModelTable>,
    connection: ConnectionManager<C>,
    dispatcher: Dispatcher<C>,
    store: Arc<dyn CapabilityStore>,
    settings: Arc<dyn SettingsStore>,
    triggers: Arc<dyn TriggerSink>,
    persistence: Arc<dyn DerivedStateStore>,
    events: EventBus,
    clock: Clock,
    cycle: tokio::sync::Mutex<Cycle>,
    probed: AtomicBool,
    runtime: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> Drop for Inner<C> {
    fn drop(&mut self) {
        if let Some(task) = self.runtime.get_mut().take() {
            task.abort();
        }
        self.connection.shutdown();
    }
}

/// A synchronized appliance.
///
/// Cloning yields another handle to the same device.
pub struct Device<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for Device<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for Device<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("model", &self.inner.table.model())
            .field("connection", &self.inner.connection)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Device<C> {
    /// Starts building a device for `config`, connecting through `connector`.
    pub fn builder(config: DeviceConfig, connector: C) -> DeviceBuilder<C> {
        DeviceBuilder::new(config, Arc::new(connector))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: DeviceConfig,
        connector: Arc<C>,
        table: ModelTable,
        store: Arc<dyn CapabilityStore>,
        settings: Arc<dyn SettingsStore>,
        triggers: Arc<dyn TriggerSink>,
        persistence: Arc<dyn DerivedStateStore>,
        events: EventBus,
        clock: Clock,
        record: DerivedRecord,
    ) -> Self {
        let id = config.id;
        let table = Arc::new(table);
        let connection = ConnectionManager::new(
            id,
            connector,
            config.endpoint.clone(),
            config.reconnection.clone(),
            events.clone(),
        );
        let dispatcher = Dispatcher::new(
            id,
            Arc::clone(&table),
            connection.clone(),
            Arc::clone(&store),
            events.clone(),
            config.read_policy.call_options(),
        );
        let tracker = DerivedStateTracker::new(table.derived().clone(), config.utc_offset, record);

        Self {
            inner: Arc::new(Inner {
                id,
                config: RwLock::new(config),
                table,
                connection,
                dispatcher,
                store,
                settings,
                triggers,
                persistence,
                events,
                clock,
                cycle: tokio::sync::Mutex::new(Cycle {
                    reconciler: Reconciler::new(),
                    tracker,
                }),
                probed: AtomicBool::new(false),
                runtime: Mutex::new(None),
            }),
        }
    }

    /// Returns the device ID.
    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> DeviceConfig {
        self.inner.config.read().clone()
    }

    /// Returns the model table.
    #[must_use]
    pub fn table(&self) -> &ModelTable {
        &self.inner.table
    }

    /// Returns the capability store.
    #[must_use]
    pub fn capabilities(&self) -> &Arc<dyn CapabilityStore> {
        &self.inner.store
    }

    /// Returns the current value of a capability.
    #[must_use]
    pub fn capability(&self, name: &str) -> Option<CapabilityValue> {
        self.inner.store.get(name)
    }

    /// Returns the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Returns `true` if the device is considered available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.connection.is_available()
    }

    /// Returns the connection manager.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.inner.connection
    }

    /// Returns a copy of the durable derived-state record.
    ///
    /// Waits for an in-flight poll to finish.
    pub async fn derived_record(&self) -> DerivedRecord {
        self.inner.cycle.lock().await.tracker.record().clone()
    }

    /// Subscribes to events of this device's bus.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    /// Connects in the background and starts polling once connected.
    ///
    /// Calling `start` on a running device does nothing.
    pub fn start(&self) {
        let mut runtime = self.inner.runtime.lock();
        if runtime.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        tracing::debug!(device_id = %self.inner.id, model = %self.inner.table.model(), "Starting device");
        self.inner.connection.connect();
        *runtime = Some(spawn_runtime(&self.inner));
    }

    /// Stops polling and disconnects.
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.runtime.lock().take() {
            task.abort();
        }
        self.inner.connection.shutdown();
        tracing::debug!(device_id = %self.inner.id, "Device shut down");
    }

    /// Applies changed connection settings.
    ///
    /// If the address, token or poll interval changed, the pending
    /// reconnect and the poll loop are cancelled and a fresh handshake is
    /// started. Returns `true` in that case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed settings; nothing changes.
    pub fn reconfigure(&self, settings: &Map<String, Value>) -> Result<bool> {
        let endpoint = {
            let mut config = self.inner.config.write();
            if !config.apply_settings(settings)? {
                return Ok(false);
            }
            config.endpoint.clone()
        };

        tracing::info!(device_id = %self.inner.id, address = %endpoint.address(), "Connection settings changed");
        let mut runtime = self.inner.runtime.lock();
        let running = match runtime.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        };
        self.inner.connection.reconfigure(endpoint);
        if running {
            *runtime = Some(spawn_runtime(&self.inner));
        }
        Ok(true)
    }

    /// Handles host settings changes.
    ///
    /// Connection keys reconfigure the connection; mirrored keys are written
    /// to the device unless they echo a value the device reported.
    ///
    /// # Errors
    ///
    /// Returns a configuration error or the first failed write.
    pub async fn on_settings_changed(&self, changed: &[String]) -> Result<()> {
        let settings = self.inner.settings.get_all();

        if changed.iter().any(|key| DeviceConfig::is_connection_key(key)) {
            self.reconfigure(&settings)?;
        }

        let mirrored: Vec<String> = changed
            .iter()
            .filter(|key| !DeviceConfig::is_connection_key(key))
            .cloned()
            .collect();
        if !mirrored.is_empty() {
            self.inner.dispatcher.write_settings(&settings, &mirrored).await?;
        }
        Ok(())
    }

    /// Writes `value` to `capability`.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub async fn dispatch(&self, capability: &str, value: CapabilityValue) -> Result<Ack> {
        self.inner.dispatcher.dispatch(capability, value).await
    }

    /// Invokes a table action.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch_action`].
    pub async fn dispatch_action(&self, name: &str, args: Vec<Value>) -> Result<Ack> {
        self.inner.dispatcher.dispatch_action(name, args).await
    }

    /// Runs one poll cycle now.
    ///
    /// Returns `Ok(None)` if a cycle is already in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the connection is down (a reconnect is
    /// requested), or [`Error::Transport`] if every read chunk failed.
    pub async fn poll_now(&self) -> Result<Option<PollReport>> {
        if let Err(e) = self.inner.connection.ensure_connected() {
            self.inner.connection.request_reconnect();
            return Err(e);
        }
        run_cycle(&self.inner).await
    }

    /// Reads every property once and adjusts registered capabilities.
    ///
    /// Exposed properties that answer are registered; those answering with
    /// an error code are removed. Runs once automatically after the first
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the connection is down, or
    /// [`Error::Transport`] if any chunk failed; nothing is changed then.
    pub async fn probe(&self) -> Result<ProbeReport> {
        if let Err(e) = self.inner.connection.ensure_connected() {
            self.inner.connection.request_reconnect();
            return Err(e);
        }
        probe(&self.inner).await
    }
}

fn spawn_runtime<C: Connector>(inner: &Arc<Inner<C>>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let state = inner.connection.subscribe();
    tokio::spawn(supervise(weak, state))
}

async fn supervise<C: Connector>(weak: Weak<Inner<C>>, mut state: watch::Receiver<ConnectionState>) {
    loop {
        if state.wait_for(ConnectionState::is_connected).await.is_err() {
            return;
        }

        let period = {
            let Some(inner) = weak.upgrade() else { return };
            if !inner.probed.swap(true, Ordering::SeqCst) {
                match probe(&inner).await {
                    Ok(report) => tracing::debug!(
                        device_id = %inner.id,
                        added = report.added.len(),
                        removed = report.removed.len(),
                        "Probe complete"
                    ),
                    Err(e) => {
                        inner.probed.store(false, Ordering::SeqCst);
                        tracing::debug!(device_id = %inner.id, error = %e, "Probe failed");
                    }
                }
            }
            inner.config.read().poll_interval
        };

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !state.borrow().is_connected() {
                        break;
                    }
                    let Some(inner) = weak.upgrade() else { return };
                    if let Err(e) = run_cycle(&inner).await {
                        tracing::debug!(device_id = %inner.id, error = %e, "Poll failed");
                    }
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !state.borrow().is_connected() {
                        tracing::debug!("Connection lost, polling stopped");
                        break;
                    }
                }
            }
        }
    }
}

async fn run_cycle<C: Connector>(inner: &Inner<C>) -> Result<Option<PollReport>> {
    let Ok(mut cycle) = inner.cycle.try_lock() else {
        tracing::debug!(device_id = %inner.id, "Poll in flight, skipping");
        return Ok(None);
    };
    let transport = inner.connection.ensure_connected()?;
    let reader = BatchedReader::new(inner.config.read().read_policy);
    let request = inner.table.read_request();

    let journal = inner.dispatcher.journal();
    journal.begin_poll();
    let mut outcome = reader.read(transport.as_ref(), &request).await;
    let masked = journal.mask_stale(&mut outcome.result);

    if outcome.has_failures() {
        let error = outcome.last_error.clone().unwrap_or(TransportError::Closed);
        tracing::warn!(
            device_id = %inner.id,
            failed_chunks = outcome.failed_chunks,
            chunks = outcome.chunks,
            error = %error,
            "Read failed"
        );
        inner.connection.mark_failed(&error);
        if outcome.is_total_failure() {
            return Err(error.into());
        }
    } else {
        inner.connection.mark_succeeded();
    }

    let result = outcome.result;
    let mut report = PollReport {
        failed_chunks: outcome.failed_chunks,
        masked,
        ..PollReport::default()
    };

    let cycle = &mut *cycle;
    let reconciliation = cycle.reconciler.apply(&inner.table, &result, inner.store.as_ref());
    for update in reconciliation.updates {
        if apply_update(inner, update) {
            report.updated += 1;
        }
    }
    for firing in reconciliation.triggers {
        tracing::info!(
            device_id = %inner.id,
            trigger = %firing.trigger_id,
            property = %firing.property,
            "Trigger fired"
        );
        match inner.triggers.fire(inner.id, &firing.trigger_id, firing.payload()) {
            Ok(()) => report.triggered += 1,
            Err(e) => {
                tracing::warn!(device_id = %inner.id, trigger = %firing.trigger_id, error = %e, "Trigger failed");
            }
        }
    }

    let snapshot = cycle.tracker.update(&result, (inner.clock)());
    for update in snapshot.updates {
        if inner.store.has(&update.name) && apply_update(inner, update) {
            report.updated += 1;
        }
    }
    if snapshot.record_changed
        && let Err(e) = inner.persistence.save(inner.id, cycle.tracker.record())
    {
        tracing::warn!(device_id = %inner.id, error = %e, "Derived state not saved");
    }

    match inner.dispatcher.sync_settings(&result, inner.settings.as_ref()) {
        Ok(count) => report.settings_patched = count,
        Err(e) => tracing::warn!(device_id = %inner.id, error = %e, "Settings sync failed"),
    }

    tracing::debug!(
        device_id = %inner.id,
        present = result.present_count(),
        requested = result.len(),
        updated = report.updated,
        "Poll complete"
    );
    Ok(Some(report))
}

fn apply_update<C: Connector>(inner: &Inner<C>, update: CapabilityUpdate) -> bool {
    match inner.store.apply(&update) {
        Ok(true) => {
            if update.estimate {
                tracing::debug!(device_id = %inner.id, capability = %update.name, estimate = true, "Estimated value");
            }
            inner.events.publish(DeviceEvent::CapabilityChanged {
                device_id: inner.id,
                update,
            });
            true
        }
        Ok(false) => false,
        Err(e) => {
            tracing::warn!(device_id = %inner.id, capability = %update.name, error = %e, "Capability update rejected");
            false
        }
    }
}

async fn probe<C: Connector>(inner: &Inner<C>) -> Result<ProbeReport> {
    let transport = inner.connection.ensure_connected()?;
    let reader = BatchedReader::new(inner.config.read().read_policy);
    let outcome = reader.read(transport.as_ref(), &inner.table.read_request()).await;
    if outcome.has_failures() {
        let error = outcome.last_error.unwrap_or(TransportError::Closed);
        inner.connection.mark_failed(&error);
        return Err(Error::Transport(error));
    }
    inner.connection.mark_succeeded();

    let mut report = ProbeReport::default();
    for spec in inner.table.properties().iter().filter(|p| p.exposed) {
        let Some(reading) = outcome.result.get(&spec.name) else {
            continue;
        };
        let registered = inner.store.has(&spec.name);
        let outcome = if reading.is_present() && !registered {
            inner.store.add(&spec.name).map(|()| report.added.push(spec.name.clone()))
        } else if !reading.is_present() && registered {
            inner.store.remove(&spec.name).map(|()| report.removed.push(spec.name.clone()))
        } else {
            Ok(())
        };
        if let Err(e) = outcome {
            tracing::warn!(device_id = %inner.id, capability = %spec.name, error = %e, "Capability not adjusted");
        }
    }

    if !report.removed.is_empty() {
        tracing::info!(device_id = %inner.id, removed = ?report.removed, "Removed unsupported capabilities");
    }
    Ok(report)
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::protocol::mock::{MockConnector, MockTransport};
    use crate::state::MemoryCapabilityStore;
    use crate::types::PropertyAddress;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn humidifier() -> (Device<MockConnector>, MockTransport) {
        let appliance = MockTransport::new();
        appliance.set_property(PropertyAddress::new(2, 1), json!(true));
        appliance.set_property(PropertyAddress::new(3, 1), json!(45));
        let config = DeviceConfig::new("10.0.0.3", "token", "miot.humidifier.v1");
        let device = Device::builder(config, MockConnector::new(appliance.clone()))
            .build()
            .unwrap();
        (device, appliance)
    }

    #[tokio::test(start_paused = true)]
    async fn poll_now_requires_connection() {
        let (device, _) = humidifier();
        assert!(matches!(device.poll_now().await, Err(Error::NotReady(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn start_polls_after_connecting() {
        let (device, appliance) = humidifier();
        device.start();
        settle().await;

        assert!(device.state().is_connected());
        assert_eq!(device.capability("power"), Some(true.into()));
        assert!(appliance.call_count(crate::protocol::GET_PROPERTIES) >= 2);
        device.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_poll_is_skipped() {
        let (device, appliance) = humidifier();
        device.connection().connect_now().await.unwrap();
        appliance.set_delay(Duration::from_secs(1));

        let first = device.clone();
        let running = tokio::spawn(async move { first.poll_now().await });
        settle().await;
        assert_eq!(device.poll_now().await.unwrap(), None);
        assert!(running.await.unwrap().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_removes_unanswered_capabilities() {
        let (device, _) = humidifier();
        device.connection().connect_now().await.unwrap();
        let store = device.capabilities();
        assert!(store.has("target_humidity"));

        let report = device.probe().await.unwrap();

        assert!(report.removed.contains(&"target_humidity".to_string()));
        assert!(!store.has("target_humidity"));
        assert!(store.has("power"));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_adds_answering_capabilities() {
        let appliance = MockTransport::new();
        appliance.set_property(PropertyAddress::new(2, 1), json!(true));
        let store = Arc::new(MemoryCapabilityStore::new());
        let device = Device::builder(
            DeviceConfig::new("10.0.0.3", "token", "miot.humidifier.v1"),
            MockConnector::new(appliance),
        )
        .with_capability_store(store.clone())
        .build()
        .unwrap();
        device.connection().connect_now().await.unwrap();

        let report = device.probe().await.unwrap();
        assert_eq!(report.added, vec!["power".to_string()]);
        assert!(store.has("power"));
    }
}
