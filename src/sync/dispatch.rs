// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability intents and settings changes to remote writes.
//!
//! Every write is validated locally first: an unknown capability, a
//! read-only property or an invalid value fails before any I/O. A write
//! against a connection that is not ready fails fast and asks the
//! connection manager for a reconnect.
//!
//! Settings mirrored from device properties flow both ways. To keep a
//! device-originated change from being written back to the device, each
//! direction holds an in-flight token for the setting key while it runs,
//! and a host change equal to the last value read from the device is
//! dropped.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::event::{DeviceEvent, DeviceId, EventBus};
use crate::model::{ModelTable, PropertySpec};
use crate::protocol::{
    ACTION, ActionCall, ActionReply, CallOptions, Connector, PropertyWrite, ReadResult, SET_PROPERTIES,
    WriteReply, call_with_retry,
};
use crate::state::{CapabilityStore, CapabilityUpdate, SettingsStore};
use crate::sync::ConnectionManager;
use crate::types::CapabilityValue;

/// Acknowledgement of an accepted write or action.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    /// The capability or action name.
    pub name: String,
    /// Output arguments of an action; empty for property writes.
    pub out: Vec<Value>,
}

/// Records capabilities written while a poll read is in flight.
///
/// A reading taken before such a write completed may carry the old value;
/// the poll masks it for that cycle instead of reverting the optimistic
/// update.
#[derive(Debug, Default)]
pub struct WriteJournal {
    inner: Mutex<JournalState>,
}

#[derive(Debug, Default)]
struct JournalState {
    polling: bool,
    written: HashSet<String>,
}

impl WriteJournal {
    /// Creates an idle journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts recording writes.
    pub fn begin_poll(&self) {
        let mut inner = self.inner.lock();
        inner.polling = true;
        inner.written.clear();
    }

    /// Records a completed write of `name` if a poll is in flight.
    pub fn record(&self, name: &str) {
        let mut inner = self.inner.lock();
        if inner.polling {
            inner.written.insert(name.to_string());
        }
    }

    /// Stops recording and returns the names written meanwhile.
    pub fn end_poll(&self) -> HashSet<String> {
        let mut inner = self.inner.lock();
        inner.polling = false;
        std::mem::take(&mut inner.written)
    }

    /// Masks every reading written during the poll.
    pub fn mask_stale(&self, result: &mut ReadResult) -> usize {
        let written = self.end_poll();
        for name in &written {
            tracing::debug!(property = %name, "Masking reading raced by a write");
            result.mask(name);
        }
        written.len()
    }
}

/// Setting keys with a write in progress.
#[derive(Debug, Clone, Default)]
pub struct InFlightWrites {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlightWrites {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds `key` until the returned token drops.
    ///
    /// Returns `None` if the key is already held.
    #[must_use]
    pub fn hold(&self, key: &str) -> Option<InFlightToken> {
        if !self.keys.lock().insert(key.to_string()) {
            return None;
        }
        Some(InFlightToken {
            keys: Arc::clone(&self.keys),
            key: key.to_string(),
        })
    }

    /// Returns `true` if `key` is held.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }
}

/// Releases its setting key on drop.
#[derive(Debug)]
pub struct InFlightToken {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightToken {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

/// Turns intents into remote writes for one device.
pub struct Dispatcher<C: Connector> {
    device_id: DeviceId,
    table: Arc<ModelTable>,
    connection: ConnectionManager<C>,
    store: Arc<dyn CapabilityStore>,
    events: EventBus,
    options: CallOptions,
    journal: Arc<WriteJournal>,
    in_flight: InFlightWrites,
    mirror: Arc<Mutex<HashMap<String, CapabilityValue>>>,
}

impl<C: Connector> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            device_id: self.device_id,
            table: Arc::clone(&self.table),
            connection: self.connection.clone(),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            options: self.options,
            journal: Arc::clone(&self.journal),
            in_flight: self.in_flight.clone(),
            mirror: Arc::clone(&self.mirror),
        }
    }
}

impl<C: Connector> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("device_id", &self.device_id)
            .field("model", &self.table.model())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Dispatcher<C> {
    /// Creates a dispatcher writing through `connection`.
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        table: Arc<ModelTable>,
        connection: ConnectionManager<C>,
        store: Arc<dyn CapabilityStore>,
        events: EventBus,
        options: CallOptions,
    ) -> Self {
        Self {
            device_id,
            table,
            connection,
            store,
            events,
            options,
            journal: Arc::new(WriteJournal::new()),
            in_flight: InFlightWrites::new(),
            mirror: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the write journal shared with the poll path.
    #[must_use]
    pub fn journal(&self) -> &Arc<WriteJournal> {
        &self.journal
    }

    /// Returns the in-flight setting keys.
    #[must_use]
    pub fn in_flight(&self) -> &InFlightWrites {
        &self.in_flight
    }

    /// Writes `value` to `capability`.
    ///
    /// On success the capability store is updated optimistically and a
    /// [`DeviceEvent::CapabilityChanged`] is published if the value changed.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedCapability`] or [`Error::Value`] before any I/O
    /// - [`Error::NotReady`] if the connection is not established
    /// - [`Error::Transport`] if the call failed; the device is marked failed
    /// - [`Error::Protocol`] if the device rejected the write
    pub async fn dispatch(&self, capability: &str, value: CapabilityValue) -> Result<Ack> {
        let spec = self.table.writable(capability)?;
        let raw = spec.kind.encode(&spec.name, &value)?;
        self.write(spec, raw).await?;

        self.journal.record(&spec.name);
        if spec.exposed && self.store.has(&spec.name) {
            let update = CapabilityUpdate::new(spec.name.clone(), value);
            match self.store.apply(&update) {
                Ok(true) => self.events.publish(DeviceEvent::CapabilityChanged {
                    device_id: self.device_id,
                    update,
                }),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(device_id = %self.device_id, capability, error = %e, "Optimistic update rejected");
                }
            }
        }

        Ok(Ack {
            name: spec.name.clone(),
            out: Vec::new(),
        })
    }

    /// Invokes the action `name` with `args`.
    ///
    /// # Errors
    ///
    /// Same as [`dispatch`](Self::dispatch); an unknown action is
    /// [`Error::UnsupportedCapability`].
    pub async fn dispatch_action(&self, name: &str, args: Vec<Value>) -> Result<Ack> {
        let action = self
            .table
            .action(name)
            .ok_or_else(|| Error::UnsupportedCapability {
                capability: name.to_string(),
                model: self.table.model().to_string(),
            })?;
        let transport = self.ready()?;

        let params = to_params(&ActionCall::new(&action.name, action.address, args))?;
        let reply = self.call(&transport, ACTION, params).await?;
        let reply: ActionReply = serde_json::from_value(reply)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        if reply.code != 0 {
            return Err(ProtocolError::ResultCode {
                name: action.name.clone(),
                code: reply.code,
            }
            .into());
        }

        tracing::debug!(device_id = %self.device_id, action = %action.name, "Action invoked");
        Ok(Ack {
            name: action.name.clone(),
            out: reply.out,
        })
    }

    /// Writes mirrored settings the host changed.
    ///
    /// `changed` lists the keys the host reports as changed; `settings`
    /// holds their new values. Keys that are not mirrored are ignored, as
    /// are keys with a write in flight and values equal to the last value
    /// read from the device. Returns the number of writes issued.
    ///
    /// # Errors
    ///
    /// Returns the first failed write; later keys are not written.
    pub async fn write_settings(&self, settings: &Map<String, Value>, changed: &[String]) -> Result<usize> {
        let mut written = 0;
        for key in changed {
            let Some(spec) = self.table.property_for_setting(key) else {
                continue;
            };
            let Some(value) = settings.get(key).and_then(CapabilityValue::from_json) else {
                continue;
            };
            if self.mirror.lock().get(key) == Some(&value) {
                tracing::debug!(device_id = %self.device_id, setting = %key, "Setting matches device, not writing");
                continue;
            }
            let Some(_token) = self.in_flight.hold(key) else {
                tracing::debug!(device_id = %self.device_id, setting = %key, "Setting write in flight, skipping");
                continue;
            };

            self.dispatch(&spec.name, value.clone()).await?;
            self.mirror.lock().insert(key.clone(), value);
            written += 1;
        }
        Ok(written)
    }

    /// Copies mirrored device values into host settings.
    ///
    /// Runs as the last step of a poll. Keys with a host write in flight are
    /// left alone. Returns the number of settings patched.
    ///
    /// # Errors
    ///
    /// Returns the settings store's error.
    pub fn sync_settings(&self, result: &ReadResult, settings: &dyn SettingsStore) -> Result<usize> {
        let current = settings.get_all();
        let mut patch = Map::new();
        let mut tokens = Vec::new();

        for spec in self.table.mirrored() {
            let Some(key) = spec.setting.as_deref() else {
                continue;
            };
            let Some(value) = result.value(&spec.name).and_then(|raw| spec.kind.decode(raw)) else {
                continue;
            };
            self.mirror.lock().insert(key.to_string(), value.clone());

            let json = value.to_json();
            if current.get(key) == Some(&json) {
                continue;
            }
            let Some(token) = self.in_flight.hold(key) else {
                continue;
            };
            tokens.push(token);
            patch.insert(key.to_string(), json);
        }

        if patch.is_empty() {
            return Ok(0);
        }
        let count = patch.len();
        tracing::debug!(device_id = %self.device_id, count, "Mirroring device values into settings");
        settings.patch(patch)?;
        drop(tokens);
        Ok(count)
    }

    async fn write(&self, spec: &PropertySpec, raw: Value) -> Result<()> {
        let transport = self.ready()?;
        let params = to_params(&[PropertyWrite::new(&spec.name, spec.address, raw)])?;
        let reply = self.call(&transport, SET_PROPERTIES, params).await?;

        let replies: Vec<WriteReply> = serde_json::from_value(reply)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        let reply = replies
            .iter()
            .find(|r| r.did == spec.name)
            .or_else(|| {
                replies
                    .iter()
                    .find(|r| r.siid == spec.address.siid() && r.piid == spec.address.piid())
            })
            .ok_or_else(|| ProtocolError::MissingResult(spec.name.clone()))?;

        if reply.code != 0 {
            tracing::warn!(
                device_id = %self.device_id,
                property = %spec.name,
                code = reply.code,
                "Write rejected"
            );
            return Err(ProtocolError::ResultCode {
                name: spec.name.clone(),
                code: reply.code,
            }
            .into());
        }
        Ok(())
    }

    fn ready(&self) -> Result<Arc<C::Transport>> {
        self.connection
            .ensure_connected()
            .inspect_err(|_| self.connection.request_reconnect())
    }

    async fn call(&self, transport: &C::Transport, method: &str, params: Value) -> Result<Value> {
        match call_with_retry(transport, method, &params, self.options).await {
            Ok(value) => {
                self.connection.mark_succeeded();
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(device_id = %self.device_id, method, error = %e, "Remote call failed");
                self.connection.mark_failed(&e);
                Err(e.into())
            }
        }
    }
}

fn to_params<T: Serialize + ?Sized>(params: &T) -> Result<Value> {
    serde_json::to_value(params).map_err(|e| TransportError::MalformedResponse(e.to_string()).into())
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::manager::ReconnectionPolicy;
    use crate::model::{ActionSpec, DeviceCategory};
    use crate::protocol::Endpoint;
    use crate::protocol::mock::{MockConnector, MockTransport};
    use crate::state::{MemoryCapabilityStore, MemorySettingsStore};
    use crate::types::{ActionAddress, PropertyAddress, ValueKind};

    const MODE: PropertyAddress = PropertyAddress::new(2, 5);
    const LOCK: PropertyAddress = PropertyAddress::new(3, 1);

    fn table() -> Arc<ModelTable> {
        Arc::new(
            ModelTable::builder("acme.purifier.v1", DeviceCategory::AirPurifier)
                .property(PropertySpec::read_write("power", 2, 1, ValueKind::Bool))
                .property(PropertySpec::read_write(
                    "mode",
                    2,
                    5,
                    ValueKind::options(&[(0, "auto"), (1, "sleep"), (2, "favorite")]),
                ))
                .property(PropertySpec::read("pm25", 3, 4, ValueKind::number(0.0, 1000.0)))
                .property(PropertySpec::read_write("child_lock", 3, 1, ValueKind::Bool).mirrored("child_lock"))
                .action(ActionSpec::new("reset_filter", 4, 1))
                .build(),
        )
    }

    struct Fixture {
        dispatcher: Dispatcher<MockConnector>,
        connection: ConnectionManager<MockConnector>,
        appliance: MockTransport,
        connector: Arc<MockConnector>,
        store: Arc<MemoryCapabilityStore>,
        events: EventBus,
    }

    async fn fixture() -> Fixture {
        let appliance = MockTransport::new();
        let connector = Arc::new(MockConnector::new(appliance.clone()));
        let events = EventBus::new();
        let device_id = DeviceId::new();
        let connection = ConnectionManager::new(
            device_id,
            Arc::clone(&connector),
            Endpoint::new("192.168.1.20", "token"),
            ReconnectionPolicy::default(),
            events.clone(),
        );
        connection.connect_now().await.unwrap();
        let store = Arc::new(MemoryCapabilityStore::with_capabilities(["power", "mode", "pm25", "child_lock"]));
        let dispatcher = Dispatcher::new(
            device_id,
            table(),
            connection.clone(),
            store.clone(),
            events.clone(),
            CallOptions::new(Duration::from_secs(5)).with_retries(1),
        );
        Fixture {
            dispatcher,
            connection,
            appliance,
            connector,
            store,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn write_updates_store_optimistically() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();

        f.dispatcher.dispatch("mode", "sleep".into()).await.unwrap();

        assert_eq!(f.appliance.property(MODE), Some(json!(1)));
        assert_eq!(f.store.get("mode"), Some("sleep".into()));
        assert!(matches!(rx.try_recv().unwrap(), DeviceEvent::CapabilityChanged { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn validation_fails_before_io() {
        let f = fixture().await;

        let unknown = f.dispatcher.dispatch("turbo", true.into()).await;
        assert!(matches!(unknown, Err(Error::UnsupportedCapability { .. })));

        let read_only = f.dispatcher.dispatch("pm25", 3.0.into()).await;
        assert!(matches!(read_only, Err(Error::Value(_))));

        let bad_option = f.dispatcher.dispatch("mode", "turbo".into()).await;
        assert!(matches!(bad_option, Err(Error::Value(_))));

        assert!(f.appliance.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_fails_fast_and_requests_reconnect() {
        let f = fixture().await;
        f.connection.shutdown();
        let connects = f.connector.connects();

        let result = f.dispatcher.dispatch("power", true.into()).await;

        assert!(matches!(result, Err(Error::NotReady(_))));
        assert!(f.appliance.calls().is_empty());
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.connector.connects(), connects + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_write_surfaces_code_and_keeps_availability() {
        let f = fixture().await;
        f.appliance.set_code(MODE, -4004);

        let result = f.dispatcher.dispatch("mode", "auto".into()).await;

        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::ResultCode { code: -4004, .. }))
        ));
        assert!(f.connection.is_available());
        assert_eq!(f.store.get("mode"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_marks_device_unavailable() {
        let f = fixture().await;
        f.appliance.fail_next(2);

        let result = f.dispatcher.dispatch("power", true.into()).await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!f.connection.is_available());
        assert!(f.connection.reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn action_returns_output() {
        let f = fixture().await;
        f.dispatcher.dispatch_action("reset_filter", vec![]).await.unwrap();
        assert_eq!(f.appliance.call_count(ACTION), 1);

        f.appliance.set_action_code(ActionAddress::new(4, 1), -4001);
        let rejected = f.dispatcher.dispatch_action("reset_filter", vec![]).await;
        assert!(matches!(rejected, Err(Error::Protocol(_))));

        let unknown = f.dispatcher.dispatch_action("self_destruct", vec![]).await;
        assert!(matches!(unknown, Err(Error::UnsupportedCapability { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn journal_records_only_during_poll() {
        let f = fixture().await;
        f.dispatcher.dispatch("power", true.into()).await.unwrap();
        assert!(f.dispatcher.journal().end_poll().is_empty());

        f.dispatcher.journal().begin_poll();
        f.dispatcher.dispatch("power", false.into()).await.unwrap();
        let mut result: ReadResult = [("power", crate::protocol::PropertyReading::ok(json!(true)))]
            .into_iter()
            .collect();
        assert_eq!(f.dispatcher.journal().mask_stale(&mut result), 1);
        assert_eq!(result.value("power"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn device_value_is_not_echoed_back() {
        let f = fixture().await;
        let settings = MemorySettingsStore::new();
        let result: ReadResult = [("child_lock", crate::protocol::PropertyReading::ok(json!(true)))]
            .into_iter()
            .collect();

        assert_eq!(f.dispatcher.sync_settings(&result, &settings).unwrap(), 1);
        assert_eq!(settings.get("child_lock"), Some(json!(true)));

        // The host reports the patch back as a change.
        let written = f
            .dispatcher
            .write_settings(&settings.get_all(), &["child_lock".to_string()])
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(f.appliance.call_count(SET_PROPERTIES), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn user_setting_change_is_written() {
        let f = fixture().await;
        let mut values = Map::new();
        values.insert("child_lock".to_string(), json!(true));
        values.insert("address".to_string(), json!("192.168.1.21"));

        let written = f
            .dispatcher
            .write_settings(&values, &["child_lock".to_string(), "address".to_string()])
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(f.appliance.property(LOCK), Some(json!(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn held_key_is_skipped() {
        let f = fixture().await;
        let _token = f.dispatcher.in_flight().hold("child_lock").unwrap();
        let mut values = Map::new();
        values.insert("child_lock".to_string(), json!(true));

        let written = f
            .dispatcher
            .write_settings(&values, &["child_lock".to_string()])
            .await
            .unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn token_releases_on_drop() {
        let writes = InFlightWrites::new();
        let token = writes.hold("led").unwrap();
        assert!(writes.hold("led").is_none());
        drop(token);
        assert!(!writes.is_held("led"));
    }
}
