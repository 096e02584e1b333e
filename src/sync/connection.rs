// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection and availability management.
//!
//! The [`ConnectionManager`] owns the transport handle. It is the only place
//! that creates or drops a transport, and the only state machine of the
//! engine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                               │                  │
//!                             error              failure
//!                               ▼                  ▼
//!                             Failed ◀─────────────┘
//!                               │
//!                        after the delay
//!                               ▼
//!                           Connecting
//! ```
//!
//! Availability is tracked separately from the state: a failure makes the
//! device unavailable, but only a successful remote call makes it available
//! again. A completed handshake alone does not.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, TransportError};
use crate::event::{DeviceEvent, DeviceId, EventBus};
use crate::manager::ReconnectionPolicy;
use crate::protocol::{Connector, Endpoint};

/// Connection state of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no attempt in progress.
    Disconnected,
    /// A handshake is in progress.
    Connecting,
    /// A transport is ready for calls.
    Connected,
    /// The last handshake or call failed.
    Failed(String),
}

impl ConnectionState {
    /// Returns `true` if calls are permitted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if the state is [`ConnectionState::Failed`].
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

struct Shared<C: Connector> {
    device_id: DeviceId,
    connector: Arc<C>,
    endpoint: RwLock<Endpoint>,
    policy: ReconnectionPolicy,
    events: EventBus,
    state: watch::Sender<ConnectionState>,
    transport: RwLock<Option<Arc<C::Transport>>>,
    available: AtomicBool,
    unavailable_reason: RwLock<Option<String>>,
    reconnect_pending: AtomicBool,
    attempts: AtomicU32,
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the transport of one device and its availability.
///
/// Cloning yields another handle to the same manager.
pub struct ConnectionManager<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("device_id", &self.shared.device_id)
            .field("state", &*self.shared.state.borrow())
            .field("available", &self.is_available())
            .field("reconnect_pending", &self.reconnect_pending())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager in the [`ConnectionState::Disconnected`] state.
    ///
    /// The device starts out available; the first failure changes that.
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        connector: Arc<C>,
        endpoint: Endpoint,
        policy: ReconnectionPolicy,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                device_id,
                connector,
                endpoint: RwLock::new(endpoint),
                policy,
                events,
                state,
                transport: RwLock::new(None),
                available: AtomicBool::new(true),
                unavailable_reason: RwLock::new(None),
                reconnect_pending: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Watches state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Returns `true` if the device is considered available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }

    /// Returns why the device is unavailable, if it is.
    #[must_use]
    pub fn unavailable_reason(&self) -> Option<String> {
        self.shared.unavailable_reason.read().clone()
    }

    /// Returns `true` if a reconnection attempt is scheduled.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.shared.reconnect_pending.load(Ordering::SeqCst)
    }

    /// Returns the current endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.shared.endpoint.read().clone()
    }

    /// Starts a handshake in the background.
    ///
    /// Does nothing if a handshake is already running or the device is
    /// connected.
    pub fn connect(&self) {
        let current = self.state();
        if matches!(current, ConnectionState::Connecting | ConnectionState::Connected) {
            return;
        }
        self.spawn(None);
    }

    /// Runs a handshake and waits for it.
    ///
    /// # Errors
    ///
    /// Returns the handshake error; the failure path (unavailability and a
    /// scheduled retry) has already been taken when this returns.
    pub async fn connect_now(&self) -> Result<(), TransportError> {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        handshake(&self.shared, generation).await
    }

    /// Returns the transport if the device is connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] without any I/O if the state is anything
    /// but [`ConnectionState::Connected`].
    pub fn ensure_connected(&self) -> Result<Arc<C::Transport>, Error> {
        let state = self.state();
        if !state.is_connected() {
            return Err(Error::NotReady(state.to_string()));
        }
        self.shared
            .transport
            .read()
            .clone()
            .ok_or_else(|| Error::NotReady(ConnectionState::Disconnected.to_string()))
    }

    /// Records a failed remote call.
    ///
    /// Drops the transport, moves to [`ConnectionState::Failed`], marks the
    /// device unavailable and schedules one reconnection attempt. Overlapping
    /// failures while an attempt is pending change nothing.
    pub fn mark_failed(&self, error: &TransportError) {
        fail(&self.shared, &error.to_string());
    }

    /// Records a successful remote call, restoring availability.
    pub fn mark_succeeded(&self) {
        let shared = &self.shared;
        shared.attempts.store(0, Ordering::SeqCst);
        if !shared.available.swap(true, Ordering::SeqCst) {
            shared.unavailable_reason.write().take();
            tracing::info!(device_id = %shared.device_id, "Device available again");
            shared.events.publish(DeviceEvent::available(shared.device_id));
        }
    }

    /// Asks for a connection attempt as soon as possible.
    ///
    /// Used when a caller hits a not-ready connection. A scheduled attempt or
    /// a running handshake is left alone.
    pub fn request_reconnect(&self) {
        let state = self.state();
        if matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
            return;
        }
        if self.shared.reconnect_pending.load(Ordering::SeqCst) {
            tracing::debug!(device_id = %self.shared.device_id, "Reconnect already scheduled");
            return;
        }
        self.spawn(None);
    }

    /// Switches to a new endpoint.
    ///
    /// Cancels any pending attempt, drops the transport and starts a fresh
    /// handshake.
    pub fn reconfigure(&self, endpoint: Endpoint) {
        self.cancel();
        *self.shared.endpoint.write() = endpoint;
        self.shared.attempts.store(0, Ordering::SeqCst);
        tracing::debug!(device_id = %self.shared.device_id, "Connection reconfigured");
        self.spawn(None);
    }

    /// Cancels pending work and disconnects.
    pub fn shutdown(&self) {
        self.cancel();
        tracing::debug!(device_id = %self.shared.device_id, "Connection shut down");
    }

    fn cancel(&self) {
        let shared = &self.shared;
        shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = shared.task.lock().take() {
            task.abort();
        }
        shared.reconnect_pending.store(false, Ordering::SeqCst);
        shared.transport.write().take();
        shared.state.send_replace(ConnectionState::Disconnected);
    }

    fn spawn(&self, delay: Option<Duration>) {
        spawn_attempt(&self.shared, delay);
    }
}

impl<C: Connector> Drop for Shared<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

fn spawn_attempt<C: Connector>(shared: &Arc<Shared<C>>, delay: Option<Duration>) {
    let generation = shared.generation.load(Ordering::SeqCst);
    // Weak, so an idle manager can be dropped while a retry sleeps.
    let weak = Arc::downgrade(shared);
    if delay.is_none() {
        shared.reconnect_pending.store(false, Ordering::SeqCst);
        shared.state.send_replace(ConnectionState::Connecting);
    }

    let task = tokio::spawn(async move {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let Some(shared) = weak.upgrade() else { return };
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        shared.reconnect_pending.store(false, Ordering::SeqCst);
        if delay.is_some() && shared.state.borrow().is_connected() {
            return;
        }
        let _ = handshake(&shared, generation).await;
    });

    if let Some(previous) = shared.task.lock().replace(task) {
        // An immediate attempt supersedes a scheduled one.
        if delay.is_none() {
            previous.abort();
        }
    }
}

async fn handshake<C: Connector>(shared: &Arc<Shared<C>>, generation: u64) -> Result<(), TransportError> {
    let endpoint = shared.endpoint.read().clone();
    shared.state.send_replace(ConnectionState::Connecting);
    tracing::debug!(device_id = %shared.device_id, address = %endpoint.address(), "Connecting");

    let result = shared.connector.connect(&endpoint).await;
    if shared.generation.load(Ordering::SeqCst) != generation {
        tracing::debug!(device_id = %shared.device_id, "Discarding stale handshake result");
        return result.map(|_| ());
    }

    match result {
        Ok(transport) => {
            *shared.transport.write() = Some(Arc::new(transport));
            shared.state.send_replace(ConnectionState::Connected);
            tracing::debug!(device_id = %shared.device_id, "Connected");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(device_id = %shared.device_id, error = %e, "Handshake failed");
            fail(shared, &e.to_string());
            Err(e)
        }
    }
}

fn fail<C: Connector>(shared: &Arc<Shared<C>>, reason: &str) {
    if *shared.state.borrow() == ConnectionState::Disconnected {
        tracing::debug!(device_id = %shared.device_id, reason, "Failure after disconnect ignored");
        return;
    }
    if shared.reconnect_pending.load(Ordering::SeqCst) && shared.state.borrow().is_failed() {
        tracing::debug!(device_id = %shared.device_id, reason, "Failure while reconnect pending");
        return;
    }

    shared.transport.write().take();
    shared
        .state
        .send_replace(ConnectionState::Failed(reason.to_string()));

    if shared.available.swap(false, Ordering::SeqCst) {
        *shared.unavailable_reason.write() = Some(reason.to_string());
        tracing::info!(device_id = %shared.device_id, reason, "Device unavailable");
        shared
            .events
            .publish(DeviceEvent::unavailable(shared.device_id, reason));
    }

    schedule_reconnect(shared);
}

fn schedule_reconnect<C: Connector>(shared: &Arc<Shared<C>>) {
    let attempt = shared.attempts.load(Ordering::SeqCst);
    if !shared.policy.should_retry(attempt) {
        tracing::warn!(device_id = %shared.device_id, attempt, "Giving up reconnecting");
        return;
    }
    if shared.reconnect_pending.swap(true, Ordering::SeqCst) {
        return;
    }

    shared.attempts.fetch_add(1, Ordering::SeqCst);
    let delay = shared.policy.delay_for_attempt(attempt);
    tracing::info!(
        device_id = %shared.device_id,
        delay_secs = delay.as_secs(),
        "Reconnect scheduled"
    );
    spawn_attempt(shared, Some(delay));
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::protocol::mock::{MockConnector, MockTransport};

    fn manager(connector: &MockConnector) -> (ConnectionManager<MockConnector>, EventBus) {
        let events = EventBus::new();
        let manager = ConnectionManager::new(
            DeviceId::new(),
            Arc::new(connector.clone()),
            Endpoint::new("10.0.0.9", "token"),
            ReconnectionPolicy::default(),
            events.clone(),
        );
        (manager, events)
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_before_handshake() {
        let connector = MockConnector::new(MockTransport::new());
        let (manager, _) = manager(&connector);

        assert!(matches!(manager.ensure_connected(), Err(Error::NotReady(_))));
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_runs_in_background() {
        let connector = MockConnector::new(MockTransport::new());
        let (manager, _) = manager(&connector);

        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        settle().await;

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.ensure_connected().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_schedules_single_reconnect_after_sixty_seconds() {
        let connector = MockConnector::new(MockTransport::new());
        let (manager, events) = manager(&connector);
        let mut rx = events.subscribe();
        manager.connect_now().await.unwrap();

        manager.mark_failed(&TransportError::Timeout(5000));
        manager.mark_failed(&TransportError::Timeout(5000));

        assert!(manager.state().is_failed());
        assert!(!manager.is_available());
        assert!(manager.reconnect_pending());
        assert!(matches!(manager.ensure_connected(), Err(Error::NotReady(_))));
        assert_eq!(
            rx.try_recv().unwrap(),
            DeviceEvent::unavailable(manager.shared.device_id, "request timed out after 5000 ms")
        );
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(59)).await;
        settle().await;
        assert_eq!(connector.connects(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(connector.connects(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(!manager.reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_does_not_restore_availability() {
        let connector = MockConnector::new(MockTransport::new());
        let (manager, _) = manager(&connector);
        manager.connect_now().await.unwrap();
        manager.mark_failed(&TransportError::Closed);

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert!(manager.state().is_connected());
        assert!(!manager.is_available());

        manager.mark_succeeded();
        assert!(manager.is_available());
        assert_eq!(manager.unavailable_reason(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_handshake_retries_later() {
        let connector = MockConnector::new(MockTransport::new());
        connector.fail_next(1);
        let (manager, _) = manager(&connector);

        assert!(manager.connect_now().await.is_err());
        assert!(manager.state().is_failed());
        assert!(manager.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(connector.connects(), 2);
        assert!(manager.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_cancels_pending_reconnect() {
        let connector = MockConnector::new(MockTransport::new());
        let (manager, _) = manager(&connector);
        manager.connect_now().await.unwrap();
        manager.mark_failed(&TransportError::Closed);
        assert!(manager.reconnect_pending());

        manager.reconfigure(Endpoint::new("10.0.0.10", "token"));
        assert!(!manager.reconnect_pending());
        settle().await;
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.endpoints()[1].address(), "10.0.0.10");

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn request_reconnect_respects_schedule() {
        let connector = MockConnector::new(MockTransport::new());
        let (manager, _) = manager(&connector);
        manager.connect_now().await.unwrap();
        manager.mark_failed(&TransportError::Closed);

        manager.request_reconnect();
        settle().await;
        assert_eq!(connector.connects(), 1);

        manager.shutdown();
        manager.request_reconnect();
        settle().await;
        assert_eq!(connector.connects(), 2);
    }
}
