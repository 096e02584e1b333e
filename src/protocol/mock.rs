// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated appliance for tests.
//!
//! [`MockTransport`] keeps a property map and answers `get_properties`,
//! `set_properties` and `action` the way a real appliance does. Clones share
//! the same appliance, so a test can keep a handle while the engine owns
//! another. Failures, per-property error codes and latency can be injected,
//! and every call is recorded.
//!
//! ```
//! use miot_sync::protocol::mock::MockTransport;
//! use miot_sync::types::PropertyAddress;
//! use serde_json::json;
//!
//! let appliance = MockTransport::new();
//! appliance.set_property(PropertyAddress::new(2, 1), json!(true));
//! appliance.fail_next(2);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use super::message::{ActionCall, PropertyQuery, PropertyWrite};
use super::{ACTION, CallOptions, Connector, Endpoint, GET_PROPERTIES, SET_PROPERTIES, Transport};
use crate::error::TransportError;
use crate::types::{ActionAddress, PropertyAddress};

/// Code returned for properties the appliance does not have.
pub const NOT_FOUND_CODE: i64 = -4003;

/// A call seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Method name.
    pub method: String,
    /// Parameters as sent.
    pub params: Value,
}

#[derive(Debug, Default)]
struct Inner {
    properties: HashMap<PropertyAddress, Value>,
    codes: HashMap<PropertyAddress, i64>,
    action_codes: HashMap<ActionAddress, i64>,
    fail_next: usize,
    fail_always: bool,
    delay: Option<Duration>,
    calls: Vec<RecordedCall>,
}

/// Simulated appliance implementing [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    /// Creates an appliance with no properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value the appliance reports for `address`.
    pub fn set_property(&self, address: PropertyAddress, value: Value) {
        self.inner.lock().properties.insert(address, value);
    }

    /// Returns the value currently held for `address`.
    #[must_use]
    pub fn property(&self, address: PropertyAddress) -> Option<Value> {
        self.inner.lock().properties.get(&address).cloned()
    }

    /// Makes reads and writes of `address` answer with `code`.
    pub fn set_code(&self, address: PropertyAddress, code: i64) {
        self.inner.lock().codes.insert(address, code);
    }

    /// Removes an injected code for `address`.
    pub fn clear_code(&self, address: PropertyAddress) {
        self.inner.lock().codes.remove(&address);
    }

    /// Makes invocations of `address` answer with `code`.
    pub fn set_action_code(&self, address: ActionAddress, code: i64) {
        self.inner.lock().action_codes.insert(address, code);
    }

    /// Fails the next `count` calls with a connection error.
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().fail_next = count;
    }

    /// Fails every call until switched off.
    pub fn fail_always(&self, fail: bool) {
        self.inner.lock().fail_always = fail;
    }

    /// Delays every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.inner.lock().delay = Some(delay);
    }

    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().calls.clone()
    }

    /// Returns the number of recorded calls of `method`.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    fn handle(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let mut inner = self.inner.lock();
        inner.calls.push(RecordedCall {
            method: method.to_string(),
            params: params.clone(),
        });

        if inner.fail_always {
            return Err(TransportError::ConnectionFailed("simulated outage".to_string()));
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(TransportError::ConnectionFailed("simulated failure".to_string()));
        }

        match method {
            GET_PROPERTIES => {
                let queries: Vec<PropertyQuery> = parse(params)?;
                let replies = queries
                    .into_iter()
                    .map(|q| {
                        let address = q.address();
                        match (inner.codes.get(&address), inner.properties.get(&address)) {
                            (Some(code), _) => json!({"did": q.did, "siid": q.siid, "piid": q.piid, "code": code}),
                            (None, Some(value)) => json!({"did": q.did, "siid": q.siid, "piid": q.piid, "code": 0, "value": value}),
                            (None, None) => json!({"did": q.did, "siid": q.siid, "piid": q.piid, "code": NOT_FOUND_CODE}),
                        }
                    })
                    .collect();
                Ok(Value::Array(replies))
            }
            SET_PROPERTIES => {
                let writes: Vec<PropertyWrite> = parse(params)?;
                let replies = writes
                    .into_iter()
                    .map(|w| {
                        let address = PropertyAddress::new(w.siid, w.piid);
                        let code = inner.codes.get(&address).copied().unwrap_or(0);
                        if code == 0 {
                            inner.properties.insert(address, w.value);
                        }
                        json!({"did": w.did, "siid": w.siid, "piid": w.piid, "code": code})
                    })
                    .collect();
                Ok(Value::Array(replies))
            }
            ACTION => {
                let call: ActionCall = parse(params)?;
                let address = ActionAddress::new(call.siid, call.aiid);
                let code = inner.action_codes.get(&address).copied().unwrap_or(0);
                Ok(json!({"code": code, "out": []}))
            }
            other => Err(TransportError::MalformedResponse(format!("unknown method {other}"))),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, TransportError> {
    serde_json::from_value(params).map_err(|e| TransportError::MalformedResponse(e.to_string()))
}

impl Transport for MockTransport {
    async fn call(&self, method: &str, params: Value, _options: CallOptions) -> Result<Value, TransportError> {
        let delay = self.inner.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.handle(method, params)
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    connects: usize,
    fail_next: usize,
    endpoints: Vec<Endpoint>,
}

/// Connector handing out [`MockTransport`] clones of one appliance.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    appliance: MockTransport,
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    /// Creates a connector for `appliance`.
    #[must_use]
    pub fn new(appliance: MockTransport) -> Self {
        Self {
            appliance,
            state: Arc::default(),
        }
    }

    /// Returns the shared appliance.
    #[must_use]
    pub fn appliance(&self) -> &MockTransport {
        &self.appliance
    }

    /// Rejects the next `count` handshakes.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Returns the number of handshake attempts.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Returns the endpoints seen by handshakes, oldest first.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.state.lock().endpoints.clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, endpoint: &Endpoint) -> Result<MockTransport, TransportError> {
        let mut state = self.state.lock();
        state.connects += 1;
        state.endpoints.push(endpoint.clone());
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::Handshake("simulated rejection".to_string()));
        }
        Ok(self.appliance.clone())
    }
}
