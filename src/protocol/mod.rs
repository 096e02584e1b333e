// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote call plumbing.
//!
//! Appliances speak a property-oriented RPC protocol with three methods:
//! `get_properties`, `set_properties` and `action`. This module defines the
//! seam to the transport that carries those calls and the batched reader
//! built on top of it.
//!
//! # Traits
//!
//! - [`Transport`]: issues one remote call
//! - [`Connector`]: performs the handshake that yields a transport
//!
//! The wire encryption and session handling live behind these traits and
//! are supplied by the host. [`mock`] provides a simulated appliance for
//! tests.

mod message;
#[cfg(feature = "mock")]
pub mod mock;
mod reader;

pub use message::{ActionCall, ActionReply, PropertyQuery, PropertyReply, PropertyWrite, WriteReply};
pub use reader::{
    ABSENT_CODE, BatchedReader, PropertyReading, ReadOutcome, ReadPolicy, ReadRequest, ReadResult,
};

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::error::TransportError;

/// Method name for batched property reads.
pub const GET_PROPERTIES: &str = "get_properties";
/// Method name for batched property writes.
pub const SET_PROPERTIES: &str = "set_properties";
/// Method name for action invocations.
pub const ACTION: &str = "action";

/// Per-call options handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Upper bound for this attempt; the engine enforces it as well.
    pub timeout: Duration,
    /// Attempts the engine will still make if this one fails.
    ///
    /// Transports must not retry on their own.
    pub retries: u32,
}

impl CallOptions {
    /// Creates options with the given timeout and no retries.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            retries: 0,
        }
    }

    /// Sets the number of engine-side retries.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// A connected channel to one appliance.
pub trait Transport: Send + Sync + 'static {
    /// Issues one remote call and returns the `result` member of the reply.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the call could not be completed.
    fn call(
        &self,
        method: &str,
        params: Value,
        options: CallOptions,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;
}

/// Network location and credentials of an appliance.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: String,
    token: String,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
        }
    }

    /// Returns the host address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the device token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Performs the handshake that yields a [`Transport`].
pub trait Connector: Send + Sync + 'static {
    /// The transport produced by a successful handshake.
    type Transport: Transport;

    /// Connects to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the appliance is unreachable or rejects
    /// the credentials.
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// Issues a call with a hard timeout, retrying transport failures.
///
/// The call is attempted `1 + options.retries` times. Each attempt is
/// bounded by `options.timeout` regardless of what the transport does.
///
/// # Errors
///
/// Returns the error of the last attempt.
pub async fn call_with_retry<T: Transport>(
    transport: &T,
    method: &str,
    params: &Value,
    options: CallOptions,
) -> Result<Value, TransportError> {
    let mut remaining = options.retries;
    loop {
        let attempt = CallOptions {
            retries: remaining,
            ..options
        };
        let result = tokio::time::timeout(options.timeout, transport.call(method, params.clone(), attempt))
            .await
            .unwrap_or_else(|_| Err(TransportError::Timeout(millis(options.timeout))));

        match result {
            Ok(value) => return Ok(value),
            Err(e) if remaining > 0 => {
                tracing::debug!(method, error = %e, remaining, "Remote call failed, retrying");
                remaining -= 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
