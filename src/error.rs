// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `miot_sync` library.
//!
//! Errors fall into four families that decide how far they travel:
//!
//! - [`TransportError`]: the link itself failed (timeout, refused, closed).
//!   This is the only family that escalates to device availability.
//! - [`ProtocolError`]: the device answered, but with a nonzero result code.
//! - [`Error::UnsupportedCapability`]: the active model has no address for
//!   the requested capability.
//! - [`ValueError`]: a value failed validation before any remote call.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A value was rejected before being sent to the device.
    #[error("invalid value: {0}")]
    Value(#[from] ValueError),

    /// The transport failed to complete a remote call.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The device answered with an error code.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The active model does not expose this capability.
    #[error("capability {capability} is not supported by model {model}")]
    UnsupportedCapability {
        /// The capability that was requested.
        capability: String,
        /// The model identifier of the device.
        model: String,
    },

    /// The connection is not established; the request was not sent.
    #[error("device is not ready: {0}")]
    NotReady(String),

    /// Device was not found in the manager.
    #[error("device not found")]
    DeviceNotFound,

    /// A host store rejected a write.
    #[error("store error: {0}")]
    Store(String),

    /// Derived state could not be loaded or saved.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Device configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns `true` if this error should change device availability.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Errors raised while validating a capability value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    /// A numeric value is outside the allowed range.
    #[error("value {actual} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Minimum allowed value.
        min: f64,
        /// Maximum allowed value.
        max: f64,
        /// The actual value that was provided.
        actual: f64,
    },

    /// The value has the wrong type for the property.
    #[error("expected a {expected} value for {property}")]
    WrongType {
        /// The property being written.
        property: String,
        /// The expected value kind.
        expected: &'static str,
    },

    /// An enum label that the property does not define.
    #[error("unknown option {label:?} for {property}")]
    UnknownOption {
        /// The property being written.
        property: String,
        /// The label that was provided.
        label: String,
    },

    /// The property can be read but not written.
    #[error("{0} is read-only")]
    ReadOnly(String),
}

/// Errors raised by the transport for a whole remote call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The call did not complete within its timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The device could not be reached or refused the connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The handshake was rejected (wrong token or address).
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The device replied with something that is not a valid response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The transport was torn down while the call was pending.
    #[error("transport closed")]
    Closed,
}

/// Errors reported by the device inside an otherwise successful call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The device rejected a property operation with a result code.
    #[error("device returned code {code} for {name}")]
    ResultCode {
        /// The symbolic property or action name.
        name: String,
        /// The nonzero result code.
        code: i64,
    },

    /// The response did not contain an entry for the request.
    #[error("no result for {0}")]
    MissingResult(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_error_display() {
        let err = ValueError::OutOfRange {
            min: 0.0,
            max: 100.0,
            actual: 150.0,
        };
        assert_eq!(err.to_string(), "value 150 is out of range [0, 100]");
    }

    #[test]
    fn error_from_transport_error_escalates() {
        let err: Error = TransportError::Timeout(5000).into();
        assert!(err.is_transport());
        assert_eq!(
            err.to_string(),
            "transport error: request timed out after 5000 ms"
        );
    }

    #[test]
    fn protocol_error_does_not_escalate() {
        let err: Error = ProtocolError::ResultCode {
            name: "mode".to_string(),
            code: -4004,
        }
        .into();
        assert!(!err.is_transport());
    }

    #[test]
    fn unsupported_capability_display() {
        let err = Error::UnsupportedCapability {
            capability: "child_lock".to_string(),
            model: "acme.fan.v1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "capability child_lock is not supported by model acme.fan.v1"
        );
    }
}
