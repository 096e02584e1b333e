// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire representation of property and action calls.
//!
//! The `did` member is echoed back by the appliance; the engine sets it to
//! the symbolic property name so replies can be matched without relying on
//! their order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ActionAddress, PropertyAddress};

/// One entry of a `get_properties` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyQuery {
    /// Correlation id, echoed by the device.
    pub did: String,
    /// Service id.
    pub siid: u16,
    /// Property id.
    pub piid: u16,
}

impl PropertyQuery {
    /// Creates a query for `address`, correlated by `name`.
    #[must_use]
    pub fn new(name: &str, address: PropertyAddress) -> Self {
        Self {
            did: name.to_string(),
            siid: address.siid(),
            piid: address.piid(),
        }
    }

    /// Returns the queried address.
    #[must_use]
    pub const fn address(&self) -> PropertyAddress {
        PropertyAddress::new(self.siid, self.piid)
    }
}

/// One entry of a `get_properties` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyReply {
    /// Correlation id from the request.
    #[serde(default)]
    pub did: String,
    /// Service id.
    pub siid: u16,
    /// Property id.
    pub piid: u16,
    /// Result code; `0` is success.
    pub code: i64,
    /// The value, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PropertyReply {
    /// Returns the replied address.
    #[must_use]
    pub const fn address(&self) -> PropertyAddress {
        PropertyAddress::new(self.siid, self.piid)
    }
}

/// One entry of a `set_properties` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyWrite {
    /// Correlation id, echoed by the device.
    pub did: String,
    /// Service id.
    pub siid: u16,
    /// Property id.
    pub piid: u16,
    /// Raw value to write.
    pub value: Value,
}

impl PropertyWrite {
    /// Creates a write of `value` to `address`.
    #[must_use]
    pub fn new(name: &str, address: PropertyAddress, value: Value) -> Self {
        Self {
            did: name.to_string(),
            siid: address.siid(),
            piid: address.piid(),
            value,
        }
    }
}

/// One entry of a `set_properties` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReply {
    /// Correlation id from the request.
    #[serde(default)]
    pub did: String,
    /// Service id.
    pub siid: u16,
    /// Property id.
    pub piid: u16,
    /// Result code; `0` is success.
    pub code: i64,
}

/// Parameters of an `action` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    /// Correlation id, echoed by the device.
    pub did: String,
    /// Service id.
    pub siid: u16,
    /// Action id.
    pub aiid: u16,
    /// Input arguments.
    #[serde(rename = "in", default)]
    pub args: Vec<Value>,
}

impl ActionCall {
    /// Creates an invocation of `address` with `args`.
    #[must_use]
    pub fn new(name: &str, address: ActionAddress, args: Vec<Value>) -> Self {
        Self {
            did: name.to_string(),
            siid: address.siid(),
            aiid: address.aiid(),
            args,
        }
    }
}

/// Reply of an `action` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReply {
    /// Result code; `0` is success.
    pub code: i64,
    /// Output arguments.
    #[serde(rename = "out", default)]
    pub out: Vec<Value>,
}
