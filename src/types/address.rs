// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Composite remote addresses.
//!
//! Appliances address each property by a service id and a property id, and
//! each action by a service id and an action id. The engine never looks
//! inside these keys beyond equality and hashing; they exist so the wire
//! layer can build requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Remote address of a property (`siid`, `piid`).
///
/// # Examples
///
/// ```
/// use miot_sync::types::PropertyAddress;
///
/// let addr = PropertyAddress::new(2, 1);
/// assert_eq!(addr.to_string(), "2.1");
/// assert_eq!("2.1".parse::<PropertyAddress>().unwrap(), addr);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyAddress {
    siid: u16,
    piid: u16,
}

impl PropertyAddress {
    /// Creates a property address.
    #[must_use]
    pub const fn new(siid: u16, piid: u16) -> Self {
        Self { siid, piid }
    }

    /// Returns the service id.
    #[must_use]
    pub const fn siid(&self) -> u16 {
        self.siid
    }

    /// Returns the property id within the service.
    #[must_use]
    pub const fn piid(&self) -> u16 {
        self.piid
    }
}

impl fmt::Display for PropertyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.siid, self.piid)
    }
}

impl FromStr for PropertyAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (siid, piid) = parse_pair(s)?;
        Ok(Self::new(siid, piid))
    }
}

/// Remote address of an action (`siid`, `aiid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionAddress {
    siid: u16,
    aiid: u16,
}

impl ActionAddress {
    /// Creates an action address.
    #[must_use]
    pub const fn new(siid: u16, aiid: u16) -> Self {
        Self { siid, aiid }
    }

    /// Returns the service id.
    #[must_use]
    pub const fn siid(&self) -> u16 {
        self.siid
    }

    /// Returns the action id within the service.
    #[must_use]
    pub const fn aiid(&self) -> u16 {
        self.aiid
    }
}

impl fmt::Display for ActionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.siid, self.aiid)
    }
}

impl FromStr for ActionAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (siid, aiid) = parse_pair(s)?;
        Ok(Self::new(siid, aiid))
    }
}

fn parse_pair(s: &str) -> Result<(u16, u16), Error> {
    let invalid = || Error::Config(format!("invalid address {s:?}, expected <siid>.<id>"));
    let (left, right) = s.trim().split_once('.').ok_or_else(invalid)?;
    let siid = left.parse().map_err(|_| invalid())?;
    let id = right.parse().map_err(|_| invalid())?;
    Ok((siid, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_address_parse_and_display() {
        let addr: PropertyAddress = "13.2".parse().unwrap();
        assert_eq!(addr.siid(), 13);
        assert_eq!(addr.piid(), 2);
        assert_eq!(addr.to_string(), "13.2");
    }

    #[test]
    fn property_address_rejects_garbage() {
        assert!("13".parse::<PropertyAddress>().is_err());
        assert!("a.b".parse::<PropertyAddress>().is_err());
        assert!("1.99999".parse::<PropertyAddress>().is_err());
    }

    #[test]
    fn action_address_parse() {
        let addr: ActionAddress = "2.1".parse().unwrap();
        assert_eq!(addr, ActionAddress::new(2, 1));
    }

    #[test]
    fn addresses_are_hashable() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PropertyAddress::new(2, 1));
        set.insert(PropertyAddress::new(2, 1));
        set.insert(PropertyAddress::new(2, 2));
        assert_eq!(set.len(), 2);
    }
}
