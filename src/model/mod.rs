// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-model property address tables.
//!
//! A [`ModelTable`] maps symbolic capability names to remote addresses for
//! one appliance model. Tables are plain data: the engine resolves one table
//! at startup and stays model-agnostic afterwards.
//!
//! # Built-in Tables
//!
//! [`ModelTable::for_model`] resolves the tables shipped with the crate.
//! Custom tables can be assembled with [`ModelTable::builder`] or loaded from
//! JSON, since every type here implements `serde`.
//!
//! # Examples
//!
//! ```
//! use miot_sync::model::{DeviceCategory, ModelTable, PropertySpec};
//! use miot_sync::types::ValueKind;
//!
//! let table = ModelTable::builder("acme.fan.v1", DeviceCategory::Fan)
//!     .property(PropertySpec::read_write("power", 2, 1, ValueKind::Bool))
//!     .property(PropertySpec::read("temperature", 3, 7, ValueKind::number(-40.0, 125.0)))
//!     .build();
//!
//! assert!(table.property("power").unwrap().is_writable());
//! assert!(table.property("child_lock").is_none());
//! ```

mod catalog;
mod profile;

pub use profile::{ConsumableSpec, DailyCounterSpec, DerivedProfile, DurationSpec};

use serde::{Deserialize, Serialize};

use crate::error::{Error, ValueError};
use crate::protocol::ReadRequest;
use crate::types::{ActionAddress, PropertyAddress, ValueKind};

/// Broad appliance family a table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    /// Air purifier.
    AirPurifier,
    /// Evaporative or ultrasonic humidifier.
    Humidifier,
    /// Standing or tower fan.
    Fan,
    /// Robot vacuum.
    Vacuum,
    /// Pet food feeder.
    PetFeeder,
    /// Pet water fountain.
    PetFountain,
    /// Curtain motor.
    Curtain,
    /// Anything else.
    Other,
}

/// Whether a property can be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Read and notify only.
    #[default]
    Read,
    /// Readable and writable.
    ReadWrite,
}

/// One addressable property of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Symbolic name, also the capability name when exposed.
    pub name: String,
    /// Remote address.
    pub address: PropertyAddress,
    /// Raw value interpretation.
    pub kind: ValueKind,
    /// Read-only or writable.
    #[serde(default)]
    pub access: Access,
    /// Trigger fired when the value changes between polls.
    #[serde(default)]
    pub trigger: Option<String>,
    /// Host setting mirrored in both directions.
    #[serde(default)]
    pub setting: Option<String>,
    /// `false` for properties only consumed by derived state.
    #[serde(default = "default_exposed")]
    pub exposed: bool,
}

fn default_exposed() -> bool {
    true
}

impl PropertySpec {
    /// Creates a read-only property.
    #[must_use]
    pub fn read(name: impl Into<String>, siid: u16, piid: u16, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            address: PropertyAddress::new(siid, piid),
            kind,
            access: Access::Read,
            trigger: None,
            setting: None,
            exposed: true,
        }
    }

    /// Creates a writable property.
    #[must_use]
    pub fn read_write(name: impl Into<String>, siid: u16, piid: u16, kind: ValueKind) -> Self {
        Self {
            access: Access::ReadWrite,
            ..Self::read(name, siid, piid, kind)
        }
    }

    /// Fires `trigger` whenever the value changes.
    #[must_use]
    pub fn edge_triggered(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    /// Mirrors the value into the host setting `key`.
    #[must_use]
    pub fn mirrored(mut self, key: impl Into<String>) -> Self {
        self.setting = Some(key.into());
        self
    }

    /// Reads the property without exposing it as a capability.
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.exposed = false;
        self
    }

    /// Returns `true` if the property can be written.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Returns `true` if value changes fire a trigger.
    #[must_use]
    pub fn is_edge_triggered(&self) -> bool {
        self.trigger.is_some()
    }
}

/// One invocable action of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Symbolic name.
    pub name: String,
    /// Remote address.
    pub address: ActionAddress,
}

impl ActionSpec {
    /// Creates an action.
    #[must_use]
    pub fn new(name: impl Into<String>, siid: u16, aiid: u16) -> Self {
        Self {
            name: name.into(),
            address: ActionAddress::new(siid, aiid),
        }
    }
}

/// Address table for one appliance model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTable {
    model: String,
    category: DeviceCategory,
    properties: Vec<PropertySpec>,
    #[serde(default)]
    actions: Vec<ActionSpec>,
    #[serde(default)]
    derived: DerivedProfile,
}

impl ModelTable {
    /// Starts building a custom table.
    #[must_use]
    pub fn builder(model: impl Into<String>, category: DeviceCategory) -> ModelTableBuilder {
        ModelTableBuilder::new(model, category)
    }

    /// Returns the built-in table for `model`, if the crate ships one.
    #[must_use]
    pub fn for_model(model: &str) -> Option<Self> {
        catalog::lookup(model)
    }

    /// Returns the identifiers of all built-in tables.
    #[must_use]
    pub fn known_models() -> &'static [&'static str] {
        catalog::MODELS
    }

    /// Returns the model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the appliance family.
    #[must_use]
    pub fn category(&self) -> DeviceCategory {
        self.category
    }

    /// Returns all properties in table order.
    #[must_use]
    pub fn properties(&self) -> &[PropertySpec] {
        &self.properties
    }

    /// Returns all actions.
    #[must_use]
    pub fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }

    /// Returns the derived-state profile.
    #[must_use]
    pub fn derived(&self) -> &DerivedProfile {
        &self.derived
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up an action by name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Looks up the property mirrored into the host setting `key`.
    #[must_use]
    pub fn property_for_setting(&self, key: &str) -> Option<&PropertySpec> {
        self.properties
            .iter()
            .find(|p| p.setting.as_deref() == Some(key))
    }

    /// Returns the properties mirrored into host settings.
    pub fn mirrored(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.iter().filter(|p| p.setting.is_some())
    }

    /// Resolves a capability for writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCapability`] if the table has no such
    /// property, or [`ValueError::ReadOnly`] if it cannot be written.
    pub fn writable(&self, name: &str) -> Result<&PropertySpec, Error> {
        let spec = self
            .property(name)
            .ok_or_else(|| Error::UnsupportedCapability {
                capability: name.to_string(),
                model: self.model.clone(),
            })?;
        if !spec.is_writable() {
            return Err(ValueError::ReadOnly(name.to_string()).into());
        }
        Ok(spec)
    }

    /// Builds the read set covering every property of the table.
    #[must_use]
    pub fn read_request(&self) -> ReadRequest {
        self.properties
            .iter()
            .map(|p| (p.name.clone(), p.address))
            .collect()
    }

    /// Names of capabilities the host should expose for this table,
    /// including derived outputs.
    #[must_use]
    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .properties
            .iter()
            .filter(|p| p.exposed)
            .map(|p| p.name.clone())
            .collect();
        for output in self.derived.outputs() {
            if !names.iter().any(|n| n == output) {
                names.push(output.to_string());
            }
        }
        names
    }
}

/// Builder for [`ModelTable`].
#[derive(Debug, Clone)]
pub struct ModelTableBuilder {
    table: ModelTable,
}

impl ModelTableBuilder {
    /// Creates a builder for an empty table.
    #[must_use]
    pub fn new(model: impl Into<String>, category: DeviceCategory) -> Self {
        Self {
            table: ModelTable {
                model: model.into(),
                category,
                properties: Vec::new(),
                actions: Vec::new(),
                derived: DerivedProfile::default(),
            },
        }
    }

    /// Adds a property. A later property with the same name replaces the earlier one.
    #[must_use]
    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.table.properties.retain(|p| p.name != spec.name);
        self.table.properties.push(spec);
        self
    }

    /// Adds an action.
    #[must_use]
    pub fn action(mut self, spec: ActionSpec) -> Self {
        self.table.actions.retain(|a| a.name != spec.name);
        self.table.actions.push(spec);
        self
    }

    /// Sets the derived-state profile.
    #[must_use]
    pub fn derived(mut self, profile: DerivedProfile) -> Self {
        self.table.derived = profile;
        self
    }

    /// Builds the table.
    #[must_use]
    pub fn build(self) -> ModelTable {
        self.table
    }
}
