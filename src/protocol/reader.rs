// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Batched property reads.
//!
//! Appliances cap the number of properties per `get_properties` call, so a
//! read set is split into fixed-size chunks. Each chunk is one remote call
//! with its own timeout and retry budget; a chunk that still fails leaves
//! its names absent without affecting the other chunks.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::message::{PropertyQuery, PropertyReply};
use super::{CallOptions, GET_PROPERTIES, Transport, call_with_retry};
use crate::error::TransportError;
use crate::types::PropertyAddress;

/// Result code synthesized for names whose chunk failed or that the device
/// did not answer.
pub const ABSENT_CODE: i64 = -1;

/// Chunking, timeout and retry budget for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPolicy {
    /// Maximum properties per remote call.
    pub chunk_size: usize,
    /// Timeout of one remote call.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Retries after a transport failure.
    pub transport_retries: u32,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 14,
            timeout: Duration::from_secs(5),
            transport_retries: 1,
        }
    }
}

impl ReadPolicy {
    /// Sets the chunk size. Zero is treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_transport_retries(mut self, retries: u32) -> Self {
        self.transport_retries = retries;
        self
    }

    /// Returns the options used for every call under this policy.
    #[must_use]
    pub fn call_options(&self) -> CallOptions {
        CallOptions::new(self.timeout).with_retries(self.transport_retries)
    }
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::super::millis(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Ordered set of properties to read.
///
/// Names are unique; adding a name twice keeps the first address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRequest {
    entries: Vec<(String, PropertyAddress)>,
}

impl ReadRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property to the request.
    pub fn push(&mut self, name: impl Into<String>, address: PropertyAddress) {
        let name = name.into();
        if !self.entries.iter().any(|(n, _)| *n == name) {
            self.entries.push((name, address));
        }
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the request is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, address)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, PropertyAddress)> {
        self.entries.iter()
    }

    /// Splits the request into chunks of at most `size` entries.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = &[(String, PropertyAddress)]> {
        self.entries.chunks(size.max(1))
    }
}

impl<S: Into<String>> FromIterator<(S, PropertyAddress)> for ReadRequest {
    fn from_iter<I: IntoIterator<Item = (S, PropertyAddress)>>(iter: I) -> Self {
        let mut request = Self::new();
        for (name, address) in iter {
            request.push(name, address);
        }
        request
    }
}

/// Outcome of one property in a read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyReading {
    /// Result code; `0` is success.
    pub code: i64,
    /// Raw value, only meaningful when `code == 0`.
    pub value: Option<Value>,
}

impl PropertyReading {
    /// A successful reading.
    #[must_use]
    pub fn ok(value: Value) -> Self {
        Self {
            code: 0,
            value: Some(value),
        }
    }

    /// A failed reading with `code`.
    #[must_use]
    pub const fn failed(code: i64) -> Self {
        Self { code, value: None }
    }

    /// Returns `true` if the reading carries a usable value.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.code == 0 && self.value.as_ref().is_some_and(|v| !v.is_null())
    }

    /// Returns the value if the reading is present.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        if self.is_present() {
            self.value.as_ref()
        } else {
            None
        }
    }
}

/// Readings indexed by property name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResult {
    readings: HashMap<String, PropertyReading>,
}

impl ReadResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reading, replacing any previous one for `name`.
    pub fn insert(&mut self, name: impl Into<String>, reading: PropertyReading) {
        self.readings.insert(name.into(), reading);
    }

    /// Returns the reading for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyReading> {
        self.readings.get(name)
    }

    /// Returns the value for `name` if it was read successfully.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.readings.get(name).and_then(PropertyReading::value)
    }

    /// Returns the numeric value for `name` if it was read successfully.
    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(Value::as_f64)
    }

    /// Marks `name` as absent for this cycle.
    pub fn mask(&mut self, name: &str) {
        if let Some(reading) = self.readings.get_mut(name) {
            *reading = PropertyReading::failed(ABSENT_CODE);
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Returns `true` if the result is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Returns the number of present readings.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.readings.values().filter(|r| r.is_present()).count()
    }

    /// Iterates over all readings.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyReading)> {
        self.readings.iter().map(|(n, r)| (n.as_str(), r))
    }
}

impl<S: Into<String>> FromIterator<(S, PropertyReading)> for ReadResult {
    fn from_iter<I: IntoIterator<Item = (S, PropertyReading)>>(iter: I) -> Self {
        Self {
            readings: iter.into_iter().map(|(n, r)| (n.into(), r)).collect(),
        }
    }
}

/// A read result plus what went wrong on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    /// One entry per requested name.
    pub result: ReadResult,
    /// Number of chunks issued.
    pub chunks: usize,
    /// Chunks that failed after their retry budget.
    pub failed_chunks: usize,
    /// The most recent transport error, if any chunk failed.
    pub last_error: Option<TransportError>,
}

impl ReadOutcome {
    /// Returns `true` if at least one chunk failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed_chunks > 0
    }

    /// Returns `true` if every chunk failed.
    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        self.chunks > 0 && self.failed_chunks == self.chunks
    }
}

/// Reads property sets in chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchedReader {
    policy: ReadPolicy,
}

impl BatchedReader {
    /// Creates a reader with the given policy.
    #[must_use]
    pub const fn new(policy: ReadPolicy) -> Self {
        Self { policy }
    }

    /// Returns the reader's policy.
    #[must_use]
    pub const fn policy(&self) -> &ReadPolicy {
        &self.policy
    }

    /// Reads every property of `request`.
    ///
    /// The returned result has exactly one entry per requested name.
    pub async fn read<T: Transport>(&self, transport: &T, request: &ReadRequest) -> ReadOutcome {
        let mut result = ReadResult::new();
        let mut chunks = 0;
        let mut failed_chunks = 0;
        let mut last_error = None;

        for chunk in request.chunks(self.policy.chunk_size) {
            chunks += 1;
            let queries: Vec<PropertyQuery> = chunk
                .iter()
                .map(|(name, address)| PropertyQuery::new(name, *address))
                .collect();

            let reply = call_with_retry(transport, GET_PROPERTIES, &json!(queries), self.policy.call_options())
                .await
                .and_then(|value| match value {
                    Value::Array(items) => Ok(items),
                    other => Err(TransportError::MalformedResponse(format!(
                        "expected an array, got {other}"
                    ))),
                });

            match reply {
                Ok(items) => collect_chunk(chunk, items, &mut result),
                Err(e) => {
                    tracing::warn!(
                        chunk = chunks,
                        size = chunk.len(),
                        error = %e,
                        "Property read failed after retries"
                    );
                    failed_chunks += 1;
                    last_error = Some(e);
                }
            }
        }

        for (name, _) in request.iter() {
            if result.get(name).is_none() {
                result.insert(name.clone(), PropertyReading::failed(ABSENT_CODE));
            }
        }

        tracing::debug!(
            requested = request.len(),
            present = result.present_count(),
            chunks,
            failed_chunks,
            "Property read complete"
        );

        ReadOutcome {
            result,
            chunks,
            failed_chunks,
            last_error,
        }
    }
}

/// Matches reply items to the chunk's names, first by correlation id, then
/// by address. The first successful item for a name wins.
fn collect_chunk(chunk: &[(String, PropertyAddress)], items: Vec<Value>, result: &mut ReadResult) {
    for item in items {
        let reply: PropertyReply = match serde_json::from_value(item) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable property reply");
                continue;
            }
        };

        let name = chunk
            .iter()
            .find(|(name, _)| *name == reply.did)
            .or_else(|| chunk.iter().find(|(_, address)| *address == reply.address()))
            .map(|(name, _)| name.clone());
        let Some(name) = name else {
            tracing::debug!(did = %reply.did, address = %reply.address(), "Reply for unrequested property");
            continue;
        };

        let reading = PropertyReading {
            code: reply.code,
            value: reply.value,
        };
        match result.readings.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(reading);
            }
            Entry::Occupied(mut slot) => {
                if !slot.get().is_present() && reading.is_present() {
                    slot.insert(reading);
                }
            }
        }
    }
}
