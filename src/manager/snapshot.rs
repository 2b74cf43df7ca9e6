// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::{
    conf::logger::UniqueLogger,
    data::{Event, StateID},
    error::{Error, UniqueResult},
};
use bytes::Bytes;
use fxhash::FxHashMap;
use prost::{Message as PMessage, Oneof as POneof};
use slog::debug;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

/// An ordered list of events
#[derive(PMessage, Clone, PartialEq)]
pub struct EventList {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<Event>,
}

/// An event stored under its dedup key
#[derive(PMessage, Clone, PartialEq)]
pub struct KeyedEvent {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, required, tag = "2")]
    pub event: Event,
}

#[derive(PMessage, Clone, PartialEq)]
pub struct KeyedEventList {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<KeyedEvent>,
}

#[derive(POneof, Clone, PartialEq)]
pub enum FieldValue {
    #[prost(message, tag = "1")]
    Events(EventList),
    #[prost(message, tag = "2")]
    Event(Event),
    #[prost(message, tag = "3")]
    Keyed(KeyedEventList),
    #[prost(uint64, tag = "4")]
    Time(u64),
}

/// A single snapshot field, a missing value stands for null
#[derive(PMessage, Clone, PartialEq)]
pub struct SnapshotField {
    #[prost(oneof = "FieldValue", tags = "1, 2, 3, 4")]
    pub value: Option<FieldValue>,
}

/// Named fields capturing the complete state of a window instance
#[derive(PMessage, Clone, PartialEq)]
pub struct StateSnapshot {
    #[prost(map = "string, message", tag = "1")]
    pub fields: HashMap<String, SnapshotField>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn put(&mut self, name: &str, value: Option<FieldValue>) {
        self.fields.insert(name.to_string(), SnapshotField { value });
    }

    pub fn put_events(&mut self, name: &str, events: Vec<Event>) {
        self.put(name, Some(FieldValue::Events(EventList { events })));
    }

    /// Stores a single nullable event
    pub fn put_event(&mut self, name: &str, event: Option<Event>) {
        self.put(name, event.map(FieldValue::Event));
    }

    pub fn put_keyed(&mut self, name: &str, entries: Vec<KeyedEvent>) {
        self.put(name, Some(FieldValue::Keyed(KeyedEventList { entries })));
    }

    pub fn put_time(&mut self, name: &str, time: u64) {
        self.put(name, Some(FieldValue::Time(time)));
    }

    fn take(&mut self, name: &str) -> UniqueResult<Option<FieldValue>> {
        self.fields
            .remove(name)
            .map(|field| field.value)
            .ok_or_else(|| Error::state_restore(format!("snapshot is missing field '{}'", name)))
    }

    fn wrong_type(name: &str, expected: &str) -> Error {
        Error::state_restore(format!("snapshot field '{}' is not {}", name, expected))
    }

    /// Removes an event list field, a null list reads as empty
    pub fn take_events(&mut self, name: &str) -> UniqueResult<Vec<Event>> {
        match self.take(name)? {
            Some(FieldValue::Events(list)) => Ok(list.events),
            None => Ok(Vec::new()),
            Some(_) => Err(Self::wrong_type(name, "an event list")),
        }
    }

    pub fn take_event(&mut self, name: &str) -> UniqueResult<Option<Event>> {
        match self.take(name)? {
            Some(FieldValue::Event(event)) => Ok(Some(event)),
            None => Ok(None),
            Some(_) => Err(Self::wrong_type(name, "an event")),
        }
    }

    pub fn take_keyed(&mut self, name: &str) -> UniqueResult<Vec<KeyedEvent>> {
        match self.take(name)? {
            Some(FieldValue::Keyed(list)) => Ok(list.entries),
            None => Ok(Vec::new()),
            Some(_) => Err(Self::wrong_type(name, "a keyed event list")),
        }
    }

    pub fn take_time(&mut self, name: &str) -> UniqueResult<Option<u64>> {
        match self.take(name)? {
            Some(FieldValue::Time(time)) => Ok(Some(time)),
            None => Ok(None),
            Some(_) => Err(Self::wrong_type(name, "a timestamp")),
        }
    }

    /// Serialises the snapshot with prost
    pub fn to_bytes(&self) -> UniqueResult<Bytes> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)
            .or_else(|e| crate::reportable_error!("failed to encode snapshot {}", e))?;
        Ok(Bytes::from(buf))
    }

    /// Deserialises a snapshot, malformed input is a restore error
    pub fn from_bytes(bytes: &[u8]) -> UniqueResult<StateSnapshot> {
        Ok(StateSnapshot::decode(bytes)?)
    }
}

/// Window state that can be captured and restored
///
/// Both operations run under the same lock as ordinary processing.
pub trait Checkpointable {
    /// Identifier of the state in a [SnapshotCatalog]
    fn state_id(&self) -> &str;
    /// Captures the complete state
    fn snapshot(&self) -> UniqueResult<StateSnapshot>;
    /// Replaces the complete state with the snapshot's contents
    fn restore(&self, snapshot: StateSnapshot) -> UniqueResult<()>;
}

#[derive(Default)]
struct Catalogs {
    /// Snapshots of epochs that have not been committed yet
    uncommitted: FxHashMap<u64, FxHashMap<StateID, Bytes>>,
    /// Committed snapshots ordered by epoch
    committed: BTreeMap<u64, FxHashMap<StateID, Bytes>>,
}

/// In-memory catalog of encoded window snapshots per epoch
pub struct SnapshotCatalog {
    catalogs: Mutex<Catalogs>,
    logger: UniqueLogger,
}

impl SnapshotCatalog {
    pub fn new(logger: UniqueLogger) -> Self {
        SnapshotCatalog {
            catalogs: Mutex::new(Catalogs::default()),
            logger,
        }
    }

    /// Captures `state` as part of `epoch`
    pub fn checkpoint(&self, epoch: u64, state: &dyn Checkpointable) -> UniqueResult<()> {
        let bytes = state.snapshot()?.to_bytes()?;
        debug!(
            self.logger,
            "Captured {} bytes of state {} for epoch {}",
            bytes.len(),
            state.state_id(),
            epoch
        );
        let mut catalogs = self.lock()?;
        catalogs
            .uncommitted
            .entry(epoch)
            .or_insert_with(FxHashMap::default)
            .insert(state.state_id().to_string(), bytes);
        Ok(())
    }

    /// Marks every snapshot of `epoch` as restorable
    pub fn commit(&self, epoch: u64) -> UniqueResult<()> {
        let mut catalogs = self.lock()?;
        if let Some(snapshots) = catalogs.uncommitted.remove(&epoch) {
            debug!(
                self.logger,
                "Committing {} snapshots for epoch {}",
                snapshots.len(),
                epoch
            );
            catalogs.committed.insert(epoch, snapshots);
        }
        Ok(())
    }

    /// Latest committed epoch holding a snapshot of `state_id`
    pub fn latest_epoch(&self, state_id: &str) -> UniqueResult<Option<u64>> {
        let catalogs = self.lock()?;
        Ok(catalogs
            .committed
            .iter()
            .rev()
            .find(|(_, snapshots)| snapshots.contains_key(state_id))
            .map(|(epoch, _)| *epoch))
    }

    /// Restores `state` from the latest committed epoch containing it
    ///
    /// Returns the restored epoch, or `None` if no snapshot exists.
    pub fn restore_latest(&self, state: &dyn Checkpointable) -> UniqueResult<Option<u64>> {
        let found = {
            let catalogs = self.lock()?;
            catalogs
                .committed
                .iter()
                .rev()
                .find_map(|(epoch, snapshots)| {
                    snapshots
                        .get(state.state_id())
                        .map(|bytes| (*epoch, bytes.clone()))
                })
        };

        match found {
            Some((epoch, bytes)) => {
                let snapshot = StateSnapshot::from_bytes(&bytes)?;
                state.restore(snapshot)?;
                debug!(
                    self.logger,
                    "Restored state {} from epoch {}",
                    state.state_id(),
                    epoch
                );
                Ok(Some(epoch))
            }
            None => Ok(None),
        }
    }

    fn lock(&self) -> UniqueResult<std::sync::MutexGuard<'_, Catalogs>> {
        self.catalogs
            .lock()
            .or_else(|_| crate::reportable_error!("snapshot catalog lock poisoned"))
    }
}
