// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

//! Deduplicating time windows for Arcon streams.
//!
//! Two windows keep a single live event per unique key:
//!
//! * [SlidingUniqueWindow](stream::operator::window::SlidingUniqueWindow) forwards
//!   every arrival and retracts the event a key held before, or retracts it once the
//!   window length has passed.
//! * [TumblingUniqueBatchWindow](stream::operator::window::TumblingUniqueBatchWindow)
//!   keeps the first event per key of each interval and emits the interval as one batch.
//!
//! Retractions travel downstream as EXPIRED events, batch boundaries are led by RESET events.

// Public Interface

/// Configuration of clocks, loggers and the scheduler driver
pub mod conf;
/// Events, attributes and event chunks
pub mod data;
/// Error types
pub mod error;
/// Window snapshots and their catalog
pub mod manager;
/// Wake-up scheduling for windows
pub mod scheduler;
/// Windows, sinks and time
pub mod stream;

// Internal modules

/// Test module containing some more complex unit tests
#[cfg(test)]
mod test;
/// Internal Utilities
mod util;

/// Helper module that imports everything related to unique windows into scope
pub mod prelude {
    pub use crate::{
        conf::{logger::UniqueLogger, UniqueConf},
        data::{Attribute, Event, EventChunk, EventType, StateID, Value},
        error::{Error, UniqueResult},
        manager::snapshot::{Checkpointable, SnapshotCatalog, StateSnapshot},
        scheduler::{Scheduler, SchedulerDriver, WheelScheduler},
        stream::{
            operator::{
                sink::debug::DebugSink,
                window::{
                    Constant, KeyExtractor, Parameter, SlidingUniqueWindow,
                    TumblingUniqueBatchWindow, UniqueKey, WindowContext,
                },
                FindableProcessor, Processor, SchedulingProcessor,
            },
            time::{Clock, EventClock, ManualClock, SystemClock, TimeMode},
        },
    };
}
