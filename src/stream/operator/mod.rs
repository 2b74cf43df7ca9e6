// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// Available sink operators
pub mod sink;
/// Available window operators
pub mod window;

use crate::{
    data::{Event, EventChunk},
    error::UniqueResult,
};

/// Consumer of the chunks a window emits
///
/// Failures are propagated back through the window to the caller that
/// handed it input; windows never retry.
pub trait Processor: Send + Sync {
    fn process(&self, chunk: EventChunk) -> UniqueResult<()>;
}

/// A processor that can be re-entered by a [Scheduler](crate::scheduler::Scheduler)
pub trait SchedulingProcessor: Send + Sync {
    /// Handles a wake-up delivered at `time`
    fn on_wake_up(&self, time: u64) -> UniqueResult<()>;
}

/// A processor exposing the events it currently holds for lookups
pub trait FindableProcessor {
    /// Returns independent copies of every held event matching `condition`
    fn find(&self, condition: &dyn Fn(&Event) -> bool) -> UniqueResult<EventChunk>;
}
