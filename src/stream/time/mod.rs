// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::util::get_system_time;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which notion of time drives the windows
#[derive(Deserialize, PartialEq, Clone, Copy, Debug)]
pub enum TimeMode {
    /// Time advances with the timestamps of arriving events (playback)
    Event,
    /// Wall-clock time
    Process,
}

impl Default for TimeMode {
    fn default() -> Self {
        TimeMode::Process
    }
}

/// Source of `currentTime` for window processing, in milliseconds
pub trait Clock: Send + Sync {
    fn current_time(&self) -> u64;

    /// Called with the timestamp of every CURRENT arrival
    fn observe(&self, _timestamp: u64) {}
}

/// Wall-clock time since the UNIX epoch
#[derive(Default, Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn current_time(&self) -> u64 {
        get_system_time()
    }
}

/// Time equal to the highest event timestamp observed so far
#[derive(Default, Debug)]
pub struct EventClock {
    time: AtomicU64,
}

impl EventClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for EventClock {
    #[inline]
    fn current_time(&self) -> u64 {
        self.time.load(Ordering::Acquire)
    }

    #[inline]
    fn observe(&self, timestamp: u64) {
        self.time.fetch_max(timestamp, Ordering::AcqRel);
    }
}

/// A clock that only moves when told to
#[derive(Default, Debug)]
pub struct ManualClock {
    time: AtomicU64,
}

impl ManualClock {
    pub fn new(time: u64) -> Self {
        ManualClock {
            time: AtomicU64::new(time),
        }
    }

    pub fn set_time(&self, time: u64) {
        self.time.store(time, Ordering::Release);
    }

    pub fn advance(&self, by: u64) {
        self.time.fetch_add(by, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn current_time(&self) -> u64 {
        self.time.load(Ordering::Acquire)
    }
}
