// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use snafu::Snafu;

/// Result of inserting a wake-up into a [TimerWheel](crate::scheduler::wheel::TimerWheel)
pub type TimerResult = std::result::Result<(), TimerExpiredError>;

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display(
    "Attempted to schedule wake-up at {} when time is {}",
    scheduled_time,
    current_time
))]
pub struct TimerExpiredError {
    /// Current time of the wheel
    pub current_time: u64,
    /// The requested time
    pub scheduled_time: u64,
}
