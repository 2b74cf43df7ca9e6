// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::error::timer::{TimerExpiredError, TimerResult};
use core::time::Duration;
use hierarchical_hash_wheel_timer::wheels::{quad_wheel::*, *};

/// Wake-up times kept in a [QuadWheelWithOverflow]
///
/// The wheel has no relation to system time and does not use any threads.
/// Its time only moves through [TimerWheel::advance_to], which returns the
/// wake-ups that became due in scheduled order. Entries are the absolute
/// wake-up times themselves, so they must be unique.
pub struct TimerWheel {
    timer: QuadWheelWithOverflow<u64>,
    time: u64,
    pending: usize,
}

impl TimerWheel {
    pub fn new(time: u64) -> Self {
        TimerWheel {
            timer: QuadWheelWithOverflow::default(),
            time,
            pending: 0,
        }
    }

    #[inline(always)]
    pub fn current_time(&self) -> u64 {
        self.time
    }

    /// Amount of wake-ups not yet returned by `advance_to`
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending
    }

    fn tick_and_collect(&mut self, mut time_left: u32, res: &mut Vec<u64>) {
        while time_left > 0 {
            match self.timer.can_skip() {
                Skip::Empty => {
                    // Timer is empty, no point in ticking it
                    self.time += time_left as u64;
                    return;
                }
                Skip::Millis(skip_ms) => {
                    if skip_ms >= time_left {
                        // No more ops to gather, skip the remaining time_left and return
                        self.timer.skip(time_left);
                        self.time += time_left as u64;
                        return;
                    } else {
                        self.timer.skip(skip_ms);
                        self.time += skip_ms as u64;
                        time_left -= skip_ms;
                    }
                }
                Skip::None => {
                    for e in self.timer.tick() {
                        self.pending -= 1;
                        res.push(e);
                    }
                    self.time += 1u64;
                    time_left -= 1u32;
                }
            }
        }
    }

    /// Schedules a wake-up at the absolute `time`
    ///
    /// Fails if `time` is not in the future of the wheel.
    pub fn schedule_at(&mut self, time: u64) -> TimerResult {
        if time <= self.time {
            return Err(TimerExpiredError {
                current_time: self.time,
                scheduled_time: time,
            });
        }
        let delay = time - self.time;
        match self
            .timer
            .insert_with_delay(time, Duration::from_millis(delay))
        {
            Ok(_) => {
                self.pending += 1;
                Ok(())
            }
            Err(_) => Err(TimerExpiredError {
                current_time: self.time,
                scheduled_time: time,
            }),
        }
    }

    /// Moves the wheel forward to `ts` and returns every wake-up due by then
    pub fn advance_to(&mut self, ts: u64) -> Vec<u64> {
        let mut res = Vec::new();
        if ts <= self.time {
            return res;
        }

        let mut time_left = ts - self.time;
        while time_left > std::u32::MAX as u64 {
            self.tick_and_collect(std::u32::MAX, &mut res);
            time_left -= std::u32::MAX as u64;
        }
        // this cast must be safe now
        self.tick_and_collect(time_left as u32, &mut res);
        res
    }
}
