// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// Hashed wheel holding pending wake-up times
pub mod wheel;

use crate::{
    conf::logger::UniqueLogger,
    error::UniqueResult,
    stream::{operator::SchedulingProcessor, time::Clock},
};
use slog::{debug, error, trace};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use wheel::TimerWheel;

/// Collaborator delivering future wake-ups to a window
///
/// A wake-up is delivered at or after the requested time, never earlier.
/// Requests that are not later than an already accepted one are no-ops.
pub trait Scheduler: Send + Sync {
    fn notify_at(&self, time: u64);
}

struct WheelState {
    wheel: TimerWheel,
    /// Latest accepted request
    last_requested: Option<u64>,
    /// Accepted requests whose time had already passed on the wheel
    overdue: Vec<u64>,
}

/// A [Scheduler] backed by a [TimerWheel], serving a single target
///
/// Time only moves through [WheelScheduler::advance_to], which is called
/// either directly or periodically by a [SchedulerDriver]. Wake-ups are
/// delivered outside the scheduler's lock, so targets may request further
/// wake-ups while handling one.
pub struct WheelScheduler {
    state: Mutex<WheelState>,
    target: RwLock<Option<Weak<dyn SchedulingProcessor>>>,
    logger: UniqueLogger,
}

impl WheelScheduler {
    /// Creates a scheduler whose wheel starts at `start_time`
    pub fn new(start_time: u64, logger: UniqueLogger) -> Self {
        WheelScheduler {
            state: Mutex::new(WheelState {
                wheel: TimerWheel::new(start_time),
                last_requested: None,
                overdue: Vec::new(),
            }),
            target: RwLock::new(None),
            logger,
        }
    }

    /// Creates a scheduler starting at the current time of `clock`
    pub fn with_clock(clock: &dyn Clock, logger: UniqueLogger) -> Self {
        Self::new(clock.current_time(), logger)
    }

    /// Sets the processor that receives wake-ups
    ///
    /// Only a weak reference is kept, the scheduler never keeps its target alive.
    pub fn register<P>(&self, target: &Arc<P>) -> UniqueResult<()>
    where
        P: SchedulingProcessor + 'static,
    {
        let target: Arc<dyn SchedulingProcessor> = target.clone();
        let mut slot = self
            .target
            .write()
            .or_else(|_| crate::reportable_error!("scheduler target lock poisoned"))?;
        *slot = Some(Arc::downgrade(&target));
        Ok(())
    }

    /// Time of the underlying wheel
    pub fn current_time(&self) -> UniqueResult<u64> {
        Ok(self.lock_state()?.wheel.current_time())
    }

    /// Amount of wake-ups that have not been delivered yet
    pub fn pending(&self) -> UniqueResult<usize> {
        let state = self.lock_state()?;
        Ok(state.wheel.pending() + state.overdue.len())
    }

    /// Advances to `now` and delivers every wake-up that became due
    ///
    /// Returns the amount of wake-ups delivered.
    pub fn advance_to(&self, now: u64) -> UniqueResult<usize> {
        let due = {
            let mut state = self.lock_state()?;
            let mut due = std::mem::take(&mut state.overdue);
            due.extend(state.wheel.advance_to(now));
            due
        };

        if due.is_empty() {
            return Ok(0);
        }

        let target = self
            .target
            .read()
            .or_else(|_| crate::reportable_error!("scheduler target lock poisoned"))?
            .as_ref()
            .and_then(Weak::upgrade);

        match target {
            Some(target) => {
                for time in &due {
                    trace!(self.logger, "Delivering wake-up scheduled for {} at {}", time, now);
                    target.on_wake_up(now)?;
                }
                Ok(due.len())
            }
            None => {
                debug!(
                    self.logger,
                    "Dropping {} wake-ups, no live target registered",
                    due.len()
                );
                Ok(0)
            }
        }
    }

    fn lock_state(&self) -> UniqueResult<std::sync::MutexGuard<'_, WheelState>> {
        self.state
            .lock()
            .or_else(|_| crate::reportable_error!("scheduler state lock poisoned"))
    }
}

impl Scheduler for WheelScheduler {
    fn notify_at(&self, time: u64) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => {
                error!(self.logger, "Scheduler state lock poisoned, dropping request {}", time);
                return;
            }
        };

        if let Some(last) = state.last_requested {
            if time <= last {
                trace!(
                    self.logger,
                    "Ignoring wake-up request {} not later than {}",
                    time,
                    last
                );
                return;
            }
        }
        state.last_requested = Some(time);

        if let Err(expired) = state.wheel.schedule_at(time) {
            trace!(self.logger, "{}, delivering on next advance", expired);
            state.overdue.push(time);
        }
    }
}

/// Background thread advancing schedulers to the time of a [Clock]
pub struct SchedulerDriver {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerDriver {
    pub fn start(
        schedulers: Vec<Arc<WheelScheduler>>,
        clock: Arc<dyn Clock>,
        tick: Duration,
        logger: UniqueLogger,
    ) -> UniqueResult<SchedulerDriver> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let handle = thread::Builder::new()
            .name(String::from("unique-scheduler"))
            .spawn(move || {
                while thread_running.load(Ordering::Acquire) {
                    thread::sleep(tick);
                    let now = clock.current_time();
                    for scheduler in &schedulers {
                        if let Err(err) = scheduler.advance_to(now) {
                            error!(logger, "Failed to deliver wake-up at {}: {}", now, err);
                        }
                    }
                }
                debug!(logger, "Scheduler driver stopped");
            })?;

        Ok(SchedulerDriver {
            running,
            handle: Some(handle),
        })
    }

    /// Stops the driver thread and waits for it to exit
    pub fn shutdown(mut self) -> UniqueResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> UniqueResult<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return crate::reportable_error!("scheduler driver thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for SchedulerDriver {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
