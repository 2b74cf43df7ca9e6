// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// Dedup key extraction
pub mod key;
/// Positional window parameters and their validation
pub mod parameter;
/// Sliding unique time window
pub mod unique_time;
/// Tumbling unique time batch window
pub mod unique_time_batch;

pub use key::{KeyExtractor, UniqueKey};
pub use parameter::{Constant, Parameter};
pub use unique_time::SlidingUniqueWindow;
pub use unique_time_batch::TumblingUniqueBatchWindow;

use crate::{
    conf::logger::UniqueLogger,
    data::StateID,
    error::UniqueResult,
    scheduler::Scheduler,
    stream::{operator::Processor, time::Clock},
};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Collaborators a window instance is wired to
///
/// The window only borrows these for its lifetime, they are owned by
/// whoever assembles the pipeline.
#[derive(Clone)]
pub struct WindowContext {
    /// Delivers future wake-ups back into the window
    ///
    /// A [WheelScheduler](crate::scheduler::WheelScheduler) serves a single
    /// window and drops requests not later than its last one, so it must not
    /// be shared between windows. Give each window its own.
    pub scheduler: Arc<dyn Scheduler>,
    /// Receives every non-empty output chunk
    pub downstream: Arc<dyn Processor>,
    /// Source of `currentTime`
    pub clock: Arc<dyn Clock>,
    pub logger: UniqueLogger,
    /// Identifier used when checkpointing, a random one is generated if unset
    pub state_id: Option<StateID>,
}

impl WindowContext {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        downstream: Arc<dyn Processor>,
        clock: Arc<dyn Clock>,
        logger: UniqueLogger,
    ) -> Self {
        WindowContext {
            scheduler,
            downstream,
            clock,
            logger,
            state_id: None,
        }
    }

    pub fn with_state_id(mut self, state_id: impl Into<StateID>) -> Self {
        self.state_id = Some(state_id.into());
        self
    }

    pub(crate) fn take_state_id(&mut self, window: &str) -> StateID {
        self.state_id
            .take()
            .unwrap_or_else(|| format!("{}_{}", window, Uuid::new_v4()))
    }
}

/// Acquires a window's exclusive lock
pub(crate) fn lock_window<'a, S>(
    window: &str,
    state: &'a Mutex<S>,
) -> UniqueResult<MutexGuard<'a, S>> {
    state
        .lock()
        .or_else(|_| crate::reportable_error!("{} window state lock poisoned", window))
}
