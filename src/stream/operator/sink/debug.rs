// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::{
    conf::logger::UniqueLogger,
    data::{Event, EventChunk},
    error::UniqueResult,
    stream::operator::Processor,
};
use slog::debug;
use std::sync::Mutex;

/// A downstream [Processor] that keeps every chunk it receives
///
/// Mainly used for debugging and testing windows.
pub struct DebugSink {
    chunks: Mutex<Vec<EventChunk>>,
    logger: Option<UniqueLogger>,
}

impl DebugSink {
    pub fn new() -> Self {
        DebugSink {
            chunks: Mutex::new(Vec::new()),
            logger: None,
        }
    }

    /// Creates a sink that also logs each received chunk
    pub fn with_logger(logger: UniqueLogger) -> Self {
        DebugSink {
            chunks: Mutex::new(Vec::new()),
            logger: Some(logger),
        }
    }

    /// Removes and returns every chunk received so far
    pub fn take_chunks(&self) -> Vec<EventChunk> {
        match self.chunks.lock() {
            Ok(mut chunks) => std::mem::take(&mut *chunks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Removes every chunk received so far and flattens their events
    pub fn take_events(&self) -> Vec<Event> {
        self.take_chunks()
            .into_iter()
            .flat_map(EventChunk::into_events)
            .collect()
    }
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for DebugSink {
    fn process(&self, chunk: EventChunk) -> UniqueResult<()> {
        if let Some(logger) = &self.logger {
            debug!(logger, "Sink received {:?}", chunk);
        }
        let mut chunks = self
            .chunks
            .lock()
            .or_else(|_| crate::reportable_error!("debug sink lock poisoned"))?;
        chunks.push(chunk);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::logger::discard_logger;

    #[test]
    fn collects_chunks_in_order() {
        let sink = DebugSink::with_logger(discard_logger());
        sink.process(vec![Event::new(1, vec![])].into()).unwrap();
        let mut batch: EventChunk = vec![Event::new(2, vec![]), Event::new(3, vec![])].into();
        batch.set_batch(true);
        sink.process(batch).unwrap();

        let chunks = sink.take_chunks();
        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].is_batch());
        assert!(chunks[1].is_batch());
        assert!(sink.take_events().is_empty());
    }
}
