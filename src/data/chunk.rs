// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::Event;
use std::fmt;

/// An ordered, mutable sequence of [Event]s with a single cursor
///
/// The cursor walks the chunk front to back through [EventChunk::next].
/// The element most recently returned by `next` is the *current* element,
/// which may be removed or have events inserted in front of it. When there
/// is no current element, insertions land at the cursor position.
///
/// Chunks are both the unit handed to a downstream [Processor](crate::stream::operator::Processor)
/// and the internal buffers of the windows.
#[derive(Clone, Default)]
pub struct EventChunk {
    events: Vec<Event>,
    /// Index of the element `next` returns
    cursor: usize,
    /// Index of the element last returned by `next`
    current: Option<usize>,
    /// Set on output that must be consumed as one batch unit
    batch: bool,
}

impl EventChunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to the tail of the chunk
    #[inline]
    pub fn append(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Removes every event and resets the cursor
    pub fn clear(&mut self) {
        self.events.clear();
        self.reset();
    }

    /// Moves the cursor back to the head
    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.current = None;
    }

    #[inline]
    pub fn has_next(&self) -> bool {
        self.cursor < self.events.len()
    }

    /// Advances the cursor and returns the new current element
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&mut Event> {
        if !self.has_next() {
            self.current = None;
            return None;
        }
        let idx = self.cursor;
        self.cursor += 1;
        self.current = Some(idx);
        self.events.get_mut(idx)
    }

    /// Removes and returns the current element
    pub fn remove(&mut self) -> Option<Event> {
        let idx = self.current.take()?;
        self.cursor -= 1;
        Some(self.events.remove(idx))
    }

    /// Inserts an event ahead of the current element
    ///
    /// The inserted event is never visited by the ongoing iteration.
    pub fn insert_before_current(&mut self, event: Event) {
        match self.current {
            Some(idx) => {
                self.events.insert(idx, event);
                self.current = Some(idx + 1);
                self.cursor += 1;
            }
            None => {
                self.events.insert(self.cursor, event);
                self.cursor += 1;
            }
        }
    }

    /// Inserts an event at the head of the chunk
    pub fn prepend(&mut self, event: Event) {
        self.events.insert(0, event);
        if let Some(idx) = self.current.as_mut() {
            *idx += 1;
        }
        self.cursor += 1;
    }

    /// Moves every event of `other` to the tail of this chunk
    pub fn append_chunk(&mut self, other: &mut EventChunk) {
        self.events.append(&mut other.events);
        other.reset();
    }

    #[inline]
    pub fn first(&self) -> Option<&Event> {
        self.events.first()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Event> {
        self.events.iter_mut()
    }

    #[inline]
    pub fn is_batch(&self) -> bool {
        self.batch
    }

    #[inline]
    pub fn set_batch(&mut self, batch: bool) {
        self.batch = batch;
    }

    /// Consumes the chunk and returns its events
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl From<Vec<Event>> for EventChunk {
    fn from(events: Vec<Event>) -> Self {
        EventChunk {
            events,
            ..EventChunk::default()
        }
    }
}

impl std::iter::FromIterator<Event> for EventChunk {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        EventChunk::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl IntoIterator for EventChunk {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventChunk {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

// Cursor position is not part of a chunk's identity
impl PartialEq for EventChunk {
    fn eq(&self, other: &Self) -> bool {
        self.batch == other.batch && self.events == other.events
    }
}

impl fmt::Debug for EventChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChunk")
            .field("batch", &self.batch)
            .field("events", &self.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EventType;

    fn ev(ts: u64) -> Event {
        Event::new(ts, vec![(ts as i64).into()])
    }

    fn timestamps(chunk: &EventChunk) -> Vec<u64> {
        chunk.iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn insert_before_current_keeps_iteration() {
        let mut chunk: EventChunk = vec![ev(1), ev(2), ev(3)].into_iter().collect();
        let mut visited = Vec::new();
        while let Some(e) = chunk.next() {
            let ts = e.timestamp;
            visited.push(ts);
            if ts == 2 {
                chunk.insert_before_current(Event::with_type(20, EventType::Expired, vec![]));
                chunk.insert_before_current(Event::with_type(21, EventType::Expired, vec![]));
            }
        }
        assert_eq!(visited, vec![1, 2, 3]);
        assert_eq!(timestamps(&chunk), vec![1, 20, 21, 2, 3]);
    }

    #[test]
    fn remove_current() {
        let mut chunk: EventChunk = vec![ev(1), ev(2), ev(3)].into_iter().collect();
        while let Some(e) = chunk.next() {
            if e.timestamp % 2 == 1 {
                chunk.remove();
            }
        }
        assert_eq!(timestamps(&chunk), vec![2]);
        // nothing is current once the cursor is exhausted
        assert!(chunk.remove().is_none());
    }

    #[test]
    fn insert_without_current_appends_at_cursor() {
        let mut chunk = EventChunk::new();
        chunk.insert_before_current(ev(1));
        chunk.insert_before_current(ev(2));
        assert_eq!(timestamps(&chunk), vec![1, 2]);
        assert!(!chunk.has_next());

        chunk.reset();
        assert!(chunk.has_next());
        assert_eq!(chunk.next().map(|e| e.timestamp), Some(1));
    }

    #[test]
    fn prepend_and_append_chunk() {
        let mut chunk: EventChunk = vec![ev(5)].into_iter().collect();
        let _ = chunk.next();
        chunk.prepend(ev(4));
        assert_eq!(chunk.remove().map(|e| e.timestamp), Some(5));

        let mut other: EventChunk = vec![ev(6), ev(7)].into_iter().collect();
        chunk.append_chunk(&mut other);
        assert!(other.is_empty());
        assert_eq!(timestamps(&chunk), vec![4, 6, 7]);
        assert_eq!(chunk.first().map(|e| e.timestamp), Some(4));

        chunk.clear();
        assert!(chunk.is_empty());
        assert!(!chunk.has_next());
    }
}
