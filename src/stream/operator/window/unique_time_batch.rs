// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::{
    key::{KeyExtractor, UniqueKey},
    lock_window,
    parameter::{expect_arity, key_position, long_constant, millis_constant, Parameter},
    WindowContext,
};
use crate::{
    conf::logger::UniqueLogger,
    data::{Event, EventChunk, EventType, StateID},
    error::{Error, UniqueResult},
    manager::snapshot::{Checkpointable, StateSnapshot},
    scheduler::Scheduler,
    stream::{
        operator::{FindableProcessor, Processor, SchedulingProcessor},
        time::Clock,
    },
};
use fxhash::FxHashSet;
use slog::{debug, info, o, trace};
use std::sync::{Arc, Mutex};

const WINDOW_NAME: &str = "UniqueTimeBatch";
const CURRENT_BATCH: &str = "current_batch";
const PREVIOUS_BATCH_EXPIRY: &str = "previous_batch_expiry";
const RESET_MARKER: &str = "reset_marker";
const PENDING_BATCH: &str = "pending_batch";
const NEXT_EMIT_TIME: &str = "next_emit_time";

#[derive(Default)]
struct BatchState {
    /// First event seen per key in the open batch, in first-seen order
    pending: Vec<Event>,
    pending_keys: FxHashSet<UniqueKey>,
    current_batch: EventChunk,
    /// EXPIRED copies of the last emitted batch
    previous_batch_expiry: EventChunk,
    /// RESET marker to lead the next non-empty batch
    reset_marker: Option<Event>,
    next_emit_time: Option<u64>,
}

/// A tumbling window emitting the first event per unique key once per interval
///
/// Each non-empty batch is emitted as one unit: the RESET marker held from the
/// batch before, EXPIRED rows retracting the previous batch, then the CURRENT
/// rows of the new batch. Boundaries keep a fixed cadence from the first one.
pub struct TumblingUniqueBatchWindow {
    key: KeyExtractor,
    interval: u64,
    /// Grid origin used to align the first boundary
    start_time: Option<i64>,
    state: Mutex<BatchState>,
    scheduler: Arc<dyn Scheduler>,
    downstream: Arc<dyn Processor>,
    clock: Arc<dyn Clock>,
    state_id: StateID,
    logger: UniqueLogger,
}

impl TumblingUniqueBatchWindow {
    /// Creates a batch window, `interval` has to be positive
    pub fn new(
        key: KeyExtractor,
        interval: u64,
        start_time: Option<i64>,
        mut ctx: WindowContext,
    ) -> UniqueResult<Self> {
        if interval == 0 {
            return Err(Error::validation(format!(
                "{} window's parameter windowTime must be positive",
                WINDOW_NAME
            )));
        }
        let state_id = ctx.take_state_id(WINDOW_NAME);
        let logger = ctx
            .logger
            .new(o!("window" => WINDOW_NAME, "state_id" => state_id.clone()));
        info!(
            logger,
            "Created window over key positions {:?} with interval {}ms and start time {:?}",
            key.positions(),
            interval,
            start_time
        );
        Ok(TumblingUniqueBatchWindow {
            key,
            interval,
            start_time,
            state: Mutex::new(BatchState::default()),
            scheduler: ctx.scheduler,
            downstream: ctx.downstream,
            clock: ctx.clock,
            state_id,
            logger,
        })
    }

    /// Builds a window from `(key, windowTime[, startTime])`
    pub fn from_parameters(params: &[Parameter], ctx: WindowContext) -> UniqueResult<Self> {
        expect_arity(
            WINDOW_NAME,
            params,
            &[2, 3],
            "two or three parameters (uniqueAttribute, windowTime, startTime)",
        )?;
        let position = key_position(WINDOW_NAME, &params[0])?;
        let interval = millis_constant(WINDOW_NAME, "windowTime", &params[1])?;
        let start_time = match params.get(2) {
            Some(param) => Some(long_constant(WINDOW_NAME, "startTime", param)?),
            None => None,
        };
        Self::new(KeyExtractor::from(position), interval, start_time, ctx)
    }

    #[inline]
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Time of the next batch boundary, unknown before the first invocation
    pub fn next_emit_time(&self) -> UniqueResult<Option<u64>> {
        Ok(lock_window(WINDOW_NAME, &self.state)?.next_emit_time)
    }

    fn first_emit_time(&self, now: u64) -> u64 {
        match self.start_time {
            Some(start) => {
                let elapsed = (i128::from(now) - i128::from(start))
                    .rem_euclid(i128::from(self.interval)) as u64;
                now.saturating_add(self.interval - elapsed)
            }
            None => now.saturating_add(self.interval),
        }
    }

    /// Runs one invocation over `chunk`
    ///
    /// Input rows are consumed, only a closed batch is forwarded downstream.
    pub fn process(&self, mut chunk: EventChunk) -> UniqueResult<()> {
        {
            let mut state = lock_window(WINDOW_NAME, &self.state)?;
            for event in chunk.iter().filter(|e| e.is_current()) {
                self.clock.observe(event.timestamp);
            }
            let now = self.clock.current_time();

            let next = match state.next_emit_time {
                Some(next) => next,
                None => {
                    let next = self.first_emit_time(now);
                    debug!(self.logger, "First batch boundary at {}", next);
                    state.next_emit_time = Some(next);
                    self.scheduler.notify_at(next);
                    next
                }
            };
            let send = now >= next;
            if send {
                let following = next.saturating_add(self.interval);
                state.next_emit_time = Some(following);
                self.scheduler.notify_at(following);
            }

            for event in chunk.iter().filter(|e| e.is_current()) {
                if state.pending_keys.insert(self.key.generate_key(event)) {
                    state.pending.push(event.clone());
                } else {
                    trace!(self.logger, "Dropping duplicate {:?}", event);
                }
            }
            chunk.clear();

            if send {
                self.close_batch(&mut state, now, &mut chunk);
            }
        }

        if chunk.is_empty() {
            return Ok(());
        }
        chunk.set_batch(true);
        self.downstream.process(chunk)
    }

    fn close_batch(&self, state: &mut BatchState, now: u64, output: &mut EventChunk) {
        let BatchState {
            pending,
            pending_keys,
            current_batch,
            previous_batch_expiry,
            reset_marker,
            ..
        } = state;

        for mut event in pending.drain(..) {
            event.timestamp = now;
            current_batch.append(event);
        }
        pending_keys.clear();

        for event in previous_batch_expiry.iter_mut() {
            event.timestamp = now;
        }
        output.append_chunk(previous_batch_expiry);
        previous_batch_expiry.clear();

        if !current_batch.is_empty() {
            if let Some(marker) = reset_marker.take() {
                output.prepend(marker);
            }
            for event in current_batch.iter() {
                previous_batch_expiry.append(event.copy_as(EventType::Expired));
            }
            *reset_marker = current_batch.first().map(|e| e.copy_as(EventType::Reset));
            output.append_chunk(current_batch);
        }
        current_batch.clear();

        debug!(
            self.logger,
            "Closed batch at {} emitting {} rows",
            now,
            output.len()
        );
    }
}

impl Processor for TumblingUniqueBatchWindow {
    fn process(&self, chunk: EventChunk) -> UniqueResult<()> {
        TumblingUniqueBatchWindow::process(self, chunk)
    }
}

impl SchedulingProcessor for TumblingUniqueBatchWindow {
    fn on_wake_up(&self, time: u64) -> UniqueResult<()> {
        trace!(self.logger, "Woken up at {}", time);
        self.process(EventChunk::new())
    }
}

impl FindableProcessor for TumblingUniqueBatchWindow {
    fn find(&self, condition: &dyn Fn(&Event) -> bool) -> UniqueResult<EventChunk> {
        let state = lock_window(WINDOW_NAME, &self.state)?;
        Ok(state
            .previous_batch_expiry
            .iter()
            .filter(|event| condition(*event))
            .cloned()
            .collect())
    }
}

impl Checkpointable for TumblingUniqueBatchWindow {
    fn state_id(&self) -> &str {
        &self.state_id
    }

    fn snapshot(&self) -> UniqueResult<StateSnapshot> {
        let state = lock_window(WINDOW_NAME, &self.state)?;
        let mut snapshot = StateSnapshot::new();
        snapshot.put_events(CURRENT_BATCH, state.current_batch.iter().cloned().collect());
        snapshot.put_events(
            PREVIOUS_BATCH_EXPIRY,
            state.previous_batch_expiry.iter().cloned().collect(),
        );
        snapshot.put_event(RESET_MARKER, state.reset_marker.clone());
        snapshot.put_events(PENDING_BATCH, state.pending.clone());
        if let Some(next) = state.next_emit_time {
            snapshot.put_time(NEXT_EMIT_TIME, next);
        }
        Ok(snapshot)
    }

    /// Replaces the window state with `snapshot`
    ///
    /// A snapshot without `previous_batch_expiry` is a legacy one, of which
    /// only the current batch and the reset marker are restored.
    fn restore(&self, mut snapshot: StateSnapshot) -> UniqueResult<()> {
        if snapshot.len() < 2 {
            return Err(Error::state_restore(format!(
                "{} window snapshot should have at least 2 fields, but found {}",
                WINDOW_NAME,
                snapshot.len()
            )));
        }
        let current_batch: EventChunk = snapshot.take_events(CURRENT_BATCH)?.into();
        let reset_marker = snapshot.take_event(RESET_MARKER)?;

        if !snapshot.contains(PREVIOUS_BATCH_EXPIRY) {
            let mut state = lock_window(WINDOW_NAME, &self.state)?;
            state.current_batch = current_batch;
            state.reset_marker = reset_marker;
            info!(self.logger, "Restored legacy snapshot");
            return Ok(());
        }

        let previous_batch_expiry: EventChunk =
            snapshot.take_events(PREVIOUS_BATCH_EXPIRY)?.into();
        let pending = if snapshot.contains(PENDING_BATCH) {
            snapshot.take_events(PENDING_BATCH)?
        } else {
            Vec::new()
        };
        let mut pending_keys = FxHashSet::default();
        for event in &pending {
            if !pending_keys.insert(self.key.generate_key(event)) {
                return Err(Error::state_restore(format!(
                    "{} holds more than one event for key {}",
                    PENDING_BATCH,
                    self.key.generate_key(event)
                )));
            }
        }
        let next_emit_time = if snapshot.contains(NEXT_EMIT_TIME) {
            snapshot.take_time(NEXT_EMIT_TIME)?
        } else {
            None
        };

        let mut state = lock_window(WINDOW_NAME, &self.state)?;
        *state = BatchState {
            pending,
            pending_keys,
            current_batch,
            previous_batch_expiry,
            reset_marker,
            next_emit_time,
        };
        if let Some(next) = next_emit_time {
            self.scheduler.notify_at(next);
        }
        info!(
            self.logger,
            "Restored {} pending and {} emitted rows",
            state.pending.len(),
            state.previous_batch_expiry.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::operator::window::test_utils::{rows, stock, Harness};
    use EventType::{Current, Expired, Reset};

    fn window(harness: &Harness, params: Vec<Parameter>) -> TumblingUniqueBatchWindow {
        TumblingUniqueBatchWindow::from_parameters(&params, harness.context()).unwrap()
    }

    fn unaligned(harness: &Harness, interval: i64) -> TumblingUniqueBatchWindow {
        window(
            harness,
            vec![Parameter::variable("symbol", 0), Parameter::long(interval)],
        )
    }

    /// Hands `events` over as one chunk arriving at the time of its first event
    fn feed(harness: &Harness, window: &TumblingUniqueBatchWindow, events: Vec<Event>) {
        if let Some(first) = events.first() {
            harness.clock.set_time(first.timestamp);
        }
        window.process(events.into()).unwrap();
    }

    fn tick(harness: &Harness, window: &TumblingUniqueBatchWindow, time: u64) {
        harness.clock.set_time(time);
        window.on_wake_up(time).unwrap();
    }

    #[test]
    fn first_event_per_key_wins() {
        let harness = Harness::new();
        let window = unaligned(&harness, 1000);

        feed(&harness, &window, vec![stock(0, "IBM", 10), stock(0, "WSO2", 20)]);
        feed(&harness, &window, vec![stock(400, "IBM", 99)]);
        assert!(harness.sink.take_chunks().is_empty());

        tick(&harness, &window, 1000);
        let chunks = harness.sink.take_chunks();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_batch());
        assert_eq!(
            rows(&chunks[0].clone().into_events()),
            vec![
                (Current, 1000, "IBM".into(), "10".into()),
                (Current, 1000, "WSO2".into(), "20".into()),
            ]
        );
    }

    #[test]
    fn batch_close_emits_reset_retractions_then_rows() {
        let harness = Harness::new();
        let window = unaligned(&harness, 1000);

        feed(&harness, &window, vec![stock(0, "A", 1), stock(100, "B", 2)]);
        assert_eq!(window.next_emit_time().unwrap(), Some(1000));
        tick(&harness, &window, 1000);
        harness.sink.take_chunks();

        feed(&harness, &window, vec![stock(1200, "C", 3)]);
        tick(&harness, &window, 2000);
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![
                (Reset, 1000, "A".into(), "1".into()),
                (Expired, 2000, "A".into(), "1".into()),
                (Expired, 2000, "B".into(), "2".into()),
                (Current, 2000, "C".into(), "3".into()),
            ]
        );

        // an empty interval still retracts what was emitted before
        tick(&harness, &window, 3000);
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![(Expired, 3000, "C".into(), "3".into())]
        );
        tick(&harness, &window, 4000);
        assert!(harness.sink.take_chunks().is_empty());

        // the marker captured from the last non-empty batch is still held
        feed(&harness, &window, vec![stock(4500, "D", 4)]);
        tick(&harness, &window, 5000);
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![
                (Reset, 2000, "C".into(), "3".into()),
                (Current, 5000, "D".into(), "4".into()),
            ]
        );
    }

    #[test]
    fn boundaries_keep_their_cadence() {
        let harness = Harness::new();
        let window = unaligned(&harness, 1000);

        feed(&harness, &window, vec![stock(37, "A", 1)]);
        assert_eq!(window.next_emit_time().unwrap(), Some(1037));

        // late delivery does not shift later boundaries
        tick(&harness, &window, 1300);
        assert_eq!(window.next_emit_time().unwrap(), Some(2037));
        // an arrival exactly on the boundary closes the batch
        feed(&harness, &window, vec![stock(2037, "B", 2)]);
        assert_eq!(window.next_emit_time().unwrap(), Some(3037));
        // an arrival just before it does not
        feed(&harness, &window, vec![stock(3036, "C", 3)]);
        assert_eq!(window.next_emit_time().unwrap(), Some(3037));

        assert_eq!(harness.scheduler.requests(), vec![1037, 2037, 3037]);
    }

    #[test]
    fn aligned_boundaries_follow_the_grid() {
        let harness = Harness::new();
        harness.clock.set_time(1250);
        let window = window(
            &harness,
            vec![
                Parameter::variable("symbol", 0),
                Parameter::int(1000),
                Parameter::int(100),
            ],
        );
        window.process(EventChunk::new()).unwrap();
        assert_eq!(window.next_emit_time().unwrap(), Some(2100));

        let on_grid = Harness::new();
        on_grid.clock.set_time(2100);
        let window = self::window(
            &on_grid,
            vec![
                Parameter::variable("symbol", 0),
                Parameter::int(1000),
                Parameter::long(-900),
            ],
        );
        window.process(EventChunk::new()).unwrap();
        assert_eq!(window.next_emit_time().unwrap(), Some(3100));
    }

    #[test]
    fn find_queries_the_emitted_batch() {
        let harness = Harness::new();
        let window = unaligned(&harness, 1000);
        feed(&harness, &window, vec![stock(0, "A", 1), stock(10, "B", 2)]);
        assert_eq!(window.next_emit_time().unwrap(), Some(1000));
        assert!(window.find(&|_| true).unwrap().is_empty());

        tick(&harness, &window, 1000);
        let found = window.find(&|e| e.data[0].to_string() == "B").unwrap();
        assert_eq!(
            rows(&found.into_events()),
            vec![(Expired, 1000, "B".into(), "2".into())]
        );
    }

    #[test]
    fn checkpoint_round_trip() {
        let original = Harness::new();
        let window_a = unaligned(&original, 1000);
        feed(&original, &window_a, vec![stock(0, "A", 1)]);
        tick(&original, &window_a, 1000);
        feed(&original, &window_a, vec![stock(1100, "B", 2), stock(1100, "A", 3)]);
        original.sink.take_chunks();

        let bytes = window_a.snapshot().unwrap().to_bytes().unwrap();
        let restored = Harness::new();
        let window_b = unaligned(&restored, 1000);
        window_b
            .restore(StateSnapshot::from_bytes(&bytes).unwrap())
            .unwrap();
        assert_eq!(restored.scheduler.requests(), vec![2000]);

        let script: Vec<(u64, Vec<Event>)> = vec![
            (1500, vec![stock(1500, "B", 4), stock(1500, "C", 5)]),
            (2000, vec![]),
            (2400, vec![stock(2400, "A", 6)]),
            (3000, vec![]),
            (4000, vec![]),
        ];
        for (time, input) in script {
            for (harness, window) in &[(&original, &window_a), (&restored, &window_b)] {
                if input.is_empty() {
                    tick(harness, window, time);
                } else {
                    feed(harness, window, input.clone());
                }
            }
            assert_eq!(original.sink.take_chunks(), restored.sink.take_chunks());
        }
    }

    #[test]
    fn legacy_snapshot_restores_current_batch_and_marker() {
        let harness = Harness::new();
        let window = unaligned(&harness, 1000);
        feed(&harness, &window, vec![stock(0, "A", 1)]);
        tick(&harness, &window, 1000);
        harness.sink.take_chunks();

        let mut legacy = StateSnapshot::new();
        legacy.put_events(CURRENT_BATCH, vec![]);
        legacy.put_event(RESET_MARKER, Some(stock(0, "Z", 9).copy_as(Reset)));
        window.restore(legacy).unwrap();

        // previous batch retractions are kept, the marker is replaced
        feed(&harness, &window, vec![stock(1500, "B", 2)]);
        tick(&harness, &window, 2000);
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![
                (Reset, 0, "Z".into(), "9".into()),
                (Expired, 2000, "A".into(), "1".into()),
                (Current, 2000, "B".into(), "2".into()),
            ]
        );
    }

    #[test]
    fn undersized_snapshot_is_rejected() {
        let harness = Harness::new();
        let window = unaligned(&harness, 1000);
        let mut snapshot = StateSnapshot::new();
        snapshot.put_events(CURRENT_BATCH, vec![]);
        assert!(matches!(
            window.restore(snapshot),
            Err(Error::StateRestore { .. })
        ));

        let mut mistyped = StateSnapshot::new();
        mistyped.put_time(CURRENT_BATCH, 5);
        mistyped.put_event(RESET_MARKER, None);
        assert!(matches!(
            window.restore(mistyped),
            Err(Error::StateRestore { .. })
        ));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let harness = Harness::new();
        let cases = vec![
            vec![Parameter::variable("symbol", 0)],
            vec![Parameter::long(0), Parameter::int(1000)],
            vec![Parameter::variable("symbol", 0), Parameter::int(0)],
            vec![
                Parameter::variable("symbol", 0),
                Parameter::int(1000),
                Parameter::variable("start", 1),
            ],
            vec![
                Parameter::variable("symbol", 0),
                Parameter::int(1000),
                Parameter::int(0),
                Parameter::int(0),
            ],
        ];
        for params in cases {
            let result = TumblingUniqueBatchWindow::from_parameters(&params, harness.context());
            assert!(matches!(result, Err(Error::Validation { .. })));
        }
    }
}
