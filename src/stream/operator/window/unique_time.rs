// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::{
    key::{KeyExtractor, UniqueKey},
    lock_window,
    parameter::{expect_arity, key_position, millis_constant, Parameter},
    WindowContext,
};
use crate::{
    conf::logger::UniqueLogger,
    data::{Event, EventChunk, EventType, StateID},
    error::{Error, UniqueResult},
    manager::snapshot::{Checkpointable, KeyedEvent, StateSnapshot},
    scheduler::Scheduler,
    stream::{
        operator::{FindableProcessor, Processor, SchedulingProcessor},
        time::Clock,
    },
};
use fxhash::FxHashMap;
use slog::{debug, info, o, trace};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

const WINDOW_NAME: &str = "UniqueTime";
const EXPIRY_QUEUE: &str = "expiry_queue";
const KEY_MAP: &str = "key_map";

/// A slot of the expiry queue
///
/// Slots carry consecutive sequence numbers so that a superseded entry
/// can be located by offset from the head. A superseded entry leaves an
/// empty slot behind which is dropped once it reaches the head.
#[derive(Debug)]
struct ExpirySlot {
    seq: u64,
    entry: Option<(UniqueKey, Event)>,
}

#[derive(Debug)]
struct ActiveEntry {
    seq: u64,
    event: Event,
}

#[derive(Default)]
struct SlidingState {
    /// Latest event per key together with its queue slot
    active: FxHashMap<UniqueKey, ActiveEntry>,
    /// Live events in arrival order
    expiry_queue: VecDeque<ExpirySlot>,
    next_seq: u64,
    /// Timestamp of the last arrival a wake-up was requested for
    last_scheduled: Option<u64>,
}

impl SlidingState {
    /// Queues `event` under `key` and returns the event it supersedes
    fn insert(&mut self, key: UniqueKey, queued: Event, mapped: Event) -> Option<Event> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.expiry_queue.push_back(ExpirySlot {
            seq,
            entry: Some((key.clone(), queued)),
        });
        let old = self.active.insert(key, ActiveEntry { seq, event: mapped })?;
        self.vacate(old.seq);
        Some(old.event)
    }

    fn vacate(&mut self, seq: u64) {
        let head = match self.expiry_queue.front() {
            Some(slot) => slot.seq,
            None => return,
        };
        if let Some(slot) = seq
            .checked_sub(head)
            .and_then(|offset| self.expiry_queue.get_mut(offset as usize))
        {
            slot.entry = None;
        }
    }

    /// Pops the head of the queue if it is due at `now`
    fn pop_due(&mut self, now: u64, window_length: u64) -> Option<Event> {
        loop {
            let due = match self.expiry_queue.front()? {
                ExpirySlot { entry: None, .. } => true,
                ExpirySlot {
                    entry: Some((_, event)),
                    ..
                } => event.timestamp.saturating_add(window_length) <= now,
            };
            if !due {
                return None;
            }
            if let Some(ExpirySlot {
                entry: Some((key, event)),
                ..
            }) = self.expiry_queue.pop_front()
            {
                self.active.remove(&key);
                return Some(event);
            }
        }
    }

    fn live(&self) -> impl Iterator<Item = (&UniqueKey, &Event)> {
        self.expiry_queue
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|(key, event)| (key, event)))
    }
}

/// A sliding window keeping the latest event per unique key for a fixed length of time
///
/// Every CURRENT arrival is forwarded and held as the live event of its key.
/// A later arrival with the same key retracts the held one immediately, and
/// a held event nobody superseded is retracted once `window_length` has passed.
/// Retractions are EXPIRED rows stamped with the time they were made.
pub struct SlidingUniqueWindow {
    key: KeyExtractor,
    window_length: u64,
    state: Mutex<SlidingState>,
    scheduler: Arc<dyn Scheduler>,
    downstream: Arc<dyn Processor>,
    clock: Arc<dyn Clock>,
    state_id: StateID,
    logger: UniqueLogger,
}

impl SlidingUniqueWindow {
    pub fn new(key: KeyExtractor, window_length: u64, mut ctx: WindowContext) -> Self {
        let state_id = ctx.take_state_id(WINDOW_NAME);
        let logger = ctx
            .logger
            .new(o!("window" => WINDOW_NAME, "state_id" => state_id.clone()));
        info!(
            logger,
            "Created window over key positions {:?} with length {}ms",
            key.positions(),
            window_length
        );
        SlidingUniqueWindow {
            key,
            window_length,
            state: Mutex::new(SlidingState::default()),
            scheduler: ctx.scheduler,
            downstream: ctx.downstream,
            clock: ctx.clock,
            state_id,
            logger,
        }
    }

    /// Builds a window from its positional parameters `(key, windowLength)`
    ///
    /// The key has to be a variable and the length an INT or LONG constant.
    pub fn from_parameters(params: &[Parameter], ctx: WindowContext) -> UniqueResult<Self> {
        expect_arity(
            WINDOW_NAME,
            params,
            &[2],
            "two parameters (uniqueAttribute, windowTime)",
        )?;
        let position = key_position(WINDOW_NAME, &params[0])?;
        let window_length = millis_constant(WINDOW_NAME, "windowTime", &params[1])?;
        Ok(Self::new(KeyExtractor::from(position), window_length, ctx))
    }

    #[inline]
    pub fn window_length(&self) -> u64 {
        self.window_length
    }

    /// Number of keys currently held
    pub fn active_keys(&self) -> UniqueResult<usize> {
        Ok(lock_window(WINDOW_NAME, &self.state)?.active.len())
    }

    fn on_arrival(&self, state: &mut SlidingState, arrival: &Event) -> Option<Event> {
        let key = self.key.generate_key(arrival);
        let queued = arrival.copy_as(EventType::Expired);
        let mapped = queued.clone();
        let superseded = state.insert(key, queued, mapped);

        if state
            .last_scheduled
            .map_or(true, |last| arrival.timestamp > last)
        {
            self.scheduler
                .notify_at(arrival.timestamp.saturating_add(self.window_length));
            state.last_scheduled = Some(arrival.timestamp);
        }
        superseded
    }

    fn expire(&self, state: &mut SlidingState, now: u64, chunk: &mut EventChunk) {
        while let Some(mut expired) = state.pop_due(now, self.window_length) {
            trace!(self.logger, "Expiring event from {} at {}", expired.timestamp, now);
            expired.timestamp = now;
            chunk.insert_before_current(expired);
        }
    }

    /// Runs one invocation over `chunk` and forwards the result downstream
    ///
    /// An empty chunk only sweeps expired events, which is how wake-ups re-enter.
    pub fn process(&self, mut chunk: EventChunk) -> UniqueResult<()> {
        {
            let mut state = lock_window(WINDOW_NAME, &self.state)?;
            chunk.reset();
            loop {
                let arrival = match chunk.next() {
                    None => break,
                    Some(event) if event.is_current() => event.clone(),
                    Some(_) => {
                        chunk.remove();
                        continue;
                    }
                };
                self.clock.observe(arrival.timestamp);
                let now = self.clock.current_time();

                if let Some(mut old) = self.on_arrival(&mut state, &arrival) {
                    debug!(
                        self.logger,
                        "Event from {} superseded by event from {}",
                        old.timestamp,
                        arrival.timestamp
                    );
                    old.timestamp = now;
                    chunk.insert_before_current(old);
                }
                self.expire(&mut state, now, &mut chunk);
            }
            let now = self.clock.current_time();
            self.expire(&mut state, now, &mut chunk);
        }

        if chunk.is_empty() {
            return Ok(());
        }
        self.downstream.process(chunk)
    }

    fn restored_state(&self, mut snapshot: StateSnapshot) -> UniqueResult<SlidingState> {
        if snapshot.len() < 2 {
            return Err(Error::state_restore(format!(
                "{} window snapshot should have 2 fields, but found {}",
                WINDOW_NAME,
                snapshot.len()
            )));
        }
        let queue = snapshot.take_events(EXPIRY_QUEUE)?;
        let key_map = snapshot.take_keyed(KEY_MAP)?;

        let mut state = SlidingState::default();
        let mut last_timestamp = None;
        for event in queue {
            if last_timestamp.map_or(false, |last| event.timestamp < last) {
                return Err(Error::state_restore(format!(
                    "{} is not ordered by timestamp",
                    EXPIRY_QUEUE
                )));
            }
            last_timestamp = Some(event.timestamp);
            let key = self.key.generate_key(&event);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.expiry_queue.push_back(ExpirySlot {
                seq,
                entry: Some((key, event)),
            });
        }

        let mut positions: FxHashMap<&UniqueKey, u64> = FxHashMap::default();
        for slot in &state.expiry_queue {
            if let Some((key, _)) = &slot.entry {
                if positions.insert(key, slot.seq).is_some() {
                    return Err(Error::state_restore(format!(
                        "{} holds more than one event for key {}",
                        EXPIRY_QUEUE, key
                    )));
                }
            }
        }
        let mut active = FxHashMap::default();
        for KeyedEvent { key, event } in key_map {
            let key = UniqueKey::from(key);
            let seq = positions.get(&key).copied().ok_or_else(|| {
                Error::state_restore(format!(
                    "{} entry {} has no event in {}",
                    KEY_MAP, key, EXPIRY_QUEUE
                ))
            })?;
            active.insert(key, ActiveEntry { seq, event });
        }
        if active.len() != positions.len() {
            return Err(Error::state_restore(format!(
                "{} holds {} keys but {} holds {}",
                EXPIRY_QUEUE,
                positions.len(),
                KEY_MAP,
                active.len()
            )));
        }
        state.active = active;
        state.last_scheduled = last_timestamp;
        Ok(state)
    }
}

impl Processor for SlidingUniqueWindow {
    fn process(&self, chunk: EventChunk) -> UniqueResult<()> {
        SlidingUniqueWindow::process(self, chunk)
    }
}

impl SchedulingProcessor for SlidingUniqueWindow {
    fn on_wake_up(&self, time: u64) -> UniqueResult<()> {
        trace!(self.logger, "Woken up at {}", time);
        self.process(EventChunk::new())
    }
}

impl FindableProcessor for SlidingUniqueWindow {
    fn find(&self, condition: &dyn Fn(&Event) -> bool) -> UniqueResult<EventChunk> {
        let state = lock_window(WINDOW_NAME, &self.state)?;
        Ok(state
            .live()
            .map(|(_, event)| event)
            .filter(|event| condition(*event))
            .cloned()
            .collect())
    }
}

impl Checkpointable for SlidingUniqueWindow {
    fn state_id(&self) -> &str {
        &self.state_id
    }

    fn snapshot(&self) -> UniqueResult<StateSnapshot> {
        let state = lock_window(WINDOW_NAME, &self.state)?;
        let mut snapshot = StateSnapshot::new();
        snapshot.put_events(
            EXPIRY_QUEUE,
            state.live().map(|(_, event)| event.clone()).collect(),
        );
        let mut entries: Vec<(&UniqueKey, &ActiveEntry)> = state.active.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        snapshot.put_keyed(
            KEY_MAP,
            entries
                .into_iter()
                .map(|(key, entry)| KeyedEvent {
                    key: key.as_str().to_string(),
                    event: entry.event.clone(),
                })
                .collect(),
        );
        Ok(snapshot)
    }

    fn restore(&self, snapshot: StateSnapshot) -> UniqueResult<()> {
        let restored = self.restored_state(snapshot)?;
        let mut state = lock_window(WINDOW_NAME, &self.state)?;
        *state = restored;

        let mut last = None;
        for (_, event) in state.live() {
            if last != Some(event.timestamp) {
                self.scheduler
                    .notify_at(event.timestamp.saturating_add(self.window_length));
                last = Some(event.timestamp);
            }
        }
        info!(self.logger, "Restored {} live keys", state.active.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::operator::window::test_utils::{rows, stock, Harness};
    use EventType::{Current, Expired};

    fn window(harness: &Harness, length: i64) -> SlidingUniqueWindow {
        let params = vec![Parameter::variable("symbol", 0), Parameter::long(length)];
        SlidingUniqueWindow::from_parameters(&params, harness.context()).unwrap()
    }

    fn feed(harness: &Harness, window: &SlidingUniqueWindow, event: Event) {
        harness.clock.set_time(event.timestamp);
        window.process(vec![event].into()).unwrap();
    }

    fn tick(harness: &Harness, window: &SlidingUniqueWindow, time: u64) {
        harness.clock.set_time(time);
        window.on_wake_up(time).unwrap();
    }

    #[test]
    fn duplicate_key_retracts_previous_event() {
        let harness = Harness::new();
        let window = window(&harness, 1000);

        feed(&harness, &window, stock(0, "IBM", 10));
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![(Current, 0, "IBM".into(), "10".into())]
        );

        feed(&harness, &window, stock(500, "IBM", 20));
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![
                (Expired, 500, "IBM".into(), "10".into()),
                (Current, 500, "IBM".into(), "20".into()),
            ]
        );

        // the first event's due time passes without another retraction
        tick(&harness, &window, 1000);
        assert!(harness.sink.take_events().is_empty());
        tick(&harness, &window, 1499);
        assert!(harness.sink.take_events().is_empty());
        assert_eq!(window.active_keys().unwrap(), 1);

        tick(&harness, &window, 1500);
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![(Expired, 1500, "IBM".into(), "20".into())]
        );
        assert_eq!(window.active_keys().unwrap(), 0);
    }

    #[test]
    fn unique_key_expires_exactly_once() {
        let harness = Harness::new();
        let window = window(&harness, 1000);

        feed(&harness, &window, stock(100, "WSO2", 55));
        feed(&harness, &window, stock(300, "ORCL", 60));
        harness.sink.take_events();

        tick(&harness, &window, 1100);
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![(Expired, 1100, "WSO2".into(), "55".into())]
        );
        tick(&harness, &window, 1100);
        tick(&harness, &window, 1200);
        assert!(harness.sink.take_events().is_empty());

        // a late wake-up sweeps everything that became due
        tick(&harness, &window, 5000);
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![(Expired, 5000, "ORCL".into(), "60".into())]
        );
        tick(&harness, &window, 6000);
        assert!(harness.sink.take_events().is_empty());
    }

    #[test]
    fn expiry_rows_precede_the_arrival_that_triggered_them() {
        let harness = Harness::new();
        let window = window(&harness, 1000);

        feed(&harness, &window, stock(0, "A", 1));
        harness.sink.take_events();
        feed(&harness, &window, stock(1000, "B", 2));
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![
                (Expired, 1000, "A".into(), "1".into()),
                (Current, 1000, "B".into(), "2".into()),
            ]
        );
    }

    #[test]
    fn non_current_input_is_dropped() {
        let harness = Harness::new();
        let window = window(&harness, 1000);
        let chunk: EventChunk = vec![
            Event::with_type(0, EventType::Reset, vec!["A".into(), 1.into()]),
            stock(0, "A", 1),
            Event::with_type(0, EventType::Expired, vec!["B".into(), 2.into()]),
        ]
        .into();
        window.process(chunk).unwrap();
        assert_eq!(
            rows(&harness.sink.take_events()),
            vec![(Current, 0, "A".into(), "1".into())]
        );

        let only_control: EventChunk =
            vec![Event::with_type(10, EventType::Reset, vec![])].into();
        window.process(only_control).unwrap();
        assert!(harness.sink.take_chunks().is_empty());
    }

    #[test]
    fn wake_up_requests_are_non_decreasing() {
        let harness = Harness::new();
        let window = window(&harness, 1000);

        for (ts, symbol) in &[(0, "A"), (0, "B"), (200, "A"), (200, "C"), (700, "D")] {
            feed(&harness, &window, stock(*ts, symbol, 1));
        }
        let requests = harness.scheduler.requests();
        assert_eq!(requests, vec![1000, 1200, 1700]);
        assert!(requests.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn find_queries_live_events() {
        let harness = Harness::new();
        let window = window(&harness, 1000);
        feed(&harness, &window, stock(0, "A", 1));
        feed(&harness, &window, stock(100, "B", 2));
        feed(&harness, &window, stock(200, "A", 3));

        let found = window.find(&|_| true).unwrap();
        assert_eq!(
            rows(&found.into_events()),
            vec![
                (Expired, 100, "B".into(), "2".into()),
                (Expired, 200, "A".into(), "3".into()),
            ]
        );
        let found = window
            .find(&|e| e.data[0].to_string() == "A")
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn checkpoint_round_trip() {
        let original = Harness::new();
        let window_a = window(&original, 1000);
        feed(&original, &window_a, stock(0, "A", 1));
        feed(&original, &window_a, stock(300, "B", 2));
        feed(&original, &window_a, stock(600, "A", 3));
        original.sink.take_events();

        let bytes = window_a.snapshot().unwrap().to_bytes().unwrap();

        let restored = Harness::new();
        let window_b = window(&restored, 1000);
        window_b
            .restore(StateSnapshot::from_bytes(&bytes).unwrap())
            .unwrap();
        assert_eq!(restored.scheduler.requests(), vec![1300, 1600]);

        let script: Vec<(u64, Option<Event>)> = vec![
            (900, Some(stock(900, "B", 4))),
            (1300, None),
            (1600, None),
            (1700, Some(stock(1700, "C", 5))),
            (1900, None),
        ];
        for (time, input) in script {
            for (harness, window) in &[(&original, &window_a), (&restored, &window_b)] {
                match &input {
                    Some(event) => feed(harness, window, event.clone()),
                    None => tick(harness, window, time),
                }
            }
            assert_eq!(original.sink.take_chunks(), restored.sink.take_chunks());
        }
    }

    #[test]
    fn restore_rejects_inconsistent_snapshots() {
        let harness = Harness::new();
        let window = window(&harness, 1000);

        let mut single = StateSnapshot::new();
        single.put_events(EXPIRY_QUEUE, vec![]);
        assert!(matches!(
            window.restore(single),
            Err(Error::StateRestore { .. })
        ));

        let mut orphan = StateSnapshot::new();
        orphan.put_events(EXPIRY_QUEUE, vec![stock(0, "A", 1).copy_as(Expired)]);
        orphan.put_keyed(KEY_MAP, vec![]);
        assert!(matches!(
            window.restore(orphan),
            Err(Error::StateRestore { .. })
        ));

        let mut unknown = StateSnapshot::new();
        unknown.put_events(EXPIRY_QUEUE, vec![]);
        unknown.put_keyed(
            KEY_MAP,
            vec![KeyedEvent {
                key: "A".into(),
                event: stock(0, "A", 1),
            }],
        );
        assert!(window.restore(unknown).is_err());
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let harness = Harness::new();
        let cases = vec![
            vec![Parameter::variable("symbol", 0)],
            vec![Parameter::int(1), Parameter::int(1000)],
            vec![
                Parameter::variable("symbol", 0),
                Parameter::variable("time", 1),
            ],
            vec![Parameter::variable("symbol", 0), Parameter::long(-1)],
            vec![
                Parameter::variable("symbol", 0),
                Parameter::int(1000),
                Parameter::int(0),
            ],
        ];
        for params in cases {
            let result = SlidingUniqueWindow::from_parameters(&params, harness.context());
            assert!(matches!(result, Err(Error::Validation { .. })));
        }
        assert!(
            SlidingUniqueWindow::from_parameters(
                &[Parameter::variable("symbol", 0), Parameter::int(1000)],
                harness.context()
            )
            .is_ok()
        );
    }
}
