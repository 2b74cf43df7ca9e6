// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use arcon_unique::{conf::logger::discard_logger, prelude::*};
use criterion::{criterion_group, criterion_main, Bencher, Criterion, Throughput};
use std::sync::Arc;

const TOTAL_KEYS: u64 = 1000;
const TOTAL_EVENTS: u64 = 10000;
const WINDOW_MILLIS: i64 = 500;

fn unique_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("unique_window");
    group.throughput(Throughput::Elements(TOTAL_EVENTS));

    group.bench_function("Sliding Unique Window", sliding_window);
    group.bench_function("Tumbling Unique Batch Window", batch_window);

    group.finish()
}

/// Events spread over `TOTAL_KEYS` keys, one millisecond apart
fn events() -> Vec<Event> {
    (0..TOTAL_EVENTS)
        .map(|i| {
            let key = (i * 7919) % TOTAL_KEYS;
            Event::new(i, vec![(key as i64).into(), (i as f64).into()])
        })
        .collect()
}

fn context(clock: Arc<ManualClock>) -> WindowContext {
    let scheduler = Arc::new(WheelScheduler::with_clock(clock.as_ref(), discard_logger()));
    WindowContext::new(
        scheduler,
        Arc::new(DebugSink::new()),
        clock,
        discard_logger(),
    )
}

fn params() -> Vec<Parameter> {
    vec![
        Parameter::variable("key", 0),
        Parameter::long(WINDOW_MILLIS),
    ]
}

fn sliding_window(b: &mut Bencher) {
    let input = events();
    b.iter(|| {
        let clock = Arc::new(ManualClock::new(0));
        let window = SlidingUniqueWindow::from_parameters(&params(), context(clock.clone())).unwrap();
        for event in &input {
            clock.set_time(event.timestamp);
            window.process(vec![event.clone()].into()).unwrap();
        }
    });
}

fn batch_window(b: &mut Bencher) {
    let input = events();
    b.iter(|| {
        let clock = Arc::new(ManualClock::new(0));
        let window =
            TumblingUniqueBatchWindow::from_parameters(&params(), context(clock.clone())).unwrap();
        for event in &input {
            clock.set_time(event.timestamp);
            window.process(vec![event.clone()].into()).unwrap();
        }
    });
}

criterion_group!(benches, unique_window);
criterion_main!(benches);
