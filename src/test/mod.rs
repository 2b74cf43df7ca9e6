// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only


use crate::data::Event;

/// A CURRENT stock quote keyed on its symbol
pub fn quote(ts: u64, symbol: &str, price: f64) -> Event {
    Event::new(ts, vec![symbol.into(), price.into(), 100i64.into()])
}

/// `(type, timestamp, symbol)` of each event
pub fn summary(events: &[Event]) -> Vec<(crate::data::EventType, u64, String)> {
    events
        .iter()
        .map(|e| (e.event_type(), e.timestamp, e.data[0].to_string()))
        .collect()
}
