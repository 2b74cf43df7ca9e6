// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::data::Event;
use std::fmt::{self, Write};

/// Dedup key identifying "the same logical entity"
///
/// Built by concatenating the stringified key attributes, so values of
/// different types that print identically (e.g. `1` as int and `1` as long)
/// collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueKey(String);

impl UniqueKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UniqueKey {
    fn from(key: String) -> Self {
        UniqueKey(key)
    }
}

impl From<UniqueKey> for String {
    fn from(key: UniqueKey) -> Self {
        key.0
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives a [UniqueKey] from attribute positions of an [Event]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyExtractor {
    positions: Vec<usize>,
}

impl KeyExtractor {
    pub fn new(positions: Vec<usize>) -> Self {
        KeyExtractor { positions }
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Concatenates the attribute values at the configured positions in order
    ///
    /// Positions beyond the event's arity contribute `null`.
    pub fn generate_key(&self, event: &Event) -> UniqueKey {
        let mut key = String::new();
        for &position in &self.positions {
            // writing into a String cannot fail
            let _ = match event.attribute(position) {
                Some(attribute) => write!(key, "{}", attribute),
                None => key.write_str("null"),
            };
        }
        UniqueKey(key)
    }
}

impl From<usize> for KeyExtractor {
    fn from(position: usize) -> Self {
        KeyExtractor::new(vec![position])
    }
}
