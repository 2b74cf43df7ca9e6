// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// Cursor based event sequences
pub mod chunk;

pub use chunk::EventChunk;

use prost::{Enumeration, Message as PMessage, Oneof as POneof};
use std::fmt;

/// A type alias for registered window state
pub type StateID = String;

/// Type tag of an [Event]
#[derive(Enumeration, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum EventType {
    /// A newly arrived data row
    Current = 0,
    /// A retraction of a previously emitted row
    Expired = 1,
    /// Marker telling downstream per-batch state to clear
    Reset = 2,
}

/// A single attribute value
#[derive(POneof, Clone, PartialEq)]
pub enum Value {
    #[prost(int32, tag = "1")]
    Int(i32),
    #[prost(int64, tag = "2")]
    Long(i64),
    #[prost(float, tag = "3")]
    Float(f32),
    #[prost(double, tag = "4")]
    Double(f64),
    #[prost(bool, tag = "5")]
    Bool(bool),
    #[prost(string, tag = "6")]
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
        }
    }
}

// prost does not allow repeated oneof fields, so every value is wrapped.
// A missing inner value is a null attribute.

/// Positional attribute of an [Event]
#[derive(PMessage, Clone, PartialEq)]
pub struct Attribute {
    #[prost(oneof = "Value", tags = "1, 2, 3, 4, 5, 6")]
    pub value: Option<Value>,
}

impl Attribute {
    pub fn null() -> Self {
        Attribute { value: None }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => v.fmt(f),
            None => f.write_str("null"),
        }
    }
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        Attribute { value: Some(value) }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }

            impl From<$ty> for Attribute {
                fn from(v: $ty) -> Self {
                    Attribute::from(Value::from(v))
                }
            }
        )*
    };
}

impl_value_from!(
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    bool => Bool,
    String => Str,
    &str => Str
);

/// A stream event with a timestamp, a type tag and fixed-arity attributes
///
/// `Clone` yields an independent copy, stored window state never
/// aliases the upstream original.
#[derive(PMessage, Clone, PartialEq)]
pub struct Event {
    #[prost(uint64, tag = "1")]
    pub timestamp: u64,
    #[prost(enumeration = "EventType", tag = "2")]
    pub event_type: i32,
    #[prost(message, repeated, tag = "3")]
    pub data: Vec<Attribute>,
}

impl Event {
    /// Creates a CURRENT event
    pub fn new(timestamp: u64, data: Vec<Attribute>) -> Self {
        Self::with_type(timestamp, EventType::Current, data)
    }

    pub fn with_type(timestamp: u64, event_type: EventType, data: Vec<Attribute>) -> Self {
        Event {
            timestamp,
            event_type: event_type as i32,
            data,
        }
    }

    /// Returns the attribute at `position`, if the event has one
    #[inline]
    pub fn attribute(&self, position: usize) -> Option<&Attribute> {
        self.data.get(position)
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        self.event_type() == EventType::Current
    }

    /// Clone of this event carrying another type tag
    #[inline]
    pub fn copy_as(&self, event_type: EventType) -> Event {
        let mut copy = self.clone();
        copy.set_event_type(event_type);
        copy
    }
}
