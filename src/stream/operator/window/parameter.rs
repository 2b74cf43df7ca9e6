// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::error::{Error, UniqueResult};
use std::fmt;

/// A compile-time constant window parameter
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
}

impl Constant {
    fn type_name(&self) -> &'static str {
        match self {
            Constant::Int(_) => "INT",
            Constant::Long(_) => "LONG",
            Constant::Float(_) => "FLOAT",
            Constant::Double(_) => "DOUBLE",
            Constant::Bool(_) => "BOOL",
            Constant::Str(_) => "STRING",
        }
    }
}

/// A positional window parameter as handed over by the query compiler
#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    /// Runtime-bound reference to an attribute of the input stream
    Variable { name: String, position: usize },
    Constant(Constant),
}

impl Parameter {
    pub fn variable(name: impl Into<String>, position: usize) -> Self {
        Parameter::Variable {
            name: name.into(),
            position,
        }
    }

    pub fn int(value: i32) -> Self {
        Parameter::Constant(Constant::Int(value))
    }

    pub fn long(value: i64) -> Self {
        Parameter::Constant(Constant::Long(value))
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Variable { name, position } => {
                write!(f, "variable '{}' at position {}", name, position)
            }
            Parameter::Constant(c) => write!(f, "{} constant {:?}", c.type_name(), c),
        }
    }
}

/// Ensures the window received an allowed number of parameters
pub(crate) fn expect_arity(
    window: &str,
    params: &[Parameter],
    allowed: &[usize],
    signature: &str,
) -> UniqueResult<()> {
    if allowed.contains(&params.len()) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{} window should only have {}, but found {} input attributes",
            window,
            signature,
            params.len()
        )))
    }
}

/// Resolves the unique key parameter into an attribute position
pub(crate) fn key_position(window: &str, param: &Parameter) -> UniqueResult<usize> {
    match param {
        Parameter::Variable { position, .. } => Ok(*position),
        other => Err(Error::validation(format!(
            "{} window should have a variable for the unique key parameter but found {}",
            window, other
        ))),
    }
}

/// Resolves an INT or LONG constant parameter
pub(crate) fn long_constant(window: &str, name: &str, param: &Parameter) -> UniqueResult<i64> {
    match param {
        Parameter::Constant(Constant::Int(v)) => Ok(i64::from(*v)),
        Parameter::Constant(Constant::Long(v)) => Ok(*v),
        Parameter::Constant(other) => Err(Error::validation(format!(
            "{} window's parameter {} should be either INT or LONG, but found {}",
            window,
            name,
            other.type_name()
        ))),
        Parameter::Variable { .. } => Err(Error::validation(format!(
            "{} window should have a constant for the {} parameter but found {}",
            window, name, param
        ))),
    }
}

/// Resolves a non-negative INT or LONG duration in milliseconds
pub(crate) fn millis_constant(window: &str, name: &str, param: &Parameter) -> UniqueResult<u64> {
    let value = long_constant(window, name, param)?;
    if value < 0 {
        return Err(Error::validation(format!(
            "{} window's parameter {} must not be negative, but found {}",
            window, name, value
        )));
    }
    Ok(value as u64)
}
