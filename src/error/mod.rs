// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// A helper macro to indicate a reportable bug
#[macro_export]
macro_rules! reportable_error {
    ( $($arg:tt)* ) => ({
        $crate::error::UniqueResult::Err($crate::error::Error::ReportableBug { msg: format!($($arg)*) })
    })
}

pub mod timer;

use snafu::Snafu;
use std::io;

/// Top level Result type for unique windows
pub type UniqueResult<T> = std::result::Result<T, Error>;

/// A top level Error type holding window errors that cause a total pipeline halt
#[derive(Debug, Snafu)]
pub enum Error {
    /// A window was configured with parameters of the wrong count or shape.
    #[snafu(display("Invalid window configuration: {}", msg))]
    Validation { msg: String },
    /// Checkpoint data could not be turned back into window state.
    #[snafu(display("Failed to restore window state: {}", msg))]
    StateRestore { msg: String },
    /// A configuration file could not be read or resolved.
    #[snafu(display("Failed to load configuration: {}", msg))]
    Config { msg: String },
    /// The system has been used in an unsupported way.
    #[snafu(display("Unsupported operation {}", msg))]
    Unsupported { msg: String },
    /// An unexpected bug has happened. Please open an issue on github!
    #[snafu(display(
        "Unexpected bug {} please report at https://github.com/cda-group/arcon",
        msg
    ))]
    ReportableBug { msg: String },
    /// A read or write error has happened when interacting with the file system.
    #[snafu(display("An IO error occured {}", error))]
    Io { error: io::Error },
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation { msg: msg.into() }
    }

    pub(crate) fn state_restore(msg: impl Into<String>) -> Self {
        Error::StateRestore { msg: msg.into() }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        Error::Io { error: io_error }
    }
}

// Undecodable checkpoint bytes are never retried
impl From<prost::DecodeError> for Error {
    fn from(error: prost::DecodeError) -> Self {
        Error::StateRestore {
            msg: format!("malformed snapshot bytes: {}", error),
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> io::Error {
        use self::Error::*;
        use std::io::ErrorKind;
        match error {
            Io { error } => error,
            Validation { ref msg } => io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid window configuration: {:?}", msg),
            ),
            Config { ref msg } => io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid configuration file: {:?}", msg),
            ),
            Unsupported { ref msg } => io::Error::new(
                ErrorKind::InvalidInput,
                format!("operation not supported: {:?}", msg),
            ),
            StateRestore { msg } => io::Error::new(
                ErrorKind::InvalidData,
                format!("corruption encountered: {:?}", msg),
            ),
            ReportableBug { ref msg } => io::Error::new(
                ErrorKind::Other,
                format!(
                    "unexpected bug! please report this bug at github.com/cda-group/arcon {:?}",
                    msg
                ),
            ),
        }
    }
}
