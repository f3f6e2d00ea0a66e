//! Error type definitions for the MAX31790 driver
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.

/// An error that the fan controller driver may encounter.
///
/// `E` is the error type of the underlying register bus.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Error<E> {
    /// The register bus transaction failed.
    Interface(E),

    /// The channel number is outside of 1..=6.
    InvalidChannel,

    /// An argument was out of range or otherwise not accepted.
    InvalidArgument,

    /// The tachometer reports a count of zero or the saturation value, so no rate can be derived.
    NoSignal,

    /// A register held a bit pattern the driver never writes.
    UnrecognizedEncoding,

    /// The averaged tachometer count saturates even at the smallest speed range.
    TuningUnreachable,

    /// The speed range tuner used all of its adjustment steps without settling.
    NotConverged,
}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Error<E> {
        Error::Interface(err)
    }
}
