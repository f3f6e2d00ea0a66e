//! Register map and field encodings of the MAX31790
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use bit_field::BitField;
use enum_iterator::Sequence;
use serde::{Deserialize, Serialize};

use crate::Error;

/// The number of fan channels on the device.
pub const CHANNELS: usize = 6;

#[doc(hidden)]
#[derive(Copy, Clone, Debug)]
/// Represents various registers that can be read or written on the controller. Channel registers
/// hold the offset of the channel 1 instance.
pub(crate) enum Register {
    GlobalConfig = 0x00,
    PwmFrequency = 0x01,
    FanConfig = 0x02,
    FanDynamics = 0x08,
    FanFaultStatus = 0x11,
    FanFaultMask = 0x13,
    FailedFanOptions = 0x14,

    // Two byte registers, one pair per channel.
    TachCount = 0x18,

    // Note: The duty cycle register reads out the current duty cycle, which lags the target
    // written to `PwmOut` while the duty cycle ramps.
    PwmDutyCycle = 0x30,
    PwmOut = 0x40,
    TachTarget = 0x50,
}

impl Register {
    /// Get the register offset for a channel.
    ///
    /// # Args
    /// * `index` - The zero-based channel index.
    pub fn offset(self, index: usize) -> u8 {
        let base = self as u8;
        match self {
            Register::FanConfig | Register::FanDynamics => base + index as u8,
            Register::TachCount
            | Register::PwmDutyCycle
            | Register::PwmOut
            | Register::TachTarget => base + 2 * index as u8,
            _ => base,
        }
    }
}

/// An indication of which fan channel to operate on. Valid channels are 1 through 6.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Channel(pub u8);

impl Channel {
    /// Iterate over all channels of the device.
    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=CHANNELS as u8).map(Channel)
    }

    /// Get the zero-based index of the channel.
    pub(crate) fn index<E>(self) -> Result<usize, Error<E>> {
        if (1..=CHANNELS as u8).contains(&self.0) {
            Ok(self.0 as usize - 1)
        } else {
            Err(Error::InvalidChannel)
        }
    }
}

/// The way a fan output is driven.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveMode {
    /// Open-loop, the output follows the programmed duty cycle.
    Pwm,

    /// Closed-loop, the device servos the duty cycle to reach the tachometer target.
    Rpm,
}

impl DriveMode {
    /// The mode bit of the fan configuration register.
    pub(crate) const BIT: usize = 7;

    pub(crate) fn from_bit(bit: bool) -> Self {
        if bit {
            DriveMode::Rpm
        } else {
            DriveMode::Pwm
        }
    }

    pub(crate) fn bit(self) -> bool {
        self == DriveMode::Rpm
    }
}

/// The tachometer speed range. The device accumulates `SR` tachometer periods per count, so a
/// larger speed range measures slower fans but saturates sooner on fast ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Sequence)]
pub enum SpeedRange {
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
    Sixteen = 16,
    ThirtyTwo = 32,
}

impl SpeedRange {
    /// The bits of the fan dynamics register holding the speed range code.
    pub(crate) const BITS: core::ops::Range<usize> = 5..8;

    pub const MIN: SpeedRange = SpeedRange::One;
    pub const MAX: SpeedRange = SpeedRange::ThirtyTwo;

    /// Look up the speed range for a multiplier of 1, 2, 4, 8, 16 or 32.
    pub fn from_value(value: u32) -> Option<Self> {
        enum_iterator::all::<SpeedRange>().find(|sr| sr.value() == value)
    }

    /// The multiplier of the speed range.
    pub fn value(self) -> u32 {
        self as u32
    }

    /// The register code of the speed range, `log2(SR)`.
    pub(crate) fn code(self) -> u8 {
        self.value().trailing_zeros() as u8
    }

    /// Decode a register code.
    ///
    /// # Note
    /// Codes 0b110 and 0b111 are never written by the driver and decode to `None`.
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        enum_iterator::all::<SpeedRange>().find(|sr| sr.code() == code)
    }
}

/// PWM output frequencies supported by the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PwmFrequency {
    Hz25 = 0b0000,
    Hz30 = 0b0001,
    Hz35 = 0b0010,
    Hz100 = 0b0011,
    Hz125 = 0b0100,
    Hz149 = 0b0101,
    Hz1250 = 0b0110,
    Hz1470 = 0b0111,
    Hz3570 = 0b1000,
    Hz5000 = 0b1001,
    Hz12500 = 0b1010,
    Hz25000 = 0b1011,
}

impl PwmFrequency {
    /// The PWM frequency register value selecting this frequency for channels 1-3 (low nibble)
    /// and channels 4-6 (high nibble).
    pub(crate) fn register_value(self) -> u8 {
        let mut value = 0u8;
        value.set_bits(0..4, self as u8);
        value.set_bits(4..8, self as u8);
        value
    }
}

/// A magnitude left-justified in a two byte, big-endian register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Field {
    /// 9-bit duty cycle, shifted by 7.
    DutyCycle,

    /// 11-bit tachometer count or target, shifted by 5.
    Tach,
}

impl Field {
    fn shift(self) -> usize {
        match self {
            Field::DutyCycle => 7,
            Field::Tach => 5,
        }
    }

    /// The largest magnitude the field holds.
    pub fn max(self) -> u16 {
        u16::MAX >> self.shift()
    }

    pub fn decode(self, data: [u8; 2]) -> u16 {
        u16::from_be_bytes(data).get_bits(self.shift()..16)
    }

    /// Encode a magnitude. The caller guarantees `value <= self.max()`.
    pub fn encode(self, value: u16) -> [u8; 2] {
        let mut raw = 0u16;
        raw.set_bits(self.shift()..16, value);
        raw.to_be_bytes()
    }
}
