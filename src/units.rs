//! Tachometer unit conversions
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! Every rate is derived from the pulse rate `SR * 8192 / count`, where 8192 Hz is the
//! tachometer clock of the device. A count of zero or the saturation value carries no rate
//! information and is reported as no signal.
use core::str::FromStr;

use enum_iterator::Sequence;
use serde::{Deserialize, Serialize};

use crate::register::{Field, SpeedRange};
use crate::settings::{ChannelSettings, CUBIC_METERS_PER_GALLON, LITERS_PER_CUBIC_METER};

/// Tachometer clock frequency of the device in Hz.
pub const TACH_CLOCK_HZ: u32 = 8192;

/// A quantity that can be read or written on a channel, named by its tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Sequence)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quantity {
    /// Raw duty cycle, 0 to 511.
    Pwm,
    /// Duty cycle in percent.
    Spd,
    /// Speed range.
    Sr,
    /// Pulses per revolution.
    Ppr,
    /// Pulses per cubic meter.
    Ppm3,
    /// Pulses per liter.
    Ppl,
    /// Pulses per US gallon.
    Ppg,
    /// Raw tachometer count.
    Tac,
    /// Pulses per second.
    Pps,
    /// Pulses per minute.
    Ppm,
    /// Pulses per hour.
    Pph,
    /// Revolutions per second.
    Rps,
    /// Revolutions per minute.
    Rpm,
    /// Revolutions per hour.
    Rph,
    /// Cubic meters per second.
    M3ps,
    /// Cubic meters per minute.
    M3pm,
    /// Cubic meters per hour.
    M3ph,
    /// Liters per second.
    Lps,
    /// Liters per minute.
    Lpm,
    /// Liters per hour.
    Lph,
    /// US gallons per second.
    Gps,
    /// US gallons per minute.
    Gpm,
    /// US gallons per hour.
    Gph,
}

/// What a rate counts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Unit {
    Pulses,
    Revolutions,
    CubicMeters,
    Liters,
    Gallons,
}

/// The time base of a rate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Per {
    Second,
    Minute,
    Hour,
}

impl Per {
    fn seconds(self) -> f32 {
        match self {
            Per::Second => 1.0,
            Per::Minute => 60.0,
            Per::Hour => 3600.0,
        }
    }
}

/// A tag that does not name any [`Quantity`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnknownQuantity;

impl Quantity {
    /// The tag naming the quantity, such as `"RPM"` or `"M3PS"`.
    pub fn tag(self) -> &'static str {
        match self {
            Quantity::Pwm => "PWM",
            Quantity::Spd => "SPD",
            Quantity::Sr => "SR",
            Quantity::Ppr => "PPR",
            Quantity::Ppm3 => "PPM3",
            Quantity::Ppl => "PPL",
            Quantity::Ppg => "PPG",
            Quantity::Tac => "TAC",
            Quantity::Pps => "PPS",
            Quantity::Ppm => "PPM",
            Quantity::Pph => "PPH",
            Quantity::Rps => "RPS",
            Quantity::Rpm => "RPM",
            Quantity::Rph => "RPH",
            Quantity::M3ps => "M3PS",
            Quantity::M3pm => "M3PM",
            Quantity::M3ph => "M3PH",
            Quantity::Lps => "LPS",
            Quantity::Lpm => "LPM",
            Quantity::Lph => "LPH",
            Quantity::Gps => "GPS",
            Quantity::Gpm => "GPM",
            Quantity::Gph => "GPH",
        }
    }

    /// Decompose a rate quantity into what it counts and its time base.
    ///
    /// # Returns
    /// None if the quantity is not a rate derived from the tachometer.
    pub fn rate(self) -> Option<(Unit, Per)> {
        let rate = match self {
            Quantity::Pps => (Unit::Pulses, Per::Second),
            Quantity::Ppm => (Unit::Pulses, Per::Minute),
            Quantity::Pph => (Unit::Pulses, Per::Hour),
            Quantity::Rps => (Unit::Revolutions, Per::Second),
            Quantity::Rpm => (Unit::Revolutions, Per::Minute),
            Quantity::Rph => (Unit::Revolutions, Per::Hour),
            Quantity::M3ps => (Unit::CubicMeters, Per::Second),
            Quantity::M3pm => (Unit::CubicMeters, Per::Minute),
            Quantity::M3ph => (Unit::CubicMeters, Per::Hour),
            Quantity::Lps => (Unit::Liters, Per::Second),
            Quantity::Lpm => (Unit::Liters, Per::Minute),
            Quantity::Lph => (Unit::Liters, Per::Hour),
            Quantity::Gps => (Unit::Gallons, Per::Second),
            Quantity::Gpm => (Unit::Gallons, Per::Minute),
            Quantity::Gph => (Unit::Gallons, Per::Hour),
            _ => return None,
        };

        Some(rate)
    }
}

impl FromStr for Quantity {
    type Err = UnknownQuantity;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        enum_iterator::all::<Quantity>()
            .find(|quantity| quantity.tag() == tag)
            .ok_or(UnknownQuantity)
    }
}

/// Check if a tachometer count carries rate information.
pub fn has_signal(tach_count: u16) -> bool {
    tach_count != 0 && tach_count < Field::Tach.max()
}

/// Compute the tachometer pulse rate.
///
/// # Args
/// * `speed_range` - The speed range the count was accumulated with.
/// * `tach_count` - The 11-bit tachometer count.
///
/// # Returns
/// The pulses per second, or None if the count is zero or saturated.
pub fn pulses_per_second(speed_range: SpeedRange, tach_count: u16) -> Option<f32> {
    if !has_signal(tach_count) {
        return None;
    }

    Some((speed_range.value() * TACH_CLOCK_HZ) as f32 / tach_count as f32)
}

/// Convert a pulse rate into another rate.
///
/// # Args
/// * `pulses_per_second` - The tachometer pulse rate.
/// * `unit` - What the result counts.
/// * `per` - The time base of the result.
/// * `settings` - The calibration of the channel.
pub fn convert(pulses_per_second: f32, unit: Unit, per: Per, settings: &ChannelSettings) -> f32 {
    let per_second = match unit {
        Unit::Pulses => pulses_per_second,
        Unit::Revolutions => pulses_per_second / *settings.pulses_per_revolution as f32,
        Unit::CubicMeters => pulses_per_second / *settings.pulses_per_cubic_meter,
        Unit::Liters => {
            pulses_per_second / (*settings.pulses_per_cubic_meter / LITERS_PER_CUBIC_METER)
        }
        Unit::Gallons => {
            pulses_per_second / (*settings.pulses_per_cubic_meter * CUBIC_METERS_PER_GALLON)
        }
    };

    per_second * per.seconds()
}
