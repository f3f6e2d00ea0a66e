//! Per-channel calibration settings
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! Calibration lives in driver memory only and is never read back from the device. The settings
//! derive `miniconf::Tree`, so a host may expose them for runtime configuration. Settings edited
//! that way are applied to the driver through `Max31790::set_settings`, which validates them.
use miniconf::{Leaf, Tree};

/// Volume of a US liquid gallon in cubic meters.
pub const CUBIC_METERS_PER_GALLON: f32 = 0.003785411784;

/// Liters in a cubic meter.
pub const LITERS_PER_CUBIC_METER: f32 = 1000.0;

/// Represents calibration values of a single fan channel.
#[derive(Tree, Debug, Copy, Clone, PartialEq)]
pub struct ChannelSettings {
    /// Tachometer pulses per fan revolution.
    pub pulses_per_revolution: Leaf<u8>,

    /// Tachometer pulses per cubic meter of flow, for flow meters on the tachometer input.
    pub pulses_per_cubic_meter: Leaf<f32>,

    /// Tune the speed range before every tachometer derived reading.
    pub autotune: Leaf<bool>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            // Most PC fans emit two pulses per revolution.
            pulses_per_revolution: Leaf::from(2),
            pulses_per_cubic_meter: Leaf::from(1_000_000.0),
            autotune: Leaf::from(false),
        }
    }
}

impl ChannelSettings {
    /// Check that all calibration constants are strictly positive.
    pub fn is_valid(&self) -> bool {
        *self.pulses_per_revolution > 0 && valid_pulse_constant(*self.pulses_per_cubic_meter)
    }

    /// Tachometer pulses per liter of flow.
    pub fn pulses_per_liter(&self) -> f32 {
        *self.pulses_per_cubic_meter / LITERS_PER_CUBIC_METER
    }

    /// Tachometer pulses per US gallon of flow.
    pub fn pulses_per_gallon(&self) -> f32 {
        *self.pulses_per_cubic_meter * CUBIC_METERS_PER_GALLON
    }
}

/// Check a flow calibration constant. NaN and infinities are rejected along with non-positive
/// values.
pub(crate) fn valid_pulse_constant(value: f32) -> bool {
    value.is_finite() && value > 0.0
}
