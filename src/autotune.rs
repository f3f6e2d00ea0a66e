//! Speed range tuning
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! The tachometer count of the device is 11 bits wide and saturates at 2047. The speed range
//! scales the count, so the tuner searches for the speed range that puts the averaged count
//! into 1000..=2040 where the count resolution is best without risking saturation.
use serde::{Deserialize, Serialize};

use crate::register::{Channel, SpeedRange};
use crate::Error;

/// Averaged counts above this are treated as saturated.
const SATURATION_LIMIT: f32 = 2040.0;

/// Averaged counts above this (and not saturated) are in the target band.
const BAND_LOWER_LIMIT: f32 = 1000.0;

/// Parameters of the speed range tuner.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TuneConfig {
    /// The number of tachometer samples averaged for each decision. Must not be zero.
    pub samples: usize,

    /// The maximum number of speed range changes in one tuning attempt.
    pub max_steps: usize,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            samples: 20,
            max_steps: 10,
        }
    }
}

/// Access to the speed range and tachometer of a channel.
pub trait SpeedRangeControl {
    type Error;

    /// Read the current speed range.
    fn speed_range(&mut self, channel: Channel) -> Result<SpeedRange, Error<Self::Error>>;

    /// Change the speed range.
    fn set_speed_range(
        &mut self,
        channel: Channel,
        speed_range: SpeedRange,
    ) -> Result<(), Error<Self::Error>>;

    /// Take a single tachometer count sample.
    fn tach_count(&mut self, channel: Channel) -> Result<u16, Error<Self::Error>>;
}

/// The outcome of evaluating one averaged sample batch.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Step {
    Settled,
    Adjust(SpeedRange),
    Saturated,
}

/// Decide how to proceed from an averaged count taken at a speed range.
fn next_step(average: f32, speed_range: SpeedRange) -> Step {
    if average <= SATURATION_LIMIT {
        if speed_range == SpeedRange::MAX || average > BAND_LOWER_LIMIT {
            return Step::Settled;
        }
    } else {
        return match SpeedRange::from_code(speed_range.code().wrapping_sub(1)) {
            Some(halved) => Step::Adjust(halved),
            None => Step::Saturated,
        };
    }

    // The count is low. Jump as far as the count allows without saturating, assuming it scales
    // with the speed range.
    let code = speed_range.code();
    let target = if average > 500.0 && code < 4 {
        code + 1
    } else if average > 250.0 && code < 3 {
        code + 2
    } else if average > 125.0 && code < 2 {
        code + 3
    } else if average > 62.0 && code < 1 {
        SpeedRange::Sixteen.code()
    } else {
        SpeedRange::MAX.code()
    };

    Step::Adjust(SpeedRange::from_code(target).unwrap_or(SpeedRange::MAX))
}

/// Take an equally weighted average of consecutive tachometer samples.
fn average_count<C: SpeedRangeControl>(
    control: &mut C,
    channel: Channel,
    samples: usize,
) -> Result<f32, Error<C::Error>> {
    let mut average = 0.0f32;
    for n in 1..=samples {
        let count = control.tach_count(channel)? as f32;
        average += (count - average) / n as f32;
    }

    Ok(average)
}

/// Tune the speed range of a channel.
///
/// # Note
/// Every speed range change is written before the next sample batch is taken. On error, the
/// last speed range written stays in effect. The resulting speed range is not returned and can be
/// read back from the device.
///
/// # Args
/// * `control` - Access to the channel speed range and tachometer.
/// * `channel` - The channel to tune.
/// * `config` - The tuner parameters.
///
/// # Returns
/// Ok if the averaged count settled in the target band or the speed range is at its maximum.
/// `TuningUnreachable` if the count saturates at the minimum speed range and `NotConverged` if
/// `config.max_steps` changes did not settle.
pub fn tune<C: SpeedRangeControl>(
    control: &mut C,
    channel: Channel,
    config: &TuneConfig,
) -> Result<(), Error<C::Error>> {
    if config.samples == 0 {
        return Err(Error::InvalidArgument);
    }

    let mut speed_range = control.speed_range(channel)?;
    let mut steps = 0;

    loop {
        let average = average_count(control, channel, config.samples)?;

        match next_step(average, speed_range) {
            Step::Settled => {
                log::info!(
                    "Channel {} settled at SR {} with average count {}",
                    channel.0,
                    speed_range.value(),
                    average
                );
                return Ok(());
            }
            Step::Saturated => {
                log::warn!(
                    "Channel {} saturates at SR {} (average count {})",
                    channel.0,
                    speed_range.value(),
                    average
                );
                return Err(Error::TuningUnreachable);
            }
            Step::Adjust(next) => {
                if steps == config.max_steps {
                    log::warn!(
                        "Channel {} did not settle after {} speed range changes",
                        channel.0,
                        steps
                    );
                    return Err(Error::NotConverged);
                }

                log::debug!(
                    "Channel {}: average count {} at SR {}, switching to SR {}",
                    channel.0,
                    average,
                    speed_range.value(),
                    next.value()
                );

                control.set_speed_range(channel, next)?;
                speed_range = next;
                steps += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{vec, vec::Vec};

    /// A simulated channel whose tachometer count is produced from the speed range.
    struct SimulatedFan<F> {
        speed_range: SpeedRange,
        count: F,
        writes: Vec<SpeedRange>,
        samples: usize,
        fail_after: Option<usize>,
    }

    impl<F: FnMut(SpeedRange) -> u16> SimulatedFan<F> {
        fn new(speed_range: SpeedRange, count: F) -> Self {
            Self {
                speed_range,
                count,
                writes: Vec::new(),
                samples: 0,
                fail_after: None,
            }
        }
    }

    impl<F: FnMut(SpeedRange) -> u16> SpeedRangeControl for SimulatedFan<F> {
        type Error = ();

        fn speed_range(&mut self, _channel: Channel) -> Result<SpeedRange, Error<()>> {
            Ok(self.speed_range)
        }

        fn set_speed_range(
            &mut self,
            _channel: Channel,
            speed_range: SpeedRange,
        ) -> Result<(), Error<()>> {
            self.speed_range = speed_range;
            self.writes.push(speed_range);
            Ok(())
        }

        fn tach_count(&mut self, _channel: Channel) -> Result<u16, Error<()>> {
            if self.fail_after == Some(self.samples) {
                return Err(Error::Interface(()));
            }

            self.samples += 1;
            Ok((self.count)(self.speed_range))
        }
    }

    /// A fan producing `count_at_sr1` counts at SR 1, saturating at 2047.
    fn fan(count_at_sr1: u32) -> impl FnMut(SpeedRange) -> u16 {
        move |sr| (count_at_sr1 * sr.value()).min(2047) as u16
    }

    #[test]
    fn decision_table() {
        use SpeedRange::*;

        assert_eq!(next_step(100.0, ThirtyTwo), Step::Settled);
        assert_eq!(next_step(2040.0, Four), Step::Settled);
        assert_eq!(next_step(1000.5, Two), Step::Settled);
        assert_eq!(next_step(2040.5, Four), Step::Adjust(Two));
        assert_eq!(next_step(2047.0, One), Step::Saturated);
        assert_eq!(next_step(600.0, Eight), Step::Adjust(Sixteen));
        assert_eq!(next_step(600.0, Sixteen), Step::Adjust(ThirtyTwo));
        assert_eq!(next_step(300.0, Four), Step::Adjust(Sixteen));
        assert_eq!(next_step(300.0, Eight), Step::Adjust(ThirtyTwo));
        assert_eq!(next_step(200.0, Two), Step::Adjust(Sixteen));
        assert_eq!(next_step(200.0, Four), Step::Adjust(ThirtyTwo));
        assert_eq!(next_step(100.0, One), Step::Adjust(Sixteen));
        assert_eq!(next_step(62.0, One), Step::Adjust(ThirtyTwo));
        assert_eq!(next_step(1000.0, Two), Step::Adjust(Four));
    }

    #[test]
    fn in_band_is_left_alone() {
        let mut sim = SimulatedFan::new(SpeedRange::Four, |_| 1500);
        tune(&mut sim, Channel(1), &TuneConfig::default()).unwrap();

        assert_eq!(sim.speed_range, SpeedRange::Four);
        assert!(sim.writes.is_empty());
        assert_eq!(sim.samples, 20);
    }

    #[test]
    fn saturation_at_minimum() {
        let mut sim = SimulatedFan::new(SpeedRange::Four, |_| 4000);
        let result = tune(&mut sim, Channel(2), &TuneConfig::default());

        assert_eq!(result, Err(Error::TuningUnreachable));
        assert_eq!(sim.writes, vec![SpeedRange::Two, SpeedRange::One]);
        assert_eq!(sim.samples, 60);
    }

    #[test]
    fn slow_fan_jumps_up() {
        // A 4000 RPM fan with two pulses per revolution counts 61 at SR 1.
        let mut sim = SimulatedFan::new(SpeedRange::Four, fan(61));
        tune(&mut sim, Channel(3), &TuneConfig::default()).unwrap();

        assert_eq!(sim.writes, vec![SpeedRange::ThirtyTwo]);
    }

    #[test]
    fn fast_fan_steps_down() {
        // A 500 RPM fan counts 491 at SR 1 and saturates from SR 8 on.
        let mut sim = SimulatedFan::new(SpeedRange::ThirtyTwo, fan(491));
        tune(&mut sim, Channel(4), &TuneConfig::default()).unwrap();

        assert_eq!(
            sim.writes,
            vec![SpeedRange::Sixteen, SpeedRange::Eight, SpeedRange::Four]
        );
    }

    #[test]
    fn averaging_smooths_noise() {
        let mut n = 0u16;
        let noisy = move |_: SpeedRange| -> u16 {
            n += 1;
            if n % 10 == 0 {
                2047
            } else {
                1200
            }
        };

        let mut sim = SimulatedFan::new(SpeedRange::Eight, noisy);
        tune(&mut sim, Channel(1), &TuneConfig::default()).unwrap();
        assert!(sim.writes.is_empty());
    }

    #[test]
    fn oscillation_is_bounded() {
        // Reads far too low at SR 16 and saturates at SR 32.
        let erratic = |sr: SpeedRange| -> u16 {
            if sr == SpeedRange::ThirtyTwo {
                2047
            } else {
                50
            }
        };
        let mut sim = SimulatedFan::new(SpeedRange::Sixteen, erratic);

        let config = TuneConfig {
            samples: 4,
            max_steps: 3,
        };
        let result = tune(&mut sim, Channel(1), &config);

        assert_eq!(result, Err(Error::NotConverged));
        assert_eq!(sim.writes.len(), 3);
        assert_eq!(sim.samples, 16);
    }

    #[test]
    fn bus_errors_abort() {
        let mut sim = SimulatedFan::new(SpeedRange::Four, |_| 4000);
        sim.fail_after = Some(25);

        let result = tune(&mut sim, Channel(1), &TuneConfig::default());
        assert_eq!(result, Err(Error::Interface(())));
        assert_eq!(sim.writes, vec![SpeedRange::Two]);
    }

    #[test]
    fn zero_samples_rejected() {
        let mut sim = SimulatedFan::new(SpeedRange::Four, |_| 1500);
        let config = TuneConfig {
            samples: 0,
            ..TuneConfig::default()
        };

        assert_eq!(
            tune(&mut sim, Channel(1), &config),
            Err(Error::InvalidArgument)
        );
        assert_eq!(sim.samples, 0);
    }
}
