//! Driver for the MAX31790 6-channel fan speed controller
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! This driver configures the drive mode, duty cycle, speed range and tachometer target of each
//! channel and converts tachometer counts into pulse, revolution and flow rates. Register state
//! is always read from the device. Only the per-channel calibration and the speed range tuner
//! parameters are held in the driver.
#![no_std]
#![deny(warnings)]

#[cfg(test)]
extern crate std;

use bit_field::BitField;
use serde::Serialize;

pub mod autotune;
pub mod bus;
mod error;
pub mod register;
pub mod settings;
pub mod units;

#[cfg(test)]
mod testing;

pub use autotune::{SpeedRangeControl, TuneConfig};
pub use bus::{I2cBus, RegisterBus};
pub use error::Error;
pub use register::{Channel, DriveMode, PwmFrequency, SpeedRange, CHANNELS};
pub use settings::ChannelSettings;
pub use units::{Per, Quantity, Unit};

use register::{Field, Register};
use settings::{CUBIC_METERS_PER_GALLON, LITERS_PER_CUBIC_METER};
use units::TACH_CLOCK_HZ;

fn divide_rounded(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator / 2) / denominator
}

/// A snapshot of the state of a channel.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ChannelReport {
    pub mode: DriveMode,
    pub speed_range: u32,
    pub duty_cycle: u16,
    pub tach_count: u16,

    /// None if the tachometer reports no signal.
    pub rpm: Option<f32>,
}

/// The driver for the MAX31790 fan controller.
pub struct Max31790<B> {
    bus: B,
    settings: [ChannelSettings; CHANNELS],
    tune_config: TuneConfig,
}

impl<B> Max31790<B>
where
    B: RegisterBus,
{
    /// Create a new MAX31790 driver.
    ///
    /// # Note
    /// The device is not configured. Use [`Max31790::initialize`] to reset it to a known state.
    ///
    /// # Args
    /// * `bus` - The register bus used to communicate with the device.
    pub fn new(bus: B) -> Self {
        Max31790 {
            bus,
            settings: [ChannelSettings::default(); CHANNELS],
            tune_config: TuneConfig::default(),
        }
    }

    /// Release the register bus.
    pub fn release(self) -> B {
        self.bus
    }

    fn index(channel: Channel) -> Result<usize, Error<B::Error>> {
        channel.index()
    }

    /// Convert a dispatched value that must be a whole number in `0..=max`.
    fn whole(value: f32, max: u16) -> Result<u16, Error<B::Error>> {
        if value >= 0.0 && value <= max as f32 && (value as u16) as f32 == value {
            Ok(value as u16)
        } else {
            Err(Error::InvalidArgument)
        }
    }

    fn read_field(&mut self, register: u8, field: Field) -> Result<u16, Error<B::Error>> {
        let mut data: [u8; 2] = [0; 2];
        self.bus.read_bytes(register, &mut data)?;
        Ok(field.decode(data))
    }

    fn write_field(
        &mut self,
        register: u8,
        field: Field,
        value: u16,
    ) -> Result<(), Error<B::Error>> {
        self.bus.write_bytes(register, &field.encode(value))?;
        Ok(())
    }

    /// Read-modify-write a single register.
    fn modify(
        &mut self,
        register: u8,
        update: impl FnOnce(&mut u8),
    ) -> Result<(), Error<B::Error>> {
        let mut data: [u8; 1] = [0; 1];
        self.bus.read_bytes(register, &mut data)?;
        update(&mut data[0]);
        self.bus.write_bytes(register, &data)?;
        Ok(())
    }

    /// Reset the device and apply the default configuration.
    ///
    /// # Note
    /// All channels are left in PWM mode at 100% duty cycle with a speed range of 4 and fault
    /// reporting masked. Driver calibration is not modified.
    pub fn initialize(&mut self) -> Result<(), Error<B::Error>> {
        // Initiate a power-on-reset of the device, keeping it out of standby.
        self.bus.write_bytes(Register::GlobalConfig as u8, &[1 << 6])?;

        // Disable the I2C bus timeout and set the oscillator selection bit.
        self.bus
            .write_bytes(Register::GlobalConfig as u8, &[1 << 5 | 1 << 3])?;

        self.set_pwm_frequency(PwmFrequency::Hz25)?;
        self.bus
            .write_bytes(Register::FailedFanOptions as u8, &[0b0010_0111])?;

        for channel in Channel::all() {
            let index = Self::index(channel)?;

            // PWM mode with spin-up and the tachometer input enabled.
            self.bus
                .write_bytes(Register::FanConfig.offset(index), &[0b0110_1000])?;

            self.modify(Register::FanDynamics.offset(index), |dynamics| {
                dynamics.set_bits(1..5, 0);
                dynamics.set_bits(SpeedRange::BITS, SpeedRange::Four.code());
            })?;

            self.set_duty_percent(channel, 100)?;
        }

        // Mask fault reporting on all channels and clear any latched faults.
        self.modify(Register::FanFaultMask as u8, |mask| {
            mask.set_bits(0..6, 0b11_1111);
        })?;
        self.modify(Register::FanFaultStatus as u8, |status| {
            status.set_bits(0..6, 0);
        })?;

        log::info!("MAX31790 initialized");
        Ok(())
    }

    /// Configure the PWM output frequency of all channels.
    pub fn set_pwm_frequency(&mut self, frequency: PwmFrequency) -> Result<(), Error<B::Error>> {
        self.bus
            .write_bytes(Register::PwmFrequency as u8, &[frequency.register_value()])?;
        Ok(())
    }

    /// Select open-loop (duty cycle) or closed-loop (tachometer target) control of a channel.
    pub fn set_drive_mode(
        &mut self,
        channel: Channel,
        mode: DriveMode,
    ) -> Result<(), Error<B::Error>> {
        let index = Self::index(channel)?;
        self.bus
            .write_bit(Register::FanConfig.offset(index), DriveMode::BIT, mode.bit())?;
        Ok(())
    }

    /// Get the drive mode of a channel.
    pub fn drive_mode(&mut self, channel: Channel) -> Result<DriveMode, Error<B::Error>> {
        let index = Self::index(channel)?;
        let bit = self
            .bus
            .read_bit(Register::FanConfig.offset(index), DriveMode::BIT)?;
        Ok(DriveMode::from_bit(bit))
    }

    fn write_speed_range(
        &mut self,
        index: usize,
        speed_range: SpeedRange,
    ) -> Result<(), Error<B::Error>> {
        self.modify(Register::FanDynamics.offset(index), |dynamics| {
            dynamics.set_bits(SpeedRange::BITS, speed_range.code());
        })
    }

    /// Configure the speed range of a channel.
    ///
    /// # Args
    /// * `channel` - The channel to configure.
    /// * `speed_range` - The speed range multiplier. One of 1, 2, 4, 8, 16 or 32.
    pub fn set_speed_range(
        &mut self,
        channel: Channel,
        speed_range: u32,
    ) -> Result<(), Error<B::Error>> {
        let index = Self::index(channel)?;
        let Some(speed_range) = SpeedRange::from_value(speed_range) else {
            return Err(Error::InvalidArgument);
        };
        self.write_speed_range(index, speed_range)
    }

    /// Get the speed range of a channel.
    pub fn speed_range(&mut self, channel: Channel) -> Result<SpeedRange, Error<B::Error>> {
        let index = Self::index(channel)?;
        let mut data: [u8; 1] = [0; 1];
        self.bus
            .read_bytes(Register::FanDynamics.offset(index), &mut data)?;

        SpeedRange::from_code(data[0].get_bits(SpeedRange::BITS)).ok_or(Error::UnrecognizedEncoding)
    }

    /// Configure the raw duty cycle of a channel.
    ///
    /// # Args
    /// * `channel` - The channel to configure.
    /// * `duty_cycle` - The duty cycle, 0 to 511.
    pub fn set_duty_cycle(
        &mut self,
        channel: Channel,
        duty_cycle: u16,
    ) -> Result<(), Error<B::Error>> {
        let index = Self::index(channel)?;
        if duty_cycle > Field::DutyCycle.max() {
            return Err(Error::InvalidArgument);
        }

        self.write_field(Register::PwmOut.offset(index), Field::DutyCycle, duty_cycle)
    }

    /// Get the raw target duty cycle of a channel.
    pub fn duty_cycle(&mut self, channel: Channel) -> Result<u16, Error<B::Error>> {
        let index = Self::index(channel)?;
        self.read_field(Register::PwmOut.offset(index), Field::DutyCycle)
    }

    /// Get the raw duty cycle currently output on a channel.
    ///
    /// # Note
    /// This lags the target duty cycle while the device ramps the output.
    pub fn pwm_duty_readback(&mut self, channel: Channel) -> Result<u16, Error<B::Error>> {
        let index = Self::index(channel)?;
        self.read_field(Register::PwmDutyCycle.offset(index), Field::DutyCycle)
    }

    /// Configure the duty cycle of a channel in percent.
    pub fn set_duty_percent(
        &mut self,
        channel: Channel,
        percent: u8,
    ) -> Result<(), Error<B::Error>> {
        Self::index(channel)?;
        if percent > 100 {
            return Err(Error::InvalidArgument);
        }

        let duty_cycle = percent as u32 * Field::DutyCycle.max() as u32 / 100;
        self.set_duty_cycle(channel, duty_cycle as u16)
    }

    /// Get the target duty cycle of a channel in percent, rounded down.
    pub fn duty_percent(&mut self, channel: Channel) -> Result<u8, Error<B::Error>> {
        let duty_cycle = self.duty_cycle(channel)?;
        Ok((duty_cycle as u32 * 100 / Field::DutyCycle.max() as u32) as u8)
    }

    /// Configure the closed-loop speed target of a channel.
    ///
    /// # Note
    /// The target is computed for the current speed range and pulses per revolution. Change
    /// those first.
    ///
    /// # Args
    /// * `channel` - The channel to configure.
    /// * `rpm` - The target speed. Zero disables the target.
    pub fn set_speed_target(&mut self, channel: Channel, rpm: u32) -> Result<(), Error<B::Error>> {
        let index = Self::index(channel)?;
        let register = Register::TachTarget.offset(index);

        if rpm == 0 {
            self.bus.write_bytes(register, &[0xFF, 0xFF])?;
            return Ok(());
        }

        let speed_range = self.speed_range(channel)?;
        let ppr = *self.settings[index].pulses_per_revolution as u64;
        let target = divide_rounded(
            60 * (speed_range.value() * TACH_CLOCK_HZ) as u64,
            ppr * rpm as u64,
        );

        // The all-ones count is reserved for a disabled target.
        if target == 0 || target >= Field::Tach.max() as u64 {
            return Err(Error::InvalidArgument);
        }

        self.write_field(register, Field::Tach, target as u16)
    }

    /// Get the closed-loop speed target of a channel.
    ///
    /// # Note
    /// The target is stored as a whole tachometer count, so the readback is quantized to the RPM
    /// of the nearest count.
    ///
    /// # Returns
    /// The target in RPM, or None if the target is disabled.
    pub fn speed_target(&mut self, channel: Channel) -> Result<Option<u32>, Error<B::Error>> {
        let index = Self::index(channel)?;
        let target = self.read_field(Register::TachTarget.offset(index), Field::Tach)?;

        if target == Field::Tach.max() {
            return Ok(None);
        }

        if target == 0 {
            return Err(Error::UnrecognizedEncoding);
        }

        let speed_range = self.speed_range(channel)?;
        let ppr = *self.settings[index].pulses_per_revolution as u64;
        let rpm = divide_rounded(
            60 * (speed_range.value() * TACH_CLOCK_HZ) as u64,
            ppr * target as u64,
        );
        Ok(Some(rpm as u32))
    }

    /// Read the raw 11-bit tachometer count of a channel.
    pub fn tach_count(&mut self, channel: Channel) -> Result<u16, Error<B::Error>> {
        let index = Self::index(channel)?;
        self.read_field(Register::TachCount.offset(index), Field::Tach)
    }

    /// Get the calibration of a channel.
    pub fn settings(&self, channel: Channel) -> Result<ChannelSettings, Error<B::Error>> {
        Ok(self.settings[Self::index(channel)?])
    }

    /// Replace the calibration of a channel.
    ///
    /// # Note
    /// Invalid settings are rejected and the previous settings are kept.
    pub fn set_settings(
        &mut self,
        channel: Channel,
        settings: ChannelSettings,
    ) -> Result<(), Error<B::Error>> {
        let index = Self::index(channel)?;
        if !settings.is_valid() {
            return Err(Error::InvalidArgument);
        }

        self.settings[index] = settings;
        Ok(())
    }

    fn update_settings(
        &mut self,
        channel: Channel,
        update: impl FnOnce(&mut ChannelSettings),
    ) -> Result<(), Error<B::Error>> {
        let mut settings = self.settings(channel)?;
        update(&mut settings);
        self.set_settings(channel, settings)
    }

    /// Configure the tachometer pulses per fan revolution. Must not be zero.
    pub fn set_pulses_per_revolution(
        &mut self,
        channel: Channel,
        ppr: u8,
    ) -> Result<(), Error<B::Error>> {
        self.update_settings(channel, |settings| *settings.pulses_per_revolution = ppr)
    }

    /// Configure the tachometer pulses per cubic meter of flow. Must be positive.
    pub fn set_pulses_per_cubic_meter(
        &mut self,
        channel: Channel,
        ppm3: f32,
    ) -> Result<(), Error<B::Error>> {
        self.update_settings(channel, |settings| *settings.pulses_per_cubic_meter = ppm3)
    }

    /// Configure the tachometer pulses per liter of flow. Must be positive.
    pub fn set_pulses_per_liter(
        &mut self,
        channel: Channel,
        ppl: f32,
    ) -> Result<(), Error<B::Error>> {
        self.set_pulses_per_cubic_meter(channel, ppl * LITERS_PER_CUBIC_METER)
    }

    /// Configure the tachometer pulses per US gallon of flow. Must be positive.
    pub fn set_pulses_per_gallon(
        &mut self,
        channel: Channel,
        ppg: f32,
    ) -> Result<(), Error<B::Error>> {
        self.set_pulses_per_cubic_meter(channel, ppg / CUBIC_METERS_PER_GALLON)
    }

    /// Enable or disable speed range tuning before tachometer readings of a channel.
    pub fn set_autotune(&mut self, channel: Channel, enabled: bool) -> Result<(), Error<B::Error>> {
        self.update_settings(channel, |settings| *settings.autotune = enabled)
    }

    /// Check if speed range tuning is enabled on a channel.
    pub fn autotune(&self, channel: Channel) -> Result<bool, Error<B::Error>> {
        Ok(*self.settings(channel)?.autotune)
    }

    /// Get the speed range tuner parameters.
    pub fn tune_config(&self) -> TuneConfig {
        self.tune_config
    }

    /// Replace the speed range tuner parameters. At least one sample is required.
    pub fn set_tune_config(&mut self, config: TuneConfig) -> Result<(), Error<B::Error>> {
        if config.samples == 0 {
            return Err(Error::InvalidArgument);
        }

        self.tune_config = config;
        Ok(())
    }

    /// Tune the speed range of a channel so that its tachometer count is well resolved.
    ///
    /// # Note
    /// See [`autotune::tune`].
    pub fn tune_speed_range(&mut self, channel: Channel) -> Result<(), Error<B::Error>> {
        Self::index(channel)?;
        let config = self.tune_config;
        autotune::tune(self, channel, &config)
    }

    /// Read the speed range and tachometer count of a channel, tuning first if enabled.
    fn sample(&mut self, channel: Channel) -> Result<(SpeedRange, u16), Error<B::Error>> {
        if self.autotune(channel)? {
            match self.tune_speed_range(channel) {
                // A stalled fan saturates the count at every speed range.
                Err(Error::TuningUnreachable) => {
                    if self.tach_count(channel)? != Field::Tach.max() {
                        return Err(Error::TuningUnreachable);
                    }
                }
                result => result?,
            }
        }

        let speed_range = self.speed_range(channel)?;
        let tach_count = self.tach_count(channel)?;
        Ok((speed_range, tach_count))
    }

    /// Measure the tachometer pulse rate of a channel.
    ///
    /// # Returns
    /// The pulses per second. `NoSignal` if the fan is stalled or the count saturated.
    pub fn pulses_per_second(&mut self, channel: Channel) -> Result<f32, Error<B::Error>> {
        let (speed_range, tach_count) = self.sample(channel)?;
        units::pulses_per_second(speed_range, tach_count).ok_or(Error::NoSignal)
    }

    /// Measure a rate on a channel.
    ///
    /// # Args
    /// * `channel` - The channel to measure.
    /// * `unit` - What the rate counts.
    /// * `per` - The time base of the rate.
    pub fn rate(&mut self, channel: Channel, unit: Unit, per: Per) -> Result<f32, Error<B::Error>> {
        let pulses_per_second = self.pulses_per_second(channel)?;
        let settings = self.settings(channel)?;
        Ok(units::convert(pulses_per_second, unit, per, &settings))
    }

    /// Measure the speed of the fan on a channel in revolutions per minute.
    pub fn rpm(&mut self, channel: Channel) -> Result<f32, Error<B::Error>> {
        self.rate(channel, Unit::Revolutions, Per::Minute)
    }

    /// Get any quantity of a channel.
    pub fn get(&mut self, channel: Channel, quantity: Quantity) -> Result<f32, Error<B::Error>> {
        let settings = self.settings(channel)?;

        let value = match quantity {
            Quantity::Pwm => self.duty_cycle(channel)? as f32,
            Quantity::Spd => self.duty_percent(channel)? as f32,
            Quantity::Sr => self.speed_range(channel)?.value() as f32,
            Quantity::Ppr => *settings.pulses_per_revolution as f32,
            Quantity::Ppm3 => *settings.pulses_per_cubic_meter,
            Quantity::Ppl => settings.pulses_per_liter(),
            Quantity::Ppg => settings.pulses_per_gallon(),
            Quantity::Tac => self.sample(channel)?.1 as f32,
            rate => {
                let Some((unit, per)) = rate.rate() else {
                    return Err(Error::InvalidArgument);
                };
                self.rate(channel, unit, per)?
            }
        };

        Ok(value)
    }

    /// Set a writable quantity of a channel.
    ///
    /// # Note
    /// PWM, SPD, SR and PPR only accept whole numbers. Rates and the tachometer count are read
    /// only and are rejected.
    pub fn set(
        &mut self,
        channel: Channel,
        quantity: Quantity,
        value: f32,
    ) -> Result<(), Error<B::Error>> {
        Self::index(channel)?;

        match quantity {
            Quantity::Pwm => {
                let duty_cycle = Self::whole(value, Field::DutyCycle.max())?;
                self.set_duty_cycle(channel, duty_cycle)
            }
            Quantity::Spd => self.set_duty_percent(channel, Self::whole(value, 100)? as u8),
            Quantity::Sr => {
                let speed_range = Self::whole(value, SpeedRange::MAX.value() as u16)?;
                self.set_speed_range(channel, speed_range as u32)
            }
            Quantity::Ppr => {
                let ppr = Self::whole(value, u8::MAX as u16)?;
                self.set_pulses_per_revolution(channel, ppr as u8)
            }
            Quantity::Ppm3 => self.set_pulses_per_cubic_meter(channel, value),
            Quantity::Ppl => self.set_pulses_per_liter(channel, value),
            Quantity::Ppg => self.set_pulses_per_gallon(channel, value),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Get a quantity of a channel by its tag, such as `"RPM"`.
    pub fn get_by_tag(&mut self, channel: Channel, tag: &str) -> Result<f32, Error<B::Error>> {
        Self::index(channel)?;
        let Ok(quantity) = tag.parse::<Quantity>() else {
            return Err(Error::InvalidArgument);
        };
        self.get(channel, quantity)
    }

    /// Set a quantity of a channel by its tag, such as `"SPD"`.
    pub fn set_by_tag(
        &mut self,
        channel: Channel,
        tag: &str,
        value: f32,
    ) -> Result<(), Error<B::Error>> {
        Self::index(channel)?;
        let Ok(quantity) = tag.parse::<Quantity>() else {
            return Err(Error::InvalidArgument);
        };
        self.set(channel, quantity, value)
    }

    /// Report the state of a channel.
    pub fn report(&mut self, channel: Channel) -> Result<ChannelReport, Error<B::Error>> {
        let settings = self.settings(channel)?;
        let mode = self.drive_mode(channel)?;
        let duty_cycle = self.duty_cycle(channel)?;
        let (speed_range, tach_count) = self.sample(channel)?;

        let rpm = units::pulses_per_second(speed_range, tach_count)
            .map(|pps| units::convert(pps, Unit::Revolutions, Per::Minute, &settings));

        Ok(ChannelReport {
            mode,
            speed_range: speed_range.value(),
            duty_cycle,
            tach_count,
            rpm,
        })
    }
}

impl<B> SpeedRangeControl for Max31790<B>
where
    B: RegisterBus,
{
    type Error = B::Error;

    fn speed_range(&mut self, channel: Channel) -> Result<SpeedRange, Error<B::Error>> {
        Max31790::speed_range(self, channel)
    }

    fn set_speed_range(
        &mut self,
        channel: Channel,
        speed_range: SpeedRange,
    ) -> Result<(), Error<B::Error>> {
        let index = Self::index(channel)?;
        self.write_speed_range(index, speed_range)
    }

    fn tach_count(&mut self, channel: Channel) -> Result<u16, Error<B::Error>> {
        Max31790::tach_count(self, channel)
    }
}
