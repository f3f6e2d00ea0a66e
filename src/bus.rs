//! Register bus access for the MAX31790
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! The driver only needs bit and byte access to registers addressed by an 8-bit offset. Any
//! transport providing that can be used. [`I2cBus`] adapts an `embedded-hal` I2C bus.
use bit_field::BitField;
use embedded_hal::i2c::I2c;

/// The widest register of the device in bytes.
pub const MAX_WRITE_LEN: usize = 2;

/// Access to the registers of a single device.
pub trait RegisterBus {
    type Error;

    /// Read a single bit of a register.
    ///
    /// # Args
    /// * `register` - The register offset.
    /// * `bit` - The bit index, 0 being the least significant bit.
    fn read_bit(&mut self, register: u8, bit: usize) -> Result<bool, Self::Error>;

    /// Write a single bit of a register, leaving all other bits untouched.
    ///
    /// # Args
    /// * `register` - The register offset.
    /// * `bit` - The bit index, 0 being the least significant bit.
    /// * `value` - The state of the bit.
    fn write_bit(&mut self, register: u8, bit: usize, value: bool) -> Result<(), Self::Error>;

    /// Read consecutive registers starting at `register` into `data`.
    fn read_bytes(&mut self, register: u8, data: &mut [u8]) -> Result<(), Self::Error>;

    /// Write `data` into consecutive registers starting at `register`.
    ///
    /// # Note
    /// At most [`MAX_WRITE_LEN`] bytes are written at once.
    fn write_bytes(&mut self, register: u8, data: &[u8]) -> Result<(), Self::Error>;
}

/// A [`RegisterBus`] for a device on an I2C bus.
pub struct I2cBus<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C> I2cBus<I2C>
where
    I2C: I2c,
{
    /// Construct a register bus for a device.
    ///
    /// # Args
    /// * `i2c` - The I2C interface used to communicate with the device.
    /// * `address` - The 7-bit I2C address of the device.
    pub fn new(i2c: I2C, address: u8) -> Self {
        I2cBus { i2c, address }
    }

    /// Construct a register bus from the 8-bit address listed in the datasheet address table.
    ///
    /// # Args
    /// * `i2c` - The I2C interface used to communicate with the device.
    /// * `address` - The 8-bit (write) address of the device.
    pub fn from_datasheet_address(i2c: I2C, address: u8) -> Self {
        I2cBus::new(i2c, address >> 1)
    }

    /// The 7-bit I2C address of the device.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Release the I2C bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    fn read_byte(&mut self, register: u8) -> Result<u8, I2C::Error> {
        let mut result: [u8; 1] = [0; 1];
        self.i2c
            .write_read(self.address, &[register], &mut result)?;

        Ok(result[0])
    }
}

impl<I2C> RegisterBus for I2cBus<I2C>
where
    I2C: I2c,
{
    type Error = I2C::Error;

    fn read_bit(&mut self, register: u8, bit: usize) -> Result<bool, Self::Error> {
        Ok(self.read_byte(register)?.get_bit(bit))
    }

    fn write_bit(&mut self, register: u8, bit: usize, value: bool) -> Result<(), Self::Error> {
        let mut data = self.read_byte(register)?;
        data.set_bit(bit, value);
        self.write_bytes(register, &[data])
    }

    fn read_bytes(&mut self, register: u8, data: &mut [u8]) -> Result<(), Self::Error> {
        self.i2c.write_read(self.address, &[register], data)
    }

    fn write_bytes(&mut self, register: u8, data: &[u8]) -> Result<(), Self::Error> {
        assert!(data.len() <= MAX_WRITE_LEN);

        let mut buffer: [u8; MAX_WRITE_LEN + 1] = [0; MAX_WRITE_LEN + 1];
        buffer[0] = register;
        buffer[1..=data.len()].copy_from_slice(data);
        self.i2c.write(self.address, &buffer[..=data.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    use std::vec;

    const ADDRESS: u8 = 0x20;

    #[test]
    fn datasheet_address_is_shifted() {
        let expectations: [I2cTransaction; 0] = [];
        let i2c = I2cMock::new(&expectations);
        let bus = I2cBus::from_datasheet_address(i2c, 0x40);
        assert_eq!(bus.address(), ADDRESS);

        let mut i2c = bus.release();
        i2c.done();
    }

    #[test]
    fn write_bit_preserves_other_bits() {
        let expectations = [
            I2cTransaction::write_read(ADDRESS, vec![0x02], vec![0b0110_1000]),
            I2cTransaction::write(ADDRESS, vec![0x02, 0b1110_1000]),
        ];

        let i2c = I2cMock::new(&expectations);
        let mut bus = I2cBus::new(i2c, ADDRESS);
        bus.write_bit(0x02, 7, true).unwrap();

        let mut i2c = bus.release();
        i2c.done();
    }

    #[test]
    fn read_bit() {
        let expectations = [
            I2cTransaction::write_read(ADDRESS, vec![0x08], vec![0b1010_0000]),
            I2cTransaction::write_read(ADDRESS, vec![0x08], vec![0b1010_0000]),
        ];

        let i2c = I2cMock::new(&expectations);
        let mut bus = I2cBus::new(i2c, ADDRESS);
        assert!(bus.read_bit(0x08, 7).unwrap());
        assert!(!bus.read_bit(0x08, 6).unwrap());

        let mut i2c = bus.release();
        i2c.done();
    }

    #[test]
    fn multi_byte_access() {
        let expectations = [
            I2cTransaction::write(ADDRESS, vec![0x40, 0xFF, 0x80]),
            I2cTransaction::write_read(ADDRESS, vec![0x18], vec![0x12, 0x34]),
        ];

        let i2c = I2cMock::new(&expectations);
        let mut bus = I2cBus::new(i2c, ADDRESS);
        bus.write_bytes(0x40, &[0xFF, 0x80]).unwrap();

        let mut data = [0u8; 2];
        bus.read_bytes(0x18, &mut data).unwrap();
        assert_eq!(data, [0x12, 0x34]);

        let mut i2c = bus.release();
        i2c.done();
    }

    #[test]
    fn single_byte_write() {
        let expectations = [I2cTransaction::write(ADDRESS, vec![0x14, 0b0010_0111])];

        let i2c = I2cMock::new(&expectations);
        let mut bus = I2cBus::new(i2c, ADDRESS);
        bus.write_bytes(0x14, &[0b0010_0111]).unwrap();

        let mut i2c = bus.release();
        i2c.done();
    }
}
