//! Test support: an in-memory register file
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use bit_field::BitField;

use crate::bus::RegisterBus;

/// The error reported by a [`FakeBus`] with injected failures.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BusFault;

/// A register bus backed by memory, counting every transaction.
pub struct FakeBus {
    pub registers: [u8; 0x60],
    pub transactions: usize,
    pub fail: bool,
}

impl FakeBus {
    pub fn new() -> Self {
        Self {
            registers: [0; 0x60],
            transactions: 0,
            fail: false,
        }
    }

    /// Store the two byte image of an 11-bit tachometer count.
    pub fn set_tach_count(&mut self, channel: u8, count: u16) {
        let offset = 0x18 + 2 * (channel as usize - 1);
        self.registers[offset..offset + 2].copy_from_slice(&(count << 5).to_be_bytes());
    }

    pub fn word(&self, register: usize) -> u16 {
        u16::from_be_bytes([self.registers[register], self.registers[register + 1]])
    }

    fn access(&mut self) -> Result<(), BusFault> {
        self.transactions += 1;
        if self.fail {
            Err(BusFault)
        } else {
            Ok(())
        }
    }
}

impl RegisterBus for FakeBus {
    type Error = BusFault;

    fn read_bit(&mut self, register: u8, bit: usize) -> Result<bool, BusFault> {
        self.access()?;
        Ok(self.registers[register as usize].get_bit(bit))
    }

    fn write_bit(&mut self, register: u8, bit: usize, value: bool) -> Result<(), BusFault> {
        self.access()?;
        self.registers[register as usize].set_bit(bit, value);
        Ok(())
    }

    fn read_bytes(&mut self, register: u8, data: &mut [u8]) -> Result<(), BusFault> {
        self.access()?;
        let start = register as usize;
        data.copy_from_slice(&self.registers[start..start + data.len()]);
        Ok(())
    }

    fn write_bytes(&mut self, register: u8, data: &[u8]) -> Result<(), BusFault> {
        assert!(data.len() <= crate::bus::MAX_WRITE_LEN);
        self.access()?;
        let start = register as usize;
        self.registers[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}
