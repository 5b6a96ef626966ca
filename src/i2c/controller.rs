// Licensed under the Apache-2.0 license

//! Blocking `embedded_hal::i2c::I2c` facade over the tick-driven engine.
//!
//! The engine itself never blocks; this adapter owns the engine, the bus
//! and whatever else is wired to it, and pumps ticks until each segment
//! completes. It exists so conventional register drivers written against
//! embedded-hal can run on the same bit-level engine the tick-driven ADC
//! driver uses.

use embedded_hal::i2c::{Operation, SevenBitAddress};

use crate::bus::{Bus, BusMember};
use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{Ack, Direction, Error, TransactionCommand};
use crate::i2c::engine::MasterEngine;

/// Default bound on ticks pumped per bus segment. Generous for any sane
/// tick/bit-rate ratio; exhaustion is reported as a stuck bus.
pub const DEFAULT_TICK_BUDGET: u32 = 1_000_000;

pub struct BlockingI2c<M: BusMember, L: Logger = NoOpLogger> {
    pub engine: MasterEngine<L>,
    pub bus: Bus,
    /// The rest of the world on the wire (target model, monitor, ...).
    pub member: M,
    tick_budget: u32,
}

impl<M: BusMember, L: Logger> BlockingI2c<M, L> {
    pub fn new(engine: MasterEngine<L>, bus: Bus, member: M) -> Self {
        BlockingI2c {
            engine,
            bus,
            member,
            tick_budget: DEFAULT_TICK_BUDGET,
        }
    }

    #[must_use]
    pub fn tick_budget(mut self, ticks: u32) -> Self {
        self.tick_budget = ticks;
        self
    }

    fn tick_once(&mut self) {
        self.engine.tick(&mut self.bus);
        self.member.tick(&mut self.bus);
    }

    /// One tick of progress toward segment completion.
    fn poll_segment(&mut self) -> nb::Result<(), Error> {
        self.tick_once();
        let status = self.engine.status();
        if status.bus_stuck {
            return Err(nb::Error::Other(Error::BusStuck));
        }
        if status.transaction_done {
            return Ok(());
        }
        Err(nb::Error::WouldBlock)
    }

    /// Pump until the engine reports completion, then translate a NACK
    /// into the matching error.
    fn run_segment(&mut self) -> Result<(), Error> {
        for _ in 0..self.tick_budget {
            match self.poll_segment() {
                Ok(()) => return self.check_ack(),
                Err(nb::Error::WouldBlock) => {}
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        Err(Error::BusStuck)
    }

    fn check_ack(&mut self) -> Result<(), Error> {
        if self.engine.status().acknowledgment == Some(Ack::Nack) {
            let error = if self.engine.address_was_acked() {
                Error::DataNack
            } else {
                Error::AddressNack
            };
            // Close the held bus before reporting.
            if self.engine.request_stop() {
                for _ in 0..self.tick_budget {
                    self.tick_once();
                    if self.engine.status().transaction_done {
                        break;
                    }
                }
            }
            return Err(error);
        }
        Ok(())
    }

    fn write_segment(&mut self, address: u8, bytes: &[u8], stop: bool) -> Result<(), Error> {
        self.engine.submit(TransactionCommand {
            address,
            direction: Direction::Write,
            generate_start: true,
            generate_stop_after: stop,
        });
        for &byte in bytes {
            // Queue depth covers any register-style write; larger payloads
            // would need feeding mid-flight, which the budget loop below
            // does not attempt.
            if !self.engine.feed_write_byte(byte) {
                return Err(Error::DataNack);
            }
        }
        self.run_segment()
    }

    fn read_segment(&mut self, address: u8, buffer: &mut [u8], stop: bool) -> Result<(), Error> {
        if buffer.is_empty() {
            return Ok(());
        }
        let mut slots = buffer.iter_mut();
        self.engine.set_read_acceptance(slots.len() > 1);
        self.engine.submit(TransactionCommand {
            address,
            direction: Direction::Read,
            generate_start: true,
            generate_stop_after: stop,
        });
        for _ in 0..self.tick_budget {
            self.tick_once();
            let status = self.engine.status();
            if status.bus_stuck {
                return Err(Error::BusStuck);
            }
            if status.read_byte_valid {
                if let (Some(slot), Some(byte)) = (slots.next(), status.read_byte) {
                    *slot = byte;
                }
                // NACK the next byte iff it is the last one.
                self.engine.set_read_acceptance(slots.len() > 1);
            }
            if status.transaction_done {
                return self.check_ack();
            }
        }
        Err(Error::BusStuck)
    }
}

impl<M: BusMember, L: Logger> embedded_hal::i2c::ErrorType for BlockingI2c<M, L> {
    type Error = Error;
}

impl<M: BusMember, L: Logger> embedded_hal::i2c::I2c for BlockingI2c<M, L> {
    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.read_segment(addr, buffer, true)
    }

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        self.write_segment(addr, bytes, true)
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.write_segment(addr, bytes, false)?;
        // Repeated START between the pointer write and the read.
        self.read_segment(addr, buffer, true)
    }

    /// Each operation is addressed individually with a repeated-START
    /// between segments and a single STOP at the end. Adjacent
    /// same-direction operations are not merged into one segment.
    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let count = operations.len();
        for (index, op) in operations.iter_mut().enumerate() {
            let last = index + 1 == count;
            match op {
                Operation::Write(bytes) => self.write_segment(addr, bytes, last)?,
                Operation::Read(buffer) => self.read_segment(addr, buffer, last)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::common::EngineConfigBuilder;
    use embedded_hal::i2c::I2c;
    use fugit::HertzU32;

    fn facade() -> BlockingI2c<()> {
        let config = EngineConfigBuilder::new()
            .tick_rate(HertzU32::kHz(400))
            .build();
        BlockingI2c::new(MasterEngine::new(config), Bus::new(), ())
    }

    #[test]
    fn write_to_empty_bus_reports_address_nack() {
        let mut i2c = facade();
        let err = i2c.write(0x48, &[0x01, 0xC2, 0xE0]).unwrap_err();
        assert_eq!(err, Error::AddressNack);
        // The facade issued STOP: bus idle again.
        assert!(i2c.bus.scl.is_high());
        assert!(i2c.bus.sda.is_high());
    }

    #[test]
    fn read_to_empty_bus_reports_address_nack() {
        let mut i2c = facade();
        let mut buffer = [0u8; 2];
        let err = i2c.read(0x48, &mut buffer).unwrap_err();
        assert_eq!(err, Error::AddressNack);
    }

    #[test]
    fn zero_length_read_is_a_no_op() {
        let mut i2c = facade();
        let mut buffer = [0u8; 0];
        assert!(i2c.read(0x48, &mut buffer).is_ok());
    }
}
