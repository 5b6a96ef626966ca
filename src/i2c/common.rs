// Licensed under the Apache-2.0 license

//! Common types and constants for the I2C master engine.
//!
//! This module provides the shared definitions for timing configuration,
//! the command/status interface between drivers and the engine, and the
//! error type exposed through `embedded_hal::i2c`.

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use fugit::HertzU32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
}

impl I2cSpeed {
    #[must_use]
    pub const fn hz(self) -> u32 {
        self as u32
    }
}

/// Transfer direction of one bus segment, encoded as the R/W bit that
/// follows the 7-bit address on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

impl Direction {
    /// R/W bit value: 1 = read, 0 = write.
    #[must_use]
    pub const fn rw_bit(self) -> u8 {
        match self {
            Direction::Write => 0,
            Direction::Read => 1,
        }
    }
}

/// Acknowledgment bit as sampled (or sent) during the ninth clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ack {
    Ack,
    Nack,
}

/// One request issued by a driver to the engine.
///
/// `generate_start = true` produces a START, or a repeated-START when the
/// engine is holding the bus after a previous segment. Created per
/// transaction step, consumed once by `submit`, discarded after the engine
/// reports completion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransactionCommand {
    /// 7-bit device address.
    pub address: u8,
    pub direction: Direction,
    pub generate_start: bool,
    /// Emit STOP once the segment's data bytes are done. A NACK overrides
    /// this: the engine then holds the bus and the driver decides.
    pub generate_stop_after: bool,
}

/// Engine status snapshot.
///
/// `transaction_done` and `read_byte_valid` are single-tick pulses; a
/// driver running after the engine in the same scheduler step sees each
/// pulse exactly once.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub busy: bool,
    /// Pulsed for one tick when the previously submitted command finishes.
    pub transaction_done: bool,
    /// Acknowledgment sampled for the most recent address or data byte.
    pub acknowledgment: Option<Ack>,
    /// Last byte received from the target, while `read_byte_valid` pulses.
    pub read_byte: Option<u8>,
    pub read_byte_valid: bool,
    /// Whether `feed_write_byte` currently accepts another byte.
    pub write_accepts_next: bool,
    /// Set when the clock-stretch watchdog expired. Latched until `reset`.
    pub bus_stuck: bool,
}

/// Errors surfaced through the blocking `embedded_hal::i2c` facade.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Target did not acknowledge its address.
    AddressNack,
    /// Target rejected a data byte.
    DataNack,
    /// A party held the clock low past the configured watchdog bound.
    BusStuck,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::AddressNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Error::DataNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Error::BusStuck => ErrorKind::Bus,
        }
    }
}

/// Construction-time engine parameters. All timing derives from the tick
/// rate; nothing here is runtime-mutable.
#[derive(Copy, Clone, Debug)]
pub struct EngineConfig {
    pub tick_rate: HertzU32,
    pub speed: I2cSpeed,
    /// Optional bound, in ticks, on how long the engine waits for SCL to
    /// float high after releasing it. `None` reproduces the reference
    /// behavior: wait forever.
    pub stretch_timeout: Option<u32>,
}

impl EngineConfig {
    /// Duration of one of the four bit phases, in ticks. Never zero, even
    /// when the tick rate is too slow for the requested bus speed.
    #[must_use]
    pub fn phase_ticks(&self) -> u32 {
        let ticks = self.tick_rate.to_Hz() / (self.speed.hz() * 4);
        ticks.max(1)
    }
}

pub struct EngineConfigBuilder {
    tick_rate: HertzU32,
    speed: I2cSpeed,
    stretch_timeout: Option<u32>,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tick_rate: HertzU32::MHz(1),
            speed: I2cSpeed::Standard,
            stretch_timeout: None,
        }
    }

    #[must_use]
    pub fn tick_rate(mut self, rate: HertzU32) -> Self {
        self.tick_rate = rate;
        self
    }

    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub fn stretch_timeout(mut self, ticks: u32) -> Self {
        self.stretch_timeout = Some(ticks);
        self
    }

    #[must_use]
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            tick_rate: self.tick_rate,
            speed: self.speed,
            stretch_timeout: self.stretch_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_ticks_from_tick_and_bus_rates() {
        let config = EngineConfigBuilder::new()
            .tick_rate(HertzU32::MHz(4))
            .speed(I2cSpeed::Standard)
            .build();
        // 4 MHz / (100 kHz * 4 phases) = 10 ticks per phase
        assert_eq!(config.phase_ticks(), 10);
    }

    #[test]
    fn phase_ticks_never_zero() {
        let config = EngineConfigBuilder::new()
            .tick_rate(HertzU32::kHz(100))
            .speed(I2cSpeed::Fast)
            .build();
        assert_eq!(config.phase_ticks(), 1);
    }

    #[test]
    fn builder_defaults_leave_watchdog_off() {
        let config = EngineConfigBuilder::new().build();
        assert!(config.stretch_timeout.is_none());
        assert_eq!(config.speed, I2cSpeed::Standard);
    }

    #[test]
    fn rw_bit_encoding() {
        assert_eq!(Direction::Write.rw_bit(), 0);
        assert_eq!(Direction::Read.rw_bit(), 1);
    }
}
