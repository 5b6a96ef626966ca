// Licensed under the Apache-2.0 license

//! Simulated target device, passive bus monitor, and the scheduler rig.
//!
//! `SimTarget` is a bit-level model of the ADC seen from the wire: it
//! decodes START/STOP and clocked bits straight off the open-drain lines,
//! acknowledges its address, implements the register pointer protocol,
//! runs a continuous-conversion engine, and strobes its open-drain alert
//! line through the comparator. It stands in for real silicon in the
//! crate's protocol tests.

use heapless::Vec;

use crate::adc::config::REG_CONFIG;
use crate::adc::{AdcDriver, DriverState, SampleResult};
use crate::bus::{Bus, BusMember, Line, Party, PARTY_TARGET};
use crate::common::{Logger, NoOpLogger};
use crate::i2c::engine::MasterEngine;
use crate::trigger::ReadTrigger;

/// The target's four 16-bit registers behind the 2-bit pointer.
#[derive(Default, Clone, Copy)]
struct Registers {
    conversion: u16,
    config: u16,
    lo_thresh: u16,
    hi_thresh: u16,
}

impl Registers {
    fn get(&self, pointer: u8) -> u16 {
        match pointer & 0x03 {
            0 => self.conversion,
            1 => self.config,
            2 => self.lo_thresh,
            _ => self.hi_thresh,
        }
    }

    fn set(&mut self, pointer: u8, value: u16) {
        match pointer & 0x03 {
            0 => self.conversion = value,
            1 => self.config = value,
            2 => self.lo_thresh = value,
            _ => self.hi_thresh = value,
        }
    }
}

/// Wire-protocol state of the target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TargetState {
    Idle,
    /// Clocking in the address byte.
    Address { bits: u8 },
    /// Driving SDA low for the address ack clock.
    AckAddress,
    /// Clocking in a data byte from the master.
    Write { bits: u8 },
    /// Driving SDA low for a data-byte ack clock.
    AckWrite,
    /// Shifting a byte out to the master, changing SDA on falling edges.
    Read { driven: u8 },
    /// SDA released; the master's ack decides whether another byte goes out.
    AckRead { master_acked: Option<bool> },
    /// Addressed elsewhere or NACKed; wait for START or STOP.
    Ignore,
}

/// Bit-level simulated ADC target.
pub struct SimTarget {
    address: u8,
    present: bool,
    party: Party,

    prev_scl: bool,
    prev_sda: bool,
    state: TargetState,
    shift: u8,
    /// 0 = next write byte is the pointer, 1 = payload high, 2 = payload low.
    write_index: u8,
    pending_high: u8,
    pointer: u8,
    registers: Registers,
    /// Word latched when a read is addressed, so the two bytes on the
    /// wire never tear against a concurrent conversion.
    read_word: u16,
    read_stage: u8,

    /// Continuous-conversion engine.
    running: bool,
    conversion_period: u32,
    conversion_elapsed: u32,
    conversions_done: u32,
    ramp_value: i16,
    ramp_step: i16,

    /// Open-drain alert pin, pulsed low by the comparator.
    pub alert: Line,
    alert_pulse_ticks: u32,
    alert_pulse_remaining: u32,

    /// Clock stretching: hold SCL low this many ticks after each falling
    /// edge. Zero disables.
    stretch_ticks: u32,
    stretch_remaining: u32,
}

impl SimTarget {
    #[must_use]
    pub fn new(address: u8) -> Self {
        SimTarget {
            address: address & 0x7F,
            present: true,
            party: PARTY_TARGET,
            prev_scl: true,
            prev_sda: true,
            state: TargetState::Idle,
            shift: 0,
            write_index: 0,
            pending_high: 0,
            pointer: 0,
            registers: Registers::default(),
            read_word: 0,
            read_stage: 0,
            running: false,
            conversion_period: 100,
            conversion_elapsed: 0,
            conversions_done: 0,
            ramp_value: 0,
            ramp_step: 1,
            alert: Line::new(),
            alert_pulse_ticks: 1,
            alert_pulse_remaining: 0,
            stretch_ticks: 0,
            stretch_remaining: 0,
        }
    }

    /// Detach the device: its address floats to NACK.
    #[must_use]
    pub fn present(mut self, present: bool) -> Self {
        self.present = present;
        self
    }

    /// Ticks between conversions once continuous mode is configured.
    #[must_use]
    pub fn conversion_period(mut self, ticks: u32) -> Self {
        self.conversion_period = ticks.max(1);
        self
    }

    /// Conversion values: start at `seed`, add `step` each conversion.
    #[must_use]
    pub fn ramp(mut self, seed: i16, step: i16) -> Self {
        self.ramp_value = seed;
        self.ramp_step = step;
        self
    }

    /// How long the alert pin is held low per comparator assertion.
    #[must_use]
    pub fn alert_pulse(mut self, ticks: u32) -> Self {
        self.alert_pulse_ticks = ticks.max(1);
        self
    }

    /// Stretch the clock after every falling edge, for tolerance tests.
    #[must_use]
    pub fn stretch(mut self, ticks: u32) -> Self {
        self.stretch_ticks = ticks;
        self
    }

    #[must_use]
    pub fn conversions_done(&self) -> u32 {
        self.conversions_done
    }

    /// Direct register peek for assertions.
    #[must_use]
    pub fn register(&self, pointer: u8) -> u16 {
        self.registers.get(pointer)
    }

    /// Comparator condition the threshold exploit relies on: with the low
    /// threshold at the most-positive code and the high threshold at the
    /// most-negative, every conversion satisfies this.
    fn comparator_asserts(&self, value: i16) -> bool {
        let queue_disabled = self.registers.config & 0x03 == 0b11;
        if queue_disabled {
            return false;
        }
        let lo = self.registers.lo_thresh as i16;
        let hi = self.registers.hi_thresh as i16;
        value >= hi || value <= lo
    }

    fn run_conversion_engine(&mut self) {
        if self.alert_pulse_remaining > 0 {
            self.alert_pulse_remaining -= 1;
            if self.alert_pulse_remaining == 0 {
                self.alert.release(self.party);
            }
        }
        if !self.running {
            return;
        }
        self.conversion_elapsed += 1;
        if self.conversion_elapsed < self.conversion_period {
            return;
        }
        self.conversion_elapsed = 0;
        let value = self.ramp_value;
        self.ramp_value = self.ramp_value.wrapping_add(self.ramp_step);
        self.registers.conversion = value as u16;
        self.conversions_done += 1;
        if self.comparator_asserts(value) {
            self.alert.drive_low(self.party);
            self.alert_pulse_remaining = self.alert_pulse_ticks;
        }
    }

    fn apply_register_write(&mut self, pointer: u8, value: u16) {
        self.registers.set(pointer, value);
        if pointer & 0x03 == REG_CONFIG {
            // Mode bit 8: 0 = continuous conversion.
            self.running = value & (1 << 8) == 0;
            self.conversion_elapsed = 0;
        }
    }

    fn received_write_byte(&mut self, byte: u8) {
        match self.write_index {
            0 => {
                self.pointer = byte & 0x03;
                self.write_index = 1;
            }
            1 => {
                self.pending_high = byte;
                self.write_index = 2;
            }
            _ => {
                let value = u16::from_be_bytes([self.pending_high, byte]);
                self.apply_register_write(self.pointer, value);
                self.write_index = 1;
            }
        }
    }

    fn load_read_byte(&mut self) {
        self.shift = if self.read_stage == 0 {
            (self.read_word >> 8) as u8
        } else {
            self.read_word as u8
        };
    }

    /// Present the MSB of the shift register on SDA, then rotate.
    fn drive_data_bit(&mut self, bus: &mut Bus) {
        if self.shift & 0x80 != 0 {
            bus.sda.release(self.party);
        } else {
            bus.sda.drive_low(self.party);
        }
        self.shift <<= 1;
    }

    fn on_start(&mut self) {
        self.state = TargetState::Address { bits: 0 };
        self.shift = 0;
        self.write_index = 0;
    }

    fn on_stop(&mut self, bus: &mut Bus) {
        bus.sda.release(self.party);
        self.state = TargetState::Idle;
    }

    fn on_scl_rising(&mut self, sda: bool) {
        match self.state {
            TargetState::Address { bits } => {
                self.shift = (self.shift << 1) | u8::from(sda);
                self.state = TargetState::Address { bits: bits + 1 };
            }
            TargetState::Write { bits } => {
                self.shift = (self.shift << 1) | u8::from(sda);
                self.state = TargetState::Write { bits: bits + 1 };
            }
            TargetState::AckRead { .. } => {
                self.state = TargetState::AckRead {
                    master_acked: Some(!sda),
                };
            }
            _ => {}
        }
    }

    fn on_scl_falling(&mut self, bus: &mut Bus) {
        match self.state {
            TargetState::Address { bits } if bits >= 8 => {
                let addressed = self.present && (self.shift >> 1) == self.address;
                if addressed {
                    bus.sda.drive_low(self.party);
                    self.state = TargetState::AckAddress;
                } else {
                    bus.sda.release(self.party);
                    self.state = TargetState::Ignore;
                }
            }
            TargetState::AckAddress => {
                bus.sda.release(self.party);
                if self.shift & 0x01 != 0 {
                    // Read: latch the addressed register and start shifting.
                    self.read_word = self.registers.get(self.pointer);
                    self.read_stage = 0;
                    self.load_read_byte();
                    self.drive_data_bit(bus);
                    self.state = TargetState::Read { driven: 1 };
                } else {
                    self.shift = 0;
                    self.state = TargetState::Write { bits: 0 };
                }
            }
            TargetState::Write { bits } if bits >= 8 => {
                let byte = self.shift;
                self.received_write_byte(byte);
                bus.sda.drive_low(self.party);
                self.state = TargetState::AckWrite;
            }
            TargetState::AckWrite => {
                bus.sda.release(self.party);
                self.shift = 0;
                self.state = TargetState::Write { bits: 0 };
            }
            TargetState::Read { driven } => {
                if driven < 8 {
                    self.drive_data_bit(bus);
                    self.state = TargetState::Read { driven: driven + 1 };
                } else {
                    // Byte done: hand SDA to the master for its ack.
                    bus.sda.release(self.party);
                    self.state = TargetState::AckRead { master_acked: None };
                }
            }
            TargetState::AckRead { master_acked } => {
                if master_acked == Some(true) {
                    // Master wants another byte; wrap over the same register.
                    self.read_stage = (self.read_stage + 1) % 2;
                    if self.read_stage == 0 {
                        self.read_word = self.registers.get(self.pointer);
                    }
                    self.load_read_byte();
                    self.drive_data_bit(bus);
                    self.state = TargetState::Read { driven: 1 };
                } else {
                    bus.sda.release(self.party);
                    self.state = TargetState::Ignore;
                }
            }
            _ => {}
        }
    }
}

impl BusMember for SimTarget {
    fn tick(&mut self, bus: &mut Bus) {
        self.run_conversion_engine();

        // Clock stretching, if enabled.
        if self.stretch_remaining > 0 {
            self.stretch_remaining -= 1;
            if self.stretch_remaining == 0 {
                bus.scl.release(self.party);
            }
        }

        let scl = bus.scl.is_high();
        let sda = bus.sda.is_high();
        let scl_was = self.prev_scl;
        let sda_was = self.prev_sda;
        self.prev_scl = scl;
        self.prev_sda = sda;

        if scl && scl_was {
            if sda_was && !sda {
                self.on_start();
                return;
            }
            if !sda_was && sda {
                self.on_stop(bus);
                return;
            }
        }

        if scl && !scl_was {
            self.on_scl_rising(sda);
        } else if !scl && scl_was {
            self.on_scl_falling(bus);
            if self.stretch_ticks > 0 && self.state != TargetState::Idle {
                bus.scl.drive_low(self.party);
                self.stretch_remaining = self.stretch_ticks;
            }
        }
    }
}

/// Decoded wire events, in order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Start,
    Stop,
    Byte { value: u8, acked: bool },
}

/// Passive protocol decoder: watches the two lines and reconstructs
/// START/STOP conditions and clocked bytes with their acknowledgment
/// bits. Purely observational; it never drives anything.
pub struct BusMonitor {
    prev_scl: bool,
    prev_sda: bool,
    shift: u8,
    bits: u8,
    pub events: Vec<BusEvent, 256>,
}

impl Default for BusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BusMonitor {
    #[must_use]
    pub fn new() -> Self {
        BusMonitor {
            prev_scl: true,
            prev_sda: true,
            shift: 0,
            bits: 0,
            events: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.bits = 0;
        self.shift = 0;
    }

    fn push(&mut self, event: BusEvent) {
        // Overflow drops the oldest-capacity tail; tests size their runs.
        let _ = self.events.push(event);
    }

    /// Just the decoded bytes, for byte-stream comparisons.
    pub fn bytes(&self) -> Vec<u8, 256> {
        let mut out = Vec::new();
        for event in &self.events {
            if let BusEvent::Byte { value, .. } = event {
                let _ = out.push(*value);
            }
        }
        out
    }
}

impl BusMember for BusMonitor {
    fn tick(&mut self, bus: &mut Bus) {
        let scl = bus.scl.is_high();
        let sda = bus.sda.is_high();
        let scl_was = self.prev_scl;
        let sda_was = self.prev_sda;
        self.prev_scl = scl;
        self.prev_sda = sda;

        if scl && scl_was {
            if sda_was && !sda {
                self.push(BusEvent::Start);
                self.bits = 0;
                self.shift = 0;
                return;
            }
            if !sda_was && sda {
                self.push(BusEvent::Stop);
                self.bits = 0;
                return;
            }
        }

        if scl && !scl_was {
            if self.bits < 8 {
                self.shift = (self.shift << 1) | u8::from(sda);
                self.bits += 1;
            } else {
                let event = BusEvent::Byte {
                    value: self.shift,
                    acked: !sda,
                };
                self.push(event);
                self.bits = 0;
                self.shift = 0;
            }
        }
    }
}

/// The full simulated system: bus, engine, target, monitor and driver,
/// advanced in the fixed scheduler order (engine, then everything wired
/// to the lines, then the driver with its strategy).
pub struct Rig<T: ReadTrigger, L: Logger = NoOpLogger> {
    pub bus: Bus,
    pub engine: MasterEngine<L>,
    pub target: SimTarget,
    pub monitor: BusMonitor,
    pub driver: AdcDriver<T>,
    pub ticks: u64,
}

impl<T: ReadTrigger, L: Logger> Rig<T, L> {
    pub fn new(engine: MasterEngine<L>, target: SimTarget, driver: AdcDriver<T>) -> Self {
        Rig {
            bus: Bus::new(),
            engine,
            target,
            monitor: BusMonitor::new(),
            driver,
            ticks: 0,
        }
    }

    /// One scheduler step.
    pub fn tick(&mut self) {
        self.engine.tick(&mut self.bus);
        self.target.tick(&mut self.bus);
        self.monitor.tick(&mut self.bus);
        let alert_high = self.target.alert.is_high();
        self.driver.step(&mut self.engine, alert_high);
        self.ticks += 1;
    }

    /// Run until the driver produces a sample or faults, collecting it.
    /// `None` on fault or budget exhaustion.
    pub fn run_for_sample(&mut self, budget: u32) -> Option<SampleResult> {
        for _ in 0..budget {
            self.tick();
            if let Some(sample) = self.driver.take_sample() {
                return Some(sample);
            }
            if self.driver.state() == DriverState::Faulted {
                return None;
            }
        }
        None
    }

    /// Run a fixed number of ticks.
    pub fn run(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::config::AdcConfigBuilder;
    use crate::i2c::common::EngineConfigBuilder;
    use crate::trigger::IntervalTrigger;
    use fugit::HertzU32;

    fn rig(period: u32) -> Rig<IntervalTrigger> {
        let engine = MasterEngine::new(
            EngineConfigBuilder::new()
                .tick_rate(HertzU32::kHz(400))
                .build(),
        );
        let target = SimTarget::new(0x48)
            .conversion_period(64)
            .ramp(100, 10)
            .alert_pulse(1);
        let driver = AdcDriver::new(AdcConfigBuilder::new().build(), IntervalTrigger::new(period));
        Rig::new(engine, target, driver)
    }

    #[test]
    fn config_write_reaches_the_target_register() {
        let mut rig = rig(500);
        rig.run(2_000);
        // Polling strategy: comparator disabled.
        assert_eq!(rig.target.register(REG_CONFIG), 0xC2E3);
        assert!(rig.target.running);
    }

    #[test]
    fn polled_read_returns_the_latest_conversion() {
        let mut rig = rig(500);
        let sample = rig.run_for_sample(50_000).expect("no sample produced");
        assert_eq!(sample.sequence, 1);
        // The ramp starts at 100 and the poll happens after at least one
        // conversion; the value must be one the ramp actually produced.
        assert!(sample.value >= 100);
        assert_eq!((sample.value - 100) % 10, 0);
    }

    #[test]
    fn monitor_decodes_start_byte_stop() {
        let mut rig = rig(500);
        rig.run(2_000);
        let events = &rig.monitor.events;
        assert!(events.len() >= 6);
        assert_eq!(events.first(), Some(&BusEvent::Start));
        // Address byte 0x48 << 1 | W, acked by the target.
        assert_eq!(
            events.get(1),
            Some(&BusEvent::Byte {
                value: 0x90,
                acked: true
            })
        );
        assert!(events.contains(&BusEvent::Stop));
    }
}
