// Licensed under the Apache-2.0 license

//! The bit-level I2C master state machine.
//!
//! Every bit on the wire (address, data, ACK) crosses four equal-duration
//! phases: set the data value while the clock is held low, release the
//! clock, hold the clock high (the sample instant), and force the clock
//! low again. START is a data fall while the clock is high; STOP a data
//! rise while the clock is high. The engine reproduces that exact shape,
//! not just the net byte exchange, because analyzers key on it.
//!
//! The engine never retries and never times out on an acknowledgment: a
//! NACK completes the command normally with `acknowledgment = Nack` and
//! the driver above decides what to do (typically `request_stop`). The
//! only optional bound is the clock-stretch watchdog in `EngineConfig`.

use heapless::Deque;

use crate::bus::{Bus, Party, PARTY_MASTER};
use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{Ack, Direction, EngineConfig, EngineStatus, TransactionCommand};

/// Capacity of the pending-write queue. Register-style protocols need at
/// most pointer + two payload bytes; eight leaves headroom.
pub const WRITE_QUEUE_DEPTH: usize = 8;

/// The four named phases each bit crosses, one `phase_ticks` each.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BitPhase {
    SetData,
    RaiseClock,
    HoldSample,
    LowerClock,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Idle,
    /// Generates START (fresh or repeated, same shape).
    Start,
    SendAddress { remaining: u8 },
    AddressAck,
    /// Between bytes and between segments. With no active segment this is
    /// the bus-held state a repeated-START or `request_stop` leaves from.
    WaitCommand,
    SendByte { remaining: u8 },
    ByteAck,
    ReceiveByte { remaining: u8 },
    SendAckOrNack,
    Stop,
}

/// Bit-level I2C master engine, advanced one tick at a time.
pub struct MasterEngine<L: Logger = NoOpLogger> {
    party: Party,
    phase_ticks: u32,
    stretch_timeout: Option<u32>,

    state: State,
    phase: BitPhase,
    phase_elapsed: u32,
    stretch_elapsed: u32,

    command: TransactionCommand,
    /// A submitted command waiting for the next tick to begin.
    command_pending: bool,
    /// Address + data phases of the current command still in progress.
    segment_active: bool,
    stop_pending: bool,
    busy: bool,

    shift: u8,
    write_queue: Deque<u8, WRITE_QUEUE_DEPTH>,
    read_accept_ack: bool,
    /// Acceptance latched at the instant the byte finished; the value the
    /// ack phase actually sends.
    ack_to_send: bool,
    address_acked: bool,

    acknowledgment: Option<Ack>,
    read_byte: Option<u8>,
    read_byte_valid: bool,
    transaction_done: bool,
    bus_stuck: bool,

    logger: L,
}

impl MasterEngine<NoOpLogger> {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_logger(config, NoOpLogger)
    }
}

impl<L: Logger> MasterEngine<L> {
    #[must_use]
    pub fn with_logger(config: EngineConfig, logger: L) -> Self {
        MasterEngine {
            party: PARTY_MASTER,
            phase_ticks: config.phase_ticks(),
            stretch_timeout: config.stretch_timeout,
            state: State::Idle,
            phase: BitPhase::SetData,
            phase_elapsed: 0,
            stretch_elapsed: 0,
            command: TransactionCommand {
                address: 0,
                direction: Direction::Write,
                generate_start: false,
                generate_stop_after: false,
            },
            command_pending: false,
            segment_active: false,
            stop_pending: false,
            busy: false,
            shift: 0,
            write_queue: Deque::new(),
            read_accept_ack: true,
            ack_to_send: true,
            address_acked: false,
            acknowledgment: None,
            read_byte: None,
            read_byte_valid: false,
            transaction_done: false,
            bus_stuck: false,
            logger,
        }
    }

    /// Current status snapshot. `transaction_done` and `read_byte_valid`
    /// hold for exactly one tick; sample once per scheduler step.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            busy: self.busy,
            transaction_done: self.transaction_done,
            acknowledgment: self.acknowledgment,
            read_byte: self.read_byte,
            read_byte_valid: self.read_byte_valid,
            write_accepts_next: !self.write_queue.is_full(),
            bus_stuck: self.bus_stuck,
        }
    }

    /// Whether the address byte of the current/most recent segment was
    /// acknowledged. Distinguishes address NACK from data NACK.
    #[must_use]
    pub fn address_was_acked(&self) -> bool {
        self.address_acked
    }

    /// Submit a command. Ignored while the engine is busy: the engine
    /// stays on its current work and `false` is returned. Callers poll
    /// `status().busy` first.
    ///
    /// From `Idle` the segment always begins with START regardless of
    /// `generate_start`; from the bus-held state, `generate_start = true`
    /// produces a repeated-START and `generate_start = false` continues
    /// the held segment with more data bytes.
    pub fn submit(&mut self, command: TransactionCommand) -> bool {
        if self.busy || self.bus_stuck {
            return false;
        }
        match self.state {
            State::Idle => {
                self.command = command;
                self.command_pending = true;
                self.busy = true;
                true
            }
            State::WaitCommand if !self.segment_active => {
                if command.generate_start {
                    self.command = command;
                    self.command_pending = true;
                } else {
                    // Continue the held segment without re-addressing.
                    self.command.generate_stop_after = command.generate_stop_after;
                    self.segment_active = true;
                }
                self.busy = true;
                true
            }
            _ => false,
        }
    }

    /// Queue one byte for an active or upcoming write segment. Valid while
    /// `write_accepts_next`; returns whether the byte was accepted. Bytes
    /// must be queued no later than the address acknowledgment completes,
    /// or the engine treats the segment's data as finished.
    pub fn feed_write_byte(&mut self, byte: u8) -> bool {
        self.write_queue.push_back(byte).is_ok()
    }

    /// Choose ACK (more bytes follow) or NACK (last byte) for received
    /// bytes. Must be set before the ACK-bit phase of the byte it applies
    /// to; NACK is how a multi-byte read ends without a STOP.
    pub fn set_read_acceptance(&mut self, ack: bool) {
        self.read_accept_ack = ack;
    }

    /// Emit STOP from the bus-held state and return to `Idle`. This is how
    /// a driver terminates after a NACK, or closes a segment submitted
    /// without `generate_stop_after`.
    pub fn request_stop(&mut self) -> bool {
        if self.busy || self.bus_stuck {
            return false;
        }
        match self.state {
            State::WaitCommand if !self.segment_active => {
                self.stop_pending = true;
                self.busy = true;
                true
            }
            _ => false,
        }
    }

    /// Release both lines and return to `Idle`, clearing any latched
    /// fault. The external reset path for `bus_stuck`.
    pub fn reset(&mut self, bus: &mut Bus) {
        bus.scl.release(self.party);
        bus.sda.release(self.party);
        self.state = State::Idle;
        self.phase = BitPhase::SetData;
        self.phase_elapsed = 0;
        self.stretch_elapsed = 0;
        self.command_pending = false;
        self.segment_active = false;
        self.stop_pending = false;
        self.busy = false;
        self.write_queue.clear();
        self.read_accept_ack = true;
        self.ack_to_send = true;
        self.address_acked = false;
        self.acknowledgment = None;
        self.read_byte = None;
        self.read_byte_valid = false;
        self.transaction_done = false;
        self.bus_stuck = false;
    }

    /// Advance the engine by one tick against the bus lines.
    pub fn tick(&mut self, bus: &mut Bus) {
        // One-tick pulses from the previous step expire now.
        self.transaction_done = false;
        self.read_byte_valid = false;

        if self.bus_stuck {
            return;
        }

        match self.state {
            State::Idle => self.tick_idle(),
            State::Start => self.tick_start(bus),
            State::SendAddress { remaining } => self.tick_send(bus, remaining, true),
            State::SendByte { remaining } => self.tick_send(bus, remaining, false),
            State::AddressAck => self.tick_ack_in(bus, true),
            State::ByteAck => self.tick_ack_in(bus, false),
            State::WaitCommand => self.tick_wait(),
            State::ReceiveByte { remaining } => self.tick_receive(bus, remaining),
            State::SendAckOrNack => self.tick_ack_out(bus),
            State::Stop => self.tick_stop(bus),
        }
    }

    fn tick_idle(&mut self) {
        if self.command_pending {
            self.command_pending = false;
            self.enter(State::Start);
        }
    }

    fn tick_wait(&mut self) {
        if self.stop_pending {
            self.stop_pending = false;
            self.enter(State::Stop);
            return;
        }
        if self.command_pending {
            // Repeated-START: straight back to Start, no STOP in between.
            self.command_pending = false;
            self.enter(State::Start);
            return;
        }
        if !self.segment_active {
            return;
        }
        match self.command.direction {
            Direction::Write => {
                if let Some(byte) = self.write_queue.pop_front() {
                    self.shift = byte;
                    self.enter(State::SendByte { remaining: 8 });
                } else {
                    // Data done. STOP if the command asked for it,
                    // otherwise hold the bus for a follow-up command.
                    self.segment_active = false;
                    if self.command.generate_stop_after {
                        self.enter(State::Stop);
                    } else {
                        self.finish_command();
                    }
                }
            }
            Direction::Read => {
                self.shift = 0;
                self.enter(State::ReceiveByte { remaining: 8 });
            }
        }
    }

    /// START / repeated-START: with the clock high, the data line falls.
    fn tick_start(&mut self, bus: &mut Bus) {
        match self.phase {
            BitPhase::SetData => {
                if self.phase_elapsed == 0 {
                    bus.sda.release(self.party);
                }
                self.advance_phase(BitPhase::RaiseClock);
            }
            BitPhase::RaiseClock => {
                bus.scl.release(self.party);
                if self.clock_stretched(bus) {
                    return;
                }
                self.advance_phase(BitPhase::HoldSample);
            }
            BitPhase::HoldSample => {
                if self.phase_elapsed == 0 {
                    // The START condition itself.
                    bus.sda.drive_low(self.party);
                }
                self.advance_phase(BitPhase::LowerClock);
            }
            BitPhase::LowerClock => {
                if self.phase_elapsed == 0 {
                    bus.scl.drive_low(self.party);
                }
                if self.phase_done() {
                    self.shift = (self.command.address << 1) | self.command.direction.rw_bit();
                    self.segment_active = true;
                    self.address_acked = false;
                    self.logger.log("i2c: start");
                    self.enter(State::SendAddress { remaining: 8 });
                }
            }
        }
    }

    /// Transmit one bit of the shift register, MSB first. Shared by the
    /// address byte and write-data bytes.
    fn tick_send(&mut self, bus: &mut Bus, remaining: u8, is_address: bool) {
        match self.phase {
            BitPhase::SetData => {
                if self.phase_elapsed == 0 {
                    if self.shift & 0x80 != 0 {
                        bus.sda.release(self.party);
                    } else {
                        bus.sda.drive_low(self.party);
                    }
                }
                self.advance_phase(BitPhase::RaiseClock);
            }
            BitPhase::RaiseClock => {
                bus.scl.release(self.party);
                if self.clock_stretched(bus) {
                    return;
                }
                self.advance_phase(BitPhase::HoldSample);
            }
            BitPhase::HoldSample => self.advance_phase(BitPhase::LowerClock),
            BitPhase::LowerClock => {
                if self.phase_elapsed == 0 {
                    bus.scl.drive_low(self.party);
                }
                if self.phase_done() {
                    self.shift <<= 1;
                    let remaining = remaining - 1;
                    if remaining == 0 {
                        self.enter(if is_address {
                            State::AddressAck
                        } else {
                            State::ByteAck
                        });
                    } else {
                        self.enter(if is_address {
                            State::SendAddress { remaining }
                        } else {
                            State::SendByte { remaining }
                        });
                    }
                }
            }
        }
    }

    /// Ninth clock after a transmitted byte: release the data line and
    /// sample the receiver's acknowledgment while the clock is high.
    fn tick_ack_in(&mut self, bus: &mut Bus, is_address: bool) {
        match self.phase {
            BitPhase::SetData => {
                if self.phase_elapsed == 0 {
                    bus.sda.release(self.party);
                }
                self.advance_phase(BitPhase::RaiseClock);
            }
            BitPhase::RaiseClock => {
                bus.scl.release(self.party);
                if self.clock_stretched(bus) {
                    return;
                }
                self.advance_phase(BitPhase::HoldSample);
            }
            BitPhase::HoldSample => {
                if self.phase_elapsed == 0 {
                    let ack = if bus.sda.is_high() { Ack::Nack } else { Ack::Ack };
                    self.acknowledgment = Some(ack);
                    if is_address && ack == Ack::Ack {
                        self.address_acked = true;
                    }
                }
                self.advance_phase(BitPhase::LowerClock);
            }
            BitPhase::LowerClock => {
                if self.phase_elapsed == 0 {
                    bus.scl.drive_low(self.party);
                }
                if self.phase_done() {
                    if self.acknowledgment == Some(Ack::Nack) {
                        // Complete normally; the driver interprets the NACK
                        // and issues STOP itself.
                        self.logger.log(if is_address {
                            "i2c: address nack"
                        } else {
                            "i2c: data nack"
                        });
                        self.write_queue.clear();
                        self.segment_active = false;
                        self.finish_command();
                        self.state = State::WaitCommand;
                    } else {
                        self.enter(State::WaitCommand);
                    }
                }
            }
        }
    }

    /// Receive one bit: data line released, sampled while the clock is
    /// held high.
    fn tick_receive(&mut self, bus: &mut Bus, remaining: u8) {
        match self.phase {
            BitPhase::SetData => {
                if self.phase_elapsed == 0 {
                    bus.sda.release(self.party);
                }
                self.advance_phase(BitPhase::RaiseClock);
            }
            BitPhase::RaiseClock => {
                bus.scl.release(self.party);
                if self.clock_stretched(bus) {
                    return;
                }
                self.advance_phase(BitPhase::HoldSample);
            }
            BitPhase::HoldSample => {
                if self.phase_elapsed == 0 {
                    self.shift = (self.shift << 1) | u8::from(bus.sda.is_high());
                }
                self.advance_phase(BitPhase::LowerClock);
            }
            BitPhase::LowerClock => {
                if self.phase_elapsed == 0 {
                    bus.scl.drive_low(self.party);
                }
                if self.phase_done() {
                    let remaining = remaining - 1;
                    if remaining == 0 {
                        self.read_byte = Some(self.shift);
                        self.read_byte_valid = true;
                        // Latch the acceptance now: callers reacting to the
                        // valid pulse are choosing for the *next* byte.
                        self.ack_to_send = self.read_accept_ack;
                        self.enter(State::SendAckOrNack);
                    } else {
                        self.enter(State::ReceiveByte { remaining });
                    }
                }
            }
        }
    }

    /// Master's acknowledgment of a received byte: drive low for ACK
    /// (another byte follows), release for NACK (last byte).
    fn tick_ack_out(&mut self, bus: &mut Bus) {
        match self.phase {
            BitPhase::SetData => {
                if self.phase_elapsed == 0 {
                    if self.ack_to_send {
                        bus.sda.drive_low(self.party);
                    } else {
                        bus.sda.release(self.party);
                    }
                }
                self.advance_phase(BitPhase::RaiseClock);
            }
            BitPhase::RaiseClock => {
                bus.scl.release(self.party);
                if self.clock_stretched(bus) {
                    return;
                }
                self.advance_phase(BitPhase::HoldSample);
            }
            BitPhase::HoldSample => self.advance_phase(BitPhase::LowerClock),
            BitPhase::LowerClock => {
                if self.phase_elapsed == 0 {
                    bus.scl.drive_low(self.party);
                    bus.sda.release(self.party);
                }
                if self.phase_done() {
                    if self.ack_to_send {
                        self.enter(State::WaitCommand);
                    } else {
                        // NACK ends the read.
                        self.segment_active = false;
                        if self.command.generate_stop_after {
                            self.enter(State::Stop);
                        } else {
                            self.finish_command();
                            self.state = State::WaitCommand;
                        }
                    }
                }
            }
        }
    }

    /// STOP: with the clock high, the data line rises. Afterwards both
    /// lines are released and the bus is free.
    fn tick_stop(&mut self, bus: &mut Bus) {
        match self.phase {
            BitPhase::SetData => {
                if self.phase_elapsed == 0 {
                    bus.sda.drive_low(self.party);
                }
                self.advance_phase(BitPhase::RaiseClock);
            }
            BitPhase::RaiseClock => {
                bus.scl.release(self.party);
                if self.clock_stretched(bus) {
                    return;
                }
                self.advance_phase(BitPhase::HoldSample);
            }
            BitPhase::HoldSample => {
                if self.phase_elapsed == 0 {
                    // The STOP condition itself.
                    bus.sda.release(self.party);
                }
                self.advance_phase(BitPhase::LowerClock);
            }
            BitPhase::LowerClock => {
                // Bus-free time; both lines stay released.
                if self.phase_done() {
                    self.logger.log("i2c: stop");
                    self.finish_command();
                    self.state = State::Idle;
                }
            }
        }
    }

    fn enter(&mut self, state: State) {
        self.state = state;
        self.phase = BitPhase::SetData;
        self.phase_elapsed = 0;
        self.stretch_elapsed = 0;
    }

    fn advance_phase(&mut self, next: BitPhase) {
        if self.phase_done() {
            self.phase = next;
        }
    }

    fn phase_done(&mut self) -> bool {
        self.phase_elapsed += 1;
        if self.phase_elapsed >= self.phase_ticks {
            self.phase_elapsed = 0;
            true
        } else {
            false
        }
    }

    /// Clock-stretch tolerance: after releasing SCL the high phase does
    /// not begin until the line actually floats high. Returns true while
    /// stretched. Trips the watchdog if one is configured.
    fn clock_stretched(&mut self, bus: &mut Bus) -> bool {
        if bus.scl.is_high() {
            self.stretch_elapsed = 0;
            return false;
        }
        self.stretch_elapsed += 1;
        if let Some(limit) = self.stretch_timeout {
            if self.stretch_elapsed > limit {
                self.logger.log("i2c: clock stuck low");
                bus.scl.release(self.party);
                bus.sda.release(self.party);
                self.bus_stuck = true;
                self.segment_active = false;
                self.write_queue.clear();
                self.state = State::Idle;
                self.finish_command();
            }
        }
        true
    }

    fn finish_command(&mut self) {
        self.busy = false;
        self.transaction_done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::common::EngineConfigBuilder;
    use fugit::HertzU32;

    fn engine() -> MasterEngine {
        let config = EngineConfigBuilder::new()
            .tick_rate(HertzU32::kHz(400))
            .build();
        MasterEngine::new(config)
    }

    fn cmd_write(stop: bool) -> TransactionCommand {
        TransactionCommand {
            address: 0x48,
            direction: Direction::Write,
            generate_start: true,
            generate_stop_after: stop,
        }
    }

    #[test]
    fn idle_engine_accepts_exactly_one_command() {
        let mut engine = engine();
        assert!(engine.submit(cmd_write(true)));
        assert!(!engine.submit(cmd_write(true)));
        assert!(engine.status().busy);
    }

    #[test]
    fn write_queue_reports_fullness() {
        let mut engine = engine();
        for _ in 0..WRITE_QUEUE_DEPTH {
            assert!(engine.feed_write_byte(0xAA));
        }
        assert!(!engine.status().write_accepts_next);
        assert!(!engine.feed_write_byte(0xAA));
    }

    #[test]
    fn unacknowledged_address_completes_with_nack() {
        // Nobody on the bus: SDA floats high during the ack phase.
        let mut bus = Bus::new();
        let mut engine = engine();
        assert!(engine.submit(cmd_write(true)));
        engine.feed_write_byte(0x01);

        let mut done = false;
        for _ in 0..10_000 {
            engine.tick(&mut bus);
            if engine.status().transaction_done {
                done = true;
                break;
            }
        }
        assert!(done, "engine never completed");
        assert_eq!(engine.status().acknowledgment, Some(Ack::Nack));
        assert!(!engine.address_was_acked());
        // Queued data was discarded, bus is held awaiting the driver's STOP.
        assert!(engine.status().write_accepts_next);
        assert!(!engine.status().busy);
    }

    #[test]
    fn stop_after_nack_returns_bus_to_idle() {
        let mut bus = Bus::new();
        let mut engine = engine();
        engine.submit(cmd_write(true));
        for _ in 0..10_000 {
            engine.tick(&mut bus);
            if engine.status().transaction_done {
                break;
            }
        }
        assert!(engine.request_stop());
        let mut done = false;
        for _ in 0..10_000 {
            engine.tick(&mut bus);
            if engine.status().transaction_done {
                done = true;
                break;
            }
        }
        assert!(done);
        assert!(bus.scl.is_high());
        assert!(bus.sda.is_high());
    }

    #[test]
    fn watchdog_trips_when_clock_is_held_low() {
        let config = EngineConfigBuilder::new()
            .tick_rate(HertzU32::kHz(400))
            .stretch_timeout(50)
            .build();
        let mut engine = MasterEngine::new(config);
        let mut bus = Bus::new();
        // A stuck party holds SCL low forever.
        bus.scl.drive_low(crate::bus::PARTY_TARGET);

        engine.submit(cmd_write(true));
        for _ in 0..10_000 {
            engine.tick(&mut bus);
            if engine.status().bus_stuck {
                break;
            }
        }
        assert!(engine.status().bus_stuck);
        assert!(!engine.status().busy);
        // Latched until reset.
        assert!(!engine.submit(cmd_write(true)));
        engine.reset(&mut bus);
        assert!(!engine.status().bus_stuck);
        assert!(engine.submit(cmd_write(true)));
    }
}
