// Licensed under the Apache-2.0 license

//! Register driver for the 16-bit delta-sigma ADC.
//!
//! Drives the master engine through the start-up register writes, then
//! loops: wait for the notification strategy to fire, write the register
//! pointer, repeated-START, read the two conversion bytes, NACK the last
//! one, STOP. The repeated-START (never STOP+START) is required by the
//! device's read-pointer semantics.
//!
//! Any NACK — device absent at init, or mid-flight — latches the driver
//! in `Faulted` after it closes the bus with a STOP. There is no retry;
//! recovery is an external `reset`.

pub mod config;

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{Ack, Direction, TransactionCommand};
use crate::i2c::engine::MasterEngine;
use crate::trigger::ReadTrigger;
use config::{
    AdcConfig, RegisterFrame, ALERT_HIGH_THRESHOLD, ALERT_LOW_THRESHOLD, REG_CONFIG,
    REG_CONVERSION, REG_HI_THRESH, REG_LO_THRESH,
};

/// One conversion fetched from the device. Produced exactly once per
/// completed read transaction; consumed via [`AdcDriver::take_sample`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SampleResult {
    /// Two's-complement conversion value, big-endian on the wire.
    pub value: i16,
    /// Monotonic sequence number, starting at 1 for the first sample.
    pub sequence: u32,
}

/// Driver lifecycle. The threshold states only occur when the strategy
/// arms the alert pin. `Faulted` is terminal until an external reset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    WritingConfig,
    WritingLowThreshold,
    WritingHighThreshold,
    AwaitingSample,
    ReadingPointer,
    ReadingRepeatedStart,
    Faulted,
}

pub struct AdcDriver<T: ReadTrigger, L: Logger = NoOpLogger> {
    config: AdcConfig,
    trigger: T,
    state: DriverState,
    /// A trigger fired; start a read as soon as the engine is free.
    read_pending: bool,
    /// A NACK was seen and STOP requested; fault once the STOP completes.
    pending_fault: bool,
    device_error: bool,
    high_byte: Option<u8>,
    low_byte: Option<u8>,
    sample: Option<SampleResult>,
    sample_valid: bool,
    sequence: u32,
    logger: L,
}

impl<T: ReadTrigger> AdcDriver<T, NoOpLogger> {
    #[must_use]
    pub fn new(config: AdcConfig, trigger: T) -> Self {
        Self::with_logger(config, trigger, NoOpLogger)
    }
}

impl<T: ReadTrigger, L: Logger> AdcDriver<T, L> {
    #[must_use]
    pub fn with_logger(config: AdcConfig, trigger: T, logger: L) -> Self {
        AdcDriver {
            config,
            trigger,
            state: DriverState::Uninitialized,
            read_pending: false,
            pending_fault: false,
            device_error: false,
            high_byte: None,
            low_byte: None,
            sample: None,
            sample_valid: false,
            sequence: 0,
            logger,
        }
    }

    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Persistent device-error flag, set on the first NACK and held until
    /// `reset`.
    #[must_use]
    pub fn device_error(&self) -> bool {
        self.device_error
    }

    /// True for exactly one scheduler step after a sample was produced.
    #[must_use]
    pub fn sample_ready(&self) -> bool {
        self.sample_valid
    }

    /// Consume the most recent sample, if one is waiting.
    pub fn take_sample(&mut self) -> Option<SampleResult> {
        self.sample.take()
    }

    /// External reset: back to `Uninitialized`, clearing the fault latch
    /// and the sample counter. The engine is reset separately.
    pub fn reset(&mut self) {
        self.state = DriverState::Uninitialized;
        self.read_pending = false;
        self.pending_fault = false;
        self.device_error = false;
        self.high_byte = None;
        self.low_byte = None;
        self.sample = None;
        self.sample_valid = false;
        self.sequence = 0;
    }

    /// Advance one tick. Runs after the engine in each scheduler step so
    /// that single-tick status pulses are seen exactly once.
    pub fn step<EL: Logger>(&mut self, engine: &mut MasterEngine<EL>, alert_is_high: bool) {
        self.sample_valid = false;

        // The strategy is polled every step, whatever the state, so a
        // falling edge during a read is latched rather than lost.
        if self.trigger.poll(alert_is_high) {
            self.read_pending = true;
        }

        let status = engine.status();

        if status.bus_stuck && self.state != DriverState::Faulted {
            self.logger.log("adc: bus stuck, faulting");
            self.device_error = true;
            self.state = DriverState::Faulted;
            return;
        }

        if self.pending_fault {
            if status.transaction_done {
                self.pending_fault = false;
                self.state = DriverState::Faulted;
                self.logger.log("adc: faulted");
            }
            return;
        }

        match self.state {
            DriverState::Uninitialized => {
                if !status.busy {
                    let word = self.config.word(self.trigger.arms_alert());
                    self.write_register(engine, RegisterFrame::new(REG_CONFIG, word));
                    self.state = DriverState::WritingConfig;
                }
            }
            DriverState::WritingConfig => {
                if status.transaction_done {
                    if status.acknowledgment == Some(Ack::Nack) {
                        self.begin_fault(engine);
                    } else if self.trigger.arms_alert() {
                        self.write_register(
                            engine,
                            RegisterFrame::new(REG_LO_THRESH, ALERT_LOW_THRESHOLD as u16),
                        );
                        self.state = DriverState::WritingLowThreshold;
                    } else {
                        self.logger.log("adc: configured");
                        self.state = DriverState::AwaitingSample;
                    }
                }
            }
            DriverState::WritingLowThreshold => {
                if status.transaction_done {
                    if status.acknowledgment == Some(Ack::Nack) {
                        self.begin_fault(engine);
                    } else {
                        self.write_register(
                            engine,
                            RegisterFrame::new(REG_HI_THRESH, ALERT_HIGH_THRESHOLD as u16),
                        );
                        self.state = DriverState::WritingHighThreshold;
                    }
                }
            }
            DriverState::WritingHighThreshold => {
                if status.transaction_done {
                    if status.acknowledgment == Some(Ack::Nack) {
                        self.begin_fault(engine);
                    } else {
                        self.logger.log("adc: configured, alert armed");
                        self.state = DriverState::AwaitingSample;
                    }
                }
            }
            DriverState::AwaitingSample => {
                if self.read_pending
                    && !status.busy
                    && engine.submit(TransactionCommand {
                        address: self.config.address,
                        direction: Direction::Write,
                        generate_start: true,
                        generate_stop_after: false,
                    })
                {
                    self.read_pending = false;
                    engine.feed_write_byte(REG_CONVERSION);
                    self.state = DriverState::ReadingPointer;
                }
            }
            DriverState::ReadingPointer => {
                if status.transaction_done {
                    if status.acknowledgment == Some(Ack::Nack) {
                        self.begin_fault(engine);
                    } else {
                        // Repeated-START into the read; two bytes, NACK on
                        // the last.
                        engine.set_read_acceptance(true);
                        if engine.submit(TransactionCommand {
                            address: self.config.address,
                            direction: Direction::Read,
                            generate_start: true,
                            generate_stop_after: true,
                        }) {
                            self.high_byte = None;
                            self.low_byte = None;
                            self.state = DriverState::ReadingRepeatedStart;
                        }
                    }
                }
            }
            DriverState::ReadingRepeatedStart => {
                if status.read_byte_valid {
                    if let Some(byte) = status.read_byte {
                        if self.high_byte.is_none() {
                            self.high_byte = Some(byte);
                            // The next byte is the last: NACK it.
                            engine.set_read_acceptance(false);
                        } else if self.low_byte.is_none() {
                            self.low_byte = Some(byte);
                        }
                    }
                }
                if status.transaction_done {
                    if status.acknowledgment == Some(Ack::Nack) {
                        self.begin_fault(engine);
                    } else if let (Some(high), Some(low)) = (self.high_byte, self.low_byte) {
                        let value = i16::from_be_bytes([high, low]);
                        self.sequence += 1;
                        self.sample = Some(SampleResult {
                            value,
                            sequence: self.sequence,
                        });
                        self.sample_valid = true;
                        self.state = DriverState::AwaitingSample;
                    } else {
                        // Transaction ended short of two bytes.
                        self.begin_fault(engine);
                    }
                }
            }
            DriverState::Faulted => {}
        }
    }

    fn write_register<EL: Logger>(&mut self, engine: &mut MasterEngine<EL>, frame: RegisterFrame) {
        if engine.submit(TransactionCommand {
            address: self.config.address,
            direction: Direction::Write,
            generate_start: true,
            generate_stop_after: true,
        }) {
            for byte in frame.bytes() {
                engine.feed_write_byte(byte);
            }
        }
    }

    /// A NACK leaves the engine holding the bus; close it with a STOP and
    /// fault once the STOP completes.
    fn begin_fault<EL: Logger>(&mut self, engine: &mut MasterEngine<EL>) {
        self.logger.log("adc: device nack");
        self.device_error = true;
        if engine.request_stop() {
            self.pending_fault = true;
        } else {
            self.state = DriverState::Faulted;
        }
    }
}
