// Licensed under the Apache-2.0 license

//! Register map and configuration word for the 16-bit delta-sigma ADC.
//!
//! The device exposes four 16-bit registers behind a one-byte pointer:
//! the conversion result, the configuration word, and the two comparator
//! thresholds. All register traffic is big-endian.

/// Register pointer bytes.
pub const REG_CONVERSION: u8 = 0x00;
pub const REG_CONFIG: u8 = 0x01;
pub const REG_LO_THRESH: u8 = 0x02;
pub const REG_HI_THRESH: u8 = 0x03;

/// Default 7-bit bus address (ADDR pin to ground).
pub const DEFAULT_ADDRESS: u8 = 0x48;

/// Threshold values for the always-trigger comparator arming: the low
/// threshold gets the most-positive code and the high threshold the
/// most-negative, so every conversion result satisfies the comparator and
/// the alert pin strobes once per conversion. The inversion is the whole
/// point; these are not tunable.
pub const ALERT_LOW_THRESHOLD: i16 = i16::MAX;
pub const ALERT_HIGH_THRESHOLD: i16 = i16::MIN;

/// Input multiplexer selection (config bits 14:12).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum InputChannel {
    DiffA0A1 = 0b000,
    DiffA0A3 = 0b001,
    DiffA1A3 = 0b010,
    DiffA2A3 = 0b011,
    SingleA0 = 0b100,
    SingleA1 = 0b101,
    SingleA2 = 0b110,
    SingleA3 = 0b111,
}

/// Programmable gain / full-scale range (config bits 11:9).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum FullScale {
    Fs6V144 = 0b000,
    Fs4V096 = 0b001,
    Fs2V048 = 0b010,
    Fs1V024 = 0b011,
    Fs0V512 = 0b100,
    Fs0V256 = 0b101,
}

/// Conversions per second (config bits 7:5).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum DataRate {
    Sps8 = 0b000,
    Sps16 = 0b001,
    Sps32 = 0b010,
    Sps64 = 0b011,
    Sps128 = 0b100,
    Sps250 = 0b101,
    Sps475 = 0b110,
    Sps860 = 0b111,
}

/// One complete register write: pointer byte plus big-endian payload.
/// The payload only means anything once the preceding byte on the wire
/// was acknowledged.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterFrame {
    pub pointer: u8,
    pub payload_high: u8,
    pub payload_low: u8,
}

impl RegisterFrame {
    #[must_use]
    pub fn new(pointer: u8, value: u16) -> Self {
        let [payload_high, payload_low] = value.to_be_bytes();
        RegisterFrame {
            pointer,
            payload_high,
            payload_low,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> [u8; 3] {
        [self.pointer, self.payload_high, self.payload_low]
    }
}

/// ADC configuration. Always selects continuous-conversion mode; whether
/// the comparator drives the alert pin is decided by the notification
/// strategy at init, not here.
#[derive(Copy, Clone, Debug)]
pub struct AdcConfig {
    pub address: u8,
    pub channel: InputChannel,
    pub full_scale: FullScale,
    pub data_rate: DataRate,
}

impl AdcConfig {
    /// The 16-bit config word. Bit 15 (start) is written set, mode bit 8
    /// is cleared for continuous conversion. `comparator_enabled` selects
    /// assert-after-one-conversion versus comparator disabled (queue bits
    /// 1:0 = 00 or 11).
    #[must_use]
    pub fn word(&self, comparator_enabled: bool) -> u16 {
        let queue = if comparator_enabled { 0b00 } else { 0b11 };
        (1 << 15)
            | ((self.channel as u16) << 12)
            | ((self.full_scale as u16) << 9)
            | ((self.data_rate as u16) << 5)
            | queue
    }
}

pub struct AdcConfigBuilder {
    address: u8,
    channel: InputChannel,
    full_scale: FullScale,
    data_rate: DataRate,
}

impl Default for AdcConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            channel: InputChannel::SingleA0,
            full_scale: FullScale::Fs4V096,
            data_rate: DataRate::Sps860,
        }
    }

    #[must_use]
    pub fn address(mut self, address: u8) -> Self {
        self.address = address & 0x7F;
        self
    }

    #[must_use]
    pub fn channel(mut self, channel: InputChannel) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub fn full_scale(mut self, full_scale: FullScale) -> Self {
        self.full_scale = full_scale;
        self
    }

    #[must_use]
    pub fn data_rate(mut self, data_rate: DataRate) -> Self {
        self.data_rate = data_rate;
        self
    }

    #[must_use]
    pub fn build(self) -> AdcConfig {
        AdcConfig {
            address: self.address,
            channel: self.channel,
            full_scale: self.full_scale,
            data_rate: self.data_rate,
        }
    }
}
