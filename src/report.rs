// Licensed under the Apache-2.0 license

//! Upstream sample formatting.
//!
//! Each conversion goes out as four uppercase hex ASCII digits followed by
//! CR LF; a fault is reported as a single `E` + CR LF sentinel, once per
//! fault. The sink is anything implementing `embedded_io::Write` —
//! typically a UART byte transmitter.

use embedded_io::Write;

use crate::adc::SampleResult;

fn hex_digit(nibble: u8) -> u8 {
    match nibble & 0x0F {
        n @ 0..=9 => b'0' + n,
        n => b'A' + (n - 10),
    }
}

/// Formats samples and fault sentinels for an upstream byte sink.
#[derive(Default)]
pub struct SampleReporter {
    fault_reported: bool,
}

impl SampleReporter {
    #[must_use]
    pub fn new() -> Self {
        SampleReporter {
            fault_reported: false,
        }
    }

    /// `XXXX\r\n`, value as big-endian hex of the raw two's-complement
    /// bits.
    pub fn write_sample<W: Write>(
        &mut self,
        sink: &mut W,
        sample: &SampleResult,
    ) -> Result<(), W::Error> {
        let raw = sample.value as u16;
        let frame = [
            hex_digit((raw >> 12) as u8),
            hex_digit((raw >> 8) as u8),
            hex_digit((raw >> 4) as u8),
            hex_digit(raw as u8),
            b'\r',
            b'\n',
        ];
        sink.write_all(&frame)
    }

    /// `E\r\n`, emitted at most once until [`SampleReporter::clear_fault`].
    pub fn write_fault<W: Write>(&mut self, sink: &mut W) -> Result<(), W::Error> {
        if self.fault_reported {
            return Ok(());
        }
        self.fault_reported = true;
        sink.write_all(b"E\r\n")
    }

    /// Re-arm the fault sentinel, paired with the driver's external reset.
    pub fn clear_fault(&mut self) {
        self.fault_reported = false;
    }
}
