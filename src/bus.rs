// Licensed under the Apache-2.0 license

//! Open-drain bus line model.
//!
//! A line is a shared wire with a pull-up: any party may pull it low or
//! release it, and the wire reads high only while *no* party pulls it low.
//! There is deliberately no operation that drives a line high. This is the
//! physical contract the master engine reasons about, and it is what makes
//! ACK bits (receiver pulls SDA low under the released master) and clock
//! stretching (target holds SCL low) representable without bus conflicts.

/// Identity of one party on a line. At most eight parties per line; the
/// index is masked into range so the type stays panic-free.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Party(u8);

impl Party {
    #[must_use]
    pub const fn new(index: u8) -> Self {
        Party(index & 0x07)
    }

    const fn mask(self) -> u8 {
        1 << self.0
    }
}

/// One open-drain wire.
///
/// The wire level is the wired-AND of every party's drive decision:
/// `is_high()` is true iff the pull-low mask is empty.
#[derive(Default, Clone, Copy)]
pub struct Line {
    pulling_low: u8,
}

impl Line {
    #[must_use]
    pub const fn new() -> Self {
        Line { pulling_low: 0 }
    }

    /// Pull the line low on behalf of `party`. Idempotent.
    pub fn drive_low(&mut self, party: Party) {
        self.pulling_low |= party.mask();
    }

    /// Stop driving the line on behalf of `party`. Idempotent. The line
    /// floats high only once every other party has released it too.
    pub fn release(&mut self, party: Party) {
        self.pulling_low &= !party.mask();
    }

    /// Current wire level: high iff nobody is pulling low.
    #[must_use]
    pub fn is_high(&self) -> bool {
        self.pulling_low == 0
    }

    /// Whether this particular party is pulling the line low.
    #[must_use]
    pub fn is_driven_by(&self, party: Party) -> bool {
        self.pulling_low & party.mask() != 0
    }
}

/// The two-wire I2C bus: clock and data lines.
#[derive(Default, Clone, Copy)]
pub struct Bus {
    pub scl: Line,
    pub sda: Line,
}

/// Well-known party indices used by this crate's components.
pub const PARTY_MASTER: Party = Party::new(0);
pub const PARTY_TARGET: Party = Party::new(1);

/// Anything that advances against the bus on the shared tick: targets,
/// monitors, anything wired to the two lines besides the master engine.
pub trait BusMember {
    fn tick(&mut self, bus: &mut Bus);
}

impl BusMember for () {
    fn tick(&mut self, _bus: &mut Bus) {}
}

impl Bus {
    #[must_use]
    pub const fn new() -> Self {
        Bus {
            scl: Line::new(),
            sda: Line::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_idles_high() {
        let line = Line::new();
        assert!(line.is_high());
    }

    #[test]
    fn any_single_party_forces_low() {
        let mut line = Line::new();
        line.drive_low(PARTY_TARGET);
        assert!(!line.is_high());
        line.release(PARTY_TARGET);
        assert!(line.is_high());
    }

    #[test]
    fn line_stays_low_until_every_party_releases() {
        let mut line = Line::new();
        line.drive_low(PARTY_MASTER);
        line.drive_low(PARTY_TARGET);
        line.release(PARTY_MASTER);
        // Target still holds it
        assert!(!line.is_high());
        line.release(PARTY_TARGET);
        assert!(line.is_high());
    }

    #[test]
    fn releasing_a_line_you_never_drove_is_harmless() {
        let mut line = Line::new();
        line.drive_low(PARTY_MASTER);
        line.release(PARTY_TARGET);
        assert!(!line.is_high());
        assert!(line.is_driven_by(PARTY_MASTER));
        assert!(!line.is_driven_by(PARTY_TARGET));
    }

    #[test]
    fn party_index_is_masked_into_range() {
        // Party 8 aliases party 0 rather than shifting out of the mask.
        assert_eq!(Party::new(8), Party::new(0));
    }
}
