// Licensed under the Apache-2.0 license

//! Notification strategies: when to fetch the next conversion.
//!
//! Both strategies drive the *same* steady-state read sequence in the ADC
//! driver; they differ only in the trigger condition. Polling runs a
//! free-running counter and accepts under-sampling; the alert-edge variant
//! watches the device's comparator pin and catches every conversion, at
//! the cost of two extra register writes at initialization.

/// Decides when the ADC driver should begin a conversion read.
///
/// The driver polls its strategy once per tick with the current level of
/// the notification line (always high when no line is wired).
pub trait ReadTrigger {
    /// Advance one tick; return true to request a read.
    fn poll(&mut self, alert_is_high: bool) -> bool;

    /// Whether initialization must arm the comparator threshold registers
    /// so the alert pin fires on every conversion.
    fn arms_alert(&self) -> bool {
        false
    }
}

/// Fixed-interval polling, independent of the device's conversion rate.
///
/// Guarantees no transaction overlap but under-samples relative to the
/// device's true output rate and may re-read a stale conversion.
pub struct IntervalTrigger {
    period: u32,
    elapsed: u32,
}

impl IntervalTrigger {
    /// `period` in ticks; clamped to at least one.
    #[must_use]
    pub fn new(period: u32) -> Self {
        IntervalTrigger {
            period: period.max(1),
            elapsed: 0,
        }
    }
}

impl ReadTrigger for IntervalTrigger {
    fn poll(&mut self, _alert_is_high: bool) -> bool {
        self.elapsed += 1;
        if self.elapsed >= self.period {
            self.elapsed = 0;
            true
        } else {
            false
        }
    }
}

/// Falling-edge detector on the alert/ready line: a one-tick-delayed
/// compare against the line's previous level, not a debouncer.
///
/// With the inverted thresholds written at init, the comparator asserts
/// once per conversion, so each falling edge is one fresh sample.
pub struct AlertEdgeTrigger {
    previous_high: bool,
}

impl Default for AlertEdgeTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertEdgeTrigger {
    #[must_use]
    pub fn new() -> Self {
        // The line idles high under its pull-up.
        AlertEdgeTrigger {
            previous_high: true,
        }
    }
}

impl ReadTrigger for AlertEdgeTrigger {
    fn poll(&mut self, alert_is_high: bool) -> bool {
        let fired = self.previous_high && !alert_is_high;
        self.previous_high = alert_is_high;
        fired
    }

    fn arms_alert(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_fires_every_period() {
        let mut trigger = IntervalTrigger::new(4);
        let fires: usize = (0..12).filter(|_| trigger.poll(true)).count();
        assert_eq!(fires, 3);
    }

    #[test]
    fn interval_period_is_clamped() {
        let mut trigger = IntervalTrigger::new(0);
        assert!(trigger.poll(true));
        assert!(trigger.poll(true));
    }

    #[test]
    fn edge_trigger_fires_once_per_falling_edge() {
        let mut trigger = AlertEdgeTrigger::new();
        assert!(!trigger.poll(true));
        // Line drops and stays low: exactly one fire.
        assert!(trigger.poll(false));
        assert!(!trigger.poll(false));
        assert!(!trigger.poll(false));
        // Rising edge never fires.
        assert!(!trigger.poll(true));
        assert!(trigger.poll(false));
    }

    #[test]
    fn only_the_edge_strategy_arms_the_comparator() {
        assert!(!IntervalTrigger::new(10).arms_alert());
        assert!(AlertEdgeTrigger::new().arms_alert());
    }
}
