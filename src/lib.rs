// Licensed under the Apache-2.0 license

//! Bit-level, tick-driven I2C master engine and the delta-sigma ADC
//! register driver built on top of it.
//!
//! Everything in this crate advances on a single discrete time base: one
//! `tick()` per scheduler step, no blocking, no preemption. "Waiting" is a
//! state held across ticks. The bus itself is modeled as open-drain wires
//! (release or drive low, never drive high) so ACK bits and clock
//! stretching are representable without bus conflicts.

// Prevent panic-prone patterns in production code only
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), no_std)]

pub mod adc;
pub mod bus;
pub mod common;
pub mod i2c;
pub mod report;
pub mod sim;
pub mod trigger;
