// Licensed under the Apache-2.0 license

//! Bit-level I2C master engine.
//!
//! `engine` holds the 4-phase-per-bit state machine, `common` the shared
//! command/status/config types, and `controller` a blocking
//! `embedded_hal::i2c::I2c` facade for callers that do not want to drive
//! the tick interface themselves.

pub mod common;
pub mod controller;
pub mod engine;

pub use common::{
    Ack, Direction, EngineConfig, EngineConfigBuilder, EngineStatus, Error, I2cSpeed,
    TransactionCommand,
};
pub use controller::BlockingI2c;
pub use engine::MasterEngine;
