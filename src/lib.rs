//! Modbus TCP Simulation Server
//!
//! Serves one shared register map to any number of Modbus TCP clients from a
//! single dispatch loop, while a background updater feeds a simulated sensor
//! reading into an input register.

pub mod cli;
pub mod config;
pub mod modbus;
pub mod registers;
pub mod sensors;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, InitialStateSource};
pub use modbus::{ExceptionCode, FunctionCode, MbapCodec, Request, Response};
pub use registers::{Bank, BankSizes, InitialState, RegisterError, RegisterMap};
pub use sensors::SensorSource;
pub use services::{BackgroundUpdater, ConnectionMultiplexer, RequestProcessor};
pub use utils::error::ServerError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
