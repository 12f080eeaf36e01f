pub mod bank;
pub mod register_map;

pub use bank::{Bank, BankSizes, BitBank, RegisterBank};
pub use register_map::{InitialState, RegisterError, RegisterMap};
