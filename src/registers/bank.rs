use serde::{Deserialize, Serialize};
use std::fmt;

/// The four banks of the Modbus data model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bank {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

impl Bank {
    /// Whether a client request may write this bank
    pub fn is_client_writable(self) -> bool {
        matches!(self, Bank::Coils | Bank::HoldingRegisters)
    }

    pub fn name(self) -> &'static str {
        match self {
            Bank::Coils => "coils",
            Bank::DiscreteInputs => "discrete inputs",
            Bank::HoldingRegisters => "holding registers",
            Bank::InputRegisters => "input registers",
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Single-bit banks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitBank {
    Coils,
    DiscreteInputs,
}

impl BitBank {
    pub fn bank(self) -> Bank {
        match self {
            BitBank::Coils => Bank::Coils,
            BitBank::DiscreteInputs => Bank::DiscreteInputs,
        }
    }
}

/// 16-bit banks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterBank {
    Holding,
    Input,
}

impl RegisterBank {
    pub fn bank(self) -> Bank {
        match self {
            RegisterBank::Holding => Bank::HoldingRegisters,
            RegisterBank::Input => Bank::InputRegisters,
        }
    }
}

/// Number of cells in each bank, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BankSizes {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
}

impl BankSizes {
    pub fn new(
        coils: usize,
        discrete_inputs: usize,
        holding_registers: usize,
        input_registers: usize,
    ) -> Self {
        Self {
            coils,
            discrete_inputs,
            holding_registers,
            input_registers,
        }
    }

    pub fn of(&self, bank: Bank) -> usize {
        match bank {
            Bank::Coils => self.coils,
            Bank::DiscreteInputs => self.discrete_inputs,
            Bank::HoldingRegisters => self.holding_registers,
            Bank::InputRegisters => self.input_registers,
        }
    }
}
