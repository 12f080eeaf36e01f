//! Shared register map
//!
//! One instance is created at startup and handed out as `Arc<RegisterMap>` to
//! the request processor and the background updater. Every bank sits behind
//! its own `RwLock`; each operation takes the lock once, validates, then
//! applies, so a failed request never leaves a partial write behind and a
//! reader never observes half of a multi-register write.

use log::{debug, trace};
use std::ops::Range;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use super::bank::{Bank, BankSizes, BitBank, RegisterBank};
use crate::modbus::constants::{
    MAX_BANK_SIZE, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS,
    MAX_WR_READ_REGISTERS, MAX_WR_WRITE_REGISTERS,
};
use crate::utils::error::ServerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("{bank}: {count} entries at address {address} exceed bank size {size}")]
    OutOfRange {
        bank: Bank,
        address: u16,
        count: usize,
        size: usize,
    },

    #[error("{bank}: quantity {count} outside 1..={max}")]
    InvalidQuantity { bank: Bank, count: usize, max: u16 },

    #[error("{0} are read-only to clients")]
    ReadOnly(Bank),

    #[error("{0} lock poisoned")]
    Poisoned(Bank),
}

/// Bank sizes and initial contents produced once at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialState {
    pub sizes: BankSizes,
    pub coils: Vec<bool>,
    pub discrete_inputs: Vec<bool>,
    pub holding_registers: Vec<u16>,
    pub input_registers: Vec<u16>,
}

pub struct RegisterMap {
    sizes: BankSizes,
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
}

impl RegisterMap {
    /// Zero-filled map with the given sizes
    pub fn new(sizes: BankSizes) -> Result<Self, ServerError> {
        Self::from_initial_state(InitialState {
            sizes,
            coils: vec![false; sizes.coils],
            discrete_inputs: vec![false; sizes.discrete_inputs],
            holding_registers: vec![0; sizes.holding_registers],
            input_registers: vec![0; sizes.input_registers],
        })
    }

    pub fn from_initial_state(state: InitialState) -> Result<Self, ServerError> {
        let sizes = state.sizes;
        check_initial(Bank::Coils, sizes.coils, state.coils.len())?;
        check_initial(Bank::DiscreteInputs, sizes.discrete_inputs, state.discrete_inputs.len())?;
        check_initial(Bank::HoldingRegisters, sizes.holding_registers, state.holding_registers.len())?;
        check_initial(Bank::InputRegisters, sizes.input_registers, state.input_registers.len())?;

        debug!(
            "Register map allocated: {} coils, {} discrete inputs, {} holding registers, {} input registers",
            sizes.coils, sizes.discrete_inputs, sizes.holding_registers, sizes.input_registers
        );

        Ok(Self {
            sizes,
            coils: RwLock::new(state.coils),
            discrete_inputs: RwLock::new(state.discrete_inputs),
            holding_registers: RwLock::new(state.holding_registers),
            input_registers: RwLock::new(state.input_registers),
        })
    }

    pub fn sizes(&self) -> BankSizes {
        self.sizes
    }

    pub fn read_bits(
        &self,
        bank: BitBank,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, RegisterError> {
        let id = bank.bank();
        check_quantity(id, count as usize, MAX_READ_BITS)?;
        let bits = read_lock(id, self.bit_lock(bank))?;
        let range = check_range(id, bits.len(), address, count as usize)?;
        Ok(bits[range].to_vec())
    }

    /// Client write to a bit bank, rejected for discrete inputs
    pub fn write_bits(
        &self,
        bank: BitBank,
        address: u16,
        values: &[bool],
    ) -> Result<(), RegisterError> {
        let id = bank.bank();
        if !id.is_client_writable() {
            return Err(RegisterError::ReadOnly(id));
        }
        check_quantity(id, values.len(), MAX_WRITE_BITS)?;
        let mut bits = write_lock(id, self.bit_lock(bank))?;
        let range = check_range(id, bits.len(), address, values.len())?;
        bits[range].copy_from_slice(values);
        trace!("{}: wrote {} values at {}", id, values.len(), address);
        Ok(())
    }

    pub fn read_registers(
        &self,
        bank: RegisterBank,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, RegisterError> {
        let id = bank.bank();
        check_quantity(id, count as usize, MAX_READ_REGISTERS)?;
        let registers = read_lock(id, self.register_lock(bank))?;
        let range = check_range(id, registers.len(), address, count as usize)?;
        Ok(registers[range].to_vec())
    }

    /// Client write to a register bank, rejected for input registers
    pub fn write_registers(
        &self,
        bank: RegisterBank,
        address: u16,
        values: &[u16],
    ) -> Result<(), RegisterError> {
        let id = bank.bank();
        if !id.is_client_writable() {
            return Err(RegisterError::ReadOnly(id));
        }
        check_quantity(id, values.len(), MAX_WRITE_REGISTERS)?;
        let mut registers = write_lock(id, self.register_lock(bank))?;
        let range = check_range(id, registers.len(), address, values.len())?;
        registers[range].copy_from_slice(values);
        trace!("{}: wrote {} values at {}", id, values.len(), address);
        Ok(())
    }

    /// Apply `(current & and_mask) | (or_mask & !and_mask)` to one holding
    /// register and return the new value
    pub fn mask_write_register(
        &self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<u16, RegisterError> {
        let id = Bank::HoldingRegisters;
        let mut registers = write_lock(id, &self.holding_registers)?;
        let range = check_range(id, registers.len(), address, 1)?;
        let slot = &mut registers[range.start];
        *slot = (*slot & and_mask) | (or_mask & !and_mask);
        Ok(*slot)
    }

    /// Write a holding register range, then read one, under a single lock
    pub fn write_read_registers(
        &self,
        write_address: u16,
        values: &[u16],
        read_address: u16,
        read_count: u16,
    ) -> Result<Vec<u16>, RegisterError> {
        let id = Bank::HoldingRegisters;
        check_quantity(id, values.len(), MAX_WR_WRITE_REGISTERS)?;
        check_quantity(id, read_count as usize, MAX_WR_READ_REGISTERS)?;
        let mut registers = write_lock(id, &self.holding_registers)?;
        let write_range = check_range(id, registers.len(), write_address, values.len())?;
        let read_range = check_range(id, registers.len(), read_address, read_count as usize)?;
        registers[write_range].copy_from_slice(values);
        Ok(registers[read_range].to_vec())
    }

    /// Internal write path for the updater, bypasses the client read-only rule
    pub fn set_input_register(&self, address: u16, value: u16) -> Result<(), RegisterError> {
        let id = Bank::InputRegisters;
        let mut registers = write_lock(id, &self.input_registers)?;
        let range = check_range(id, registers.len(), address, 1)?;
        registers[range.start] = value;
        Ok(())
    }

    /// Internal write path for discrete inputs
    pub fn set_discrete_input(&self, address: u16, value: bool) -> Result<(), RegisterError> {
        let id = Bank::DiscreteInputs;
        let mut bits = write_lock(id, &self.discrete_inputs)?;
        let range = check_range(id, bits.len(), address, 1)?;
        bits[range.start] = value;
        Ok(())
    }

    fn bit_lock(&self, bank: BitBank) -> &RwLock<Vec<bool>> {
        match bank {
            BitBank::Coils => &self.coils,
            BitBank::DiscreteInputs => &self.discrete_inputs,
        }
    }

    fn register_lock(&self, bank: RegisterBank) -> &RwLock<Vec<u16>> {
        match bank {
            RegisterBank::Holding => &self.holding_registers,
            RegisterBank::Input => &self.input_registers,
        }
    }
}

fn check_initial(bank: Bank, size: usize, len: usize) -> Result<(), ServerError> {
    if size > MAX_BANK_SIZE {
        return Err(ServerError::ConfigError(format!(
            "{} size {} exceeds the 16-bit address space ({})",
            bank, size, MAX_BANK_SIZE
        )));
    }
    if len != size {
        return Err(ServerError::ConfigError(format!(
            "{} initial values: expected {} entries, got {}",
            bank, size, len
        )));
    }
    Ok(())
}

fn check_quantity(bank: Bank, count: usize, max: u16) -> Result<(), RegisterError> {
    if count == 0 || count > max as usize {
        return Err(RegisterError::InvalidQuantity { bank, count, max });
    }
    Ok(())
}

fn check_range(
    bank: Bank,
    size: usize,
    address: u16,
    count: usize,
) -> Result<Range<usize>, RegisterError> {
    let start = address as usize;
    let end = start + count;
    if end > size {
        return Err(RegisterError::OutOfRange {
            bank,
            address,
            count,
            size,
        });
    }
    Ok(start..end)
}

fn read_lock<T>(bank: Bank, lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, RegisterError> {
    lock.read().map_err(|_| RegisterError::Poisoned(bank))
}

fn write_lock<T>(bank: Bank, lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, RegisterError> {
    lock.write().map_err(|_| RegisterError::Poisoned(bank))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn map_10() -> RegisterMap {
        RegisterMap::new(BankSizes::new(10, 10, 10, 10)).unwrap()
    }

    #[test]
    fn test_write_then_read_holding() {
        let map = map_10();
        map.write_registers(RegisterBank::Holding, 3, &[1234]).unwrap();
        assert_eq!(
            map.read_registers(RegisterBank::Holding, 3, 1).unwrap(),
            vec![1234]
        );

        map.write_registers(RegisterBank::Holding, 6, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            map.read_registers(RegisterBank::Holding, 5, 5).unwrap(),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_write_then_read_coils() {
        let map = map_10();
        map.write_bits(BitBank::Coils, 8, &[true, true]).unwrap();
        assert_eq!(
            map.read_bits(BitBank::Coils, 7, 3).unwrap(),
            vec![false, true, true]
        );
    }

    #[test]
    fn test_read_past_end_is_out_of_range() {
        let map = map_10();
        let err = map.read_registers(RegisterBank::Holding, 10, 1).unwrap_err();
        assert!(matches!(err, RegisterError::OutOfRange { size: 10, .. }));

        let err = map.read_bits(BitBank::DiscreteInputs, 9, 2).unwrap_err();
        assert!(matches!(err, RegisterError::OutOfRange { .. }));

        // top of the address space must not overflow
        let err = map.read_registers(RegisterBank::Input, u16::MAX, 125).unwrap_err();
        assert!(matches!(err, RegisterError::OutOfRange { .. }));
    }

    #[test]
    fn test_failed_write_leaves_bank_untouched() {
        let map = map_10();
        map.write_registers(RegisterBank::Holding, 0, &[7; 10]).unwrap();

        let err = map
            .write_registers(RegisterBank::Holding, 8, &[1, 2, 3])
            .unwrap_err();
        assert!(matches!(err, RegisterError::OutOfRange { .. }));
        assert_eq!(
            map.read_registers(RegisterBank::Holding, 0, 10).unwrap(),
            vec![7; 10]
        );
    }

    #[test]
    fn test_read_only_banks_reject_client_writes() {
        let map = map_10();
        assert_eq!(
            map.write_registers(RegisterBank::Input, 0, &[1]),
            Err(RegisterError::ReadOnly(Bank::InputRegisters))
        );
        assert_eq!(
            map.write_bits(BitBank::DiscreteInputs, 0, &[true]),
            Err(RegisterError::ReadOnly(Bank::DiscreteInputs))
        );
        assert_eq!(map.read_registers(RegisterBank::Input, 0, 1).unwrap(), vec![0]);
        assert_eq!(map.read_bits(BitBank::DiscreteInputs, 0, 1).unwrap(), vec![false]);
    }

    #[test]
    fn test_quantity_limits() {
        let map = RegisterMap::new(BankSizes::new(4000, 0, 400, 0)).unwrap();
        assert!(matches!(
            map.read_registers(RegisterBank::Holding, 0, 0),
            Err(RegisterError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            map.read_registers(RegisterBank::Holding, 0, 126),
            Err(RegisterError::InvalidQuantity { max: 125, .. })
        ));
        assert!(map.read_registers(RegisterBank::Holding, 0, 125).is_ok());
        assert!(matches!(
            map.write_registers(RegisterBank::Holding, 0, &[0; 124]),
            Err(RegisterError::InvalidQuantity { max: 123, .. })
        ));
        assert!(matches!(
            map.write_bits(BitBank::Coils, 0, &[]),
            Err(RegisterError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            map.read_bits(BitBank::Coils, 0, 2001),
            Err(RegisterError::InvalidQuantity { max: 2000, .. })
        ));
    }

    #[test]
    fn test_quantity_is_checked_before_range() {
        let map = map_10();
        assert!(matches!(
            map.read_registers(RegisterBank::Holding, 50, 0),
            Err(RegisterError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_mask_write() {
        let map = map_10();
        map.write_registers(RegisterBank::Holding, 4, &[0x12]).unwrap();
        // (0x12 & 0xF2) | (0x25 & !0xF2)
        assert_eq!(map.mask_write_register(4, 0xF2, 0x25).unwrap(), 0x17);
        assert_eq!(map.read_registers(RegisterBank::Holding, 4, 1).unwrap(), vec![0x17]);
        assert!(map.mask_write_register(10, 0, 0).is_err());
    }

    #[test]
    fn test_write_read_is_all_or_nothing() {
        let map = map_10();
        let read = map.write_read_registers(0, &[9, 8], 0, 3).unwrap();
        assert_eq!(read, vec![9, 8, 0]);

        // read range invalid: the write part must not be applied
        let err = map.write_read_registers(5, &[1, 1], 9, 2).unwrap_err();
        assert!(matches!(err, RegisterError::OutOfRange { .. }));
        assert_eq!(map.read_registers(RegisterBank::Holding, 5, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_internal_writes() {
        let map = map_10();
        map.set_input_register(0, 4242).unwrap();
        map.set_discrete_input(9, true).unwrap();
        assert_eq!(map.read_registers(RegisterBank::Input, 0, 1).unwrap(), vec![4242]);
        assert_eq!(map.read_bits(BitBank::DiscreteInputs, 9, 1).unwrap(), vec![true]);
        assert!(map.set_input_register(10, 1).is_err());
    }

    #[test]
    fn test_initial_state_must_match_sizes() {
        let state = InitialState {
            sizes: BankSizes::new(2, 0, 1, 0),
            coils: vec![true, false],
            discrete_inputs: vec![],
            holding_registers: vec![5, 6],
            input_registers: vec![],
        };
        let err = RegisterMap::from_initial_state(state).err().unwrap();
        assert!(err.to_string().contains("holding registers"));

        let too_big = RegisterMap::new(BankSizes::new(MAX_BANK_SIZE + 1, 0, 0, 0));
        assert!(too_big.is_err());
        assert!(RegisterMap::new(BankSizes::new(MAX_BANK_SIZE, 0, 0, 0)).is_ok());
    }

    #[test]
    fn test_concurrent_writes_are_never_torn() {
        let map = Arc::new(map_10());
        let writer = {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for v in 0..2000u16 {
                    map.write_registers(RegisterBank::Holding, 0, &[v; 10]).unwrap();
                }
            })
        };

        for _ in 0..2000 {
            let values = map.read_registers(RegisterBank::Holding, 0, 10).unwrap();
            assert!(values.iter().all(|v| *v == values[0]), "torn read: {:?}", values);
        }
        writer.join().unwrap();
        assert_eq!(
            map.read_registers(RegisterBank::Holding, 0, 10).unwrap(),
            vec![1999; 10]
        );
    }
}
