use crate::registers::{Bank, InitialState};
use crate::utils::error::ServerError;

use super::settings::Config;

/// Startup collaborator that yields bank sizes and initial contents.
pub trait InitialStateSource {
    fn load(&self) -> Result<InitialState, ServerError>;
}

impl InitialStateSource for Config {
    fn load(&self) -> Result<InitialState, ServerError> {
        let sizes = self.banks;
        let defaults = &self.defaults;

        check_length(Bank::Coils, sizes.coils, defaults.coils.len())?;
        check_length(Bank::DiscreteInputs, sizes.discrete_inputs, defaults.discrete_inputs.len())?;
        check_length(
            Bank::HoldingRegisters,
            sizes.holding_registers,
            defaults.holding_registers.len(),
        )?;
        check_length(
            Bank::InputRegisters,
            sizes.input_registers,
            defaults.input_registers.len(),
        )?;

        Ok(InitialState {
            sizes,
            coils: to_bits(Bank::Coils, &defaults.coils)?,
            discrete_inputs: to_bits(Bank::DiscreteInputs, &defaults.discrete_inputs)?,
            holding_registers: defaults.holding_registers.clone(),
            input_registers: defaults.input_registers.clone(),
        })
    }
}

fn check_length(bank: Bank, size: usize, given: usize) -> Result<(), ServerError> {
    if size != given {
        return Err(ServerError::ConfigError(format!(
            "defaults for {} list {} values but the bank holds {}",
            bank, given, size
        )));
    }
    Ok(())
}

fn to_bits(bank: Bank, values: &[u8]) -> Result<Vec<bool>, ServerError> {
    values
        .iter()
        .enumerate()
        .map(|(address, value)| match value {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ServerError::ConfigError(format!(
                "{} default at address {} is {}, expected 0 or 1",
                bank, address, other
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{BankSizes, RegisterBank, RegisterMap};

    #[test]
    fn test_default_config_loads() {
        let state = Config::default().load().unwrap();
        assert_eq!(state.sizes, BankSizes::new(10, 10, 10, 10));
        assert_eq!(&state.coils[..3], &[true, false, true]);
        assert!(state.discrete_inputs[1]);

        let map = RegisterMap::from_initial_state(state).unwrap();
        assert_eq!(
            map.read_registers(RegisterBank::Holding, 0, 3).unwrap(),
            vec![100, 200, 300]
        );
    }

    #[test]
    fn test_length_mismatch() {
        let mut config = Config::default();
        config.defaults.holding_registers.pop();
        let err = config.load().unwrap_err();
        assert!(err.to_string().contains("holding registers"));
    }

    #[test]
    fn test_bits_must_be_zero_or_one() {
        let mut config = Config::default();
        config.defaults.discrete_inputs[4] = 2;
        assert!(matches!(config.load(), Err(ServerError::ConfigError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[banks]
coils = 1
discrete_inputs = 2
holding_registers = 0
input_registers = 1

[defaults]
coils = [1]
discrete_inputs = [0, 1]
holding_registers = []
input_registers = [42]
"#,
        )
        .unwrap();

        let state = Config::from_file(&path).unwrap().load().unwrap();
        assert_eq!(state.coils, vec![true]);
        assert_eq!(state.discrete_inputs, vec![false, true]);
        assert!(state.holding_registers.is_empty());
        assert_eq!(state.input_registers, vec![42]);
    }
}
