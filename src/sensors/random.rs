use rand::Rng;

use super::traits::SensorSource;
use crate::utils::error::ServerError;

/// Uniformly distributed readings in `[min, max]`
pub struct RandomSensor {
    min: u16,
    max: u16,
}

impl RandomSensor {
    pub fn new(min: u16, max: u16) -> Result<Self, ServerError> {
        if min > max {
            return Err(ServerError::ConfigError(format!(
                "random sensor needs min <= max, got {} > {}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }
}

impl SensorSource for RandomSensor {
    fn sensor_type(&self) -> &str {
        "random"
    }

    fn name(&self) -> &str {
        "random"
    }

    fn next_value(&self) -> Result<u16, ServerError> {
        Ok(rand::thread_rng().gen_range(self.min..=self.max))
    }
}
