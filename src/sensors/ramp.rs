use std::sync::Mutex;

use super::traits::SensorSource;
use crate::utils::error::ServerError;

/// Sawtooth signal: `start`, `start + step`, ... wrapping from above `max`
/// back to `min`.
pub struct RampSensor {
    next: Mutex<u16>,
    step: u16,
    min: u16,
    max: u16,
}

impl RampSensor {
    pub fn new(start: u16, step: u16, min: u16, max: u16) -> Result<Self, ServerError> {
        if min > max || !(min..=max).contains(&start) {
            return Err(ServerError::ConfigError(format!(
                "ramp sensor needs min <= start <= max, got {} <= {} <= {}",
                min, start, max
            )));
        }
        Ok(Self {
            next: Mutex::new(start),
            step,
            min,
            max,
        })
    }
}

impl SensorSource for RampSensor {
    fn sensor_type(&self) -> &str {
        "ramp"
    }

    fn name(&self) -> &str {
        "ramp"
    }

    fn next_value(&self) -> Result<u16, ServerError> {
        let mut next = self.next.lock().map_err(|_| ServerError::LockError)?;
        let value = *next;
        let advanced = value as u32 + self.step as u32;
        *next = if advanced > self.max as u32 {
            self.min
        } else {
            advanced as u16
        };
        Ok(value)
    }
}
