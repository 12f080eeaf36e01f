pub mod ramp;
pub mod random;
pub mod script;
pub mod traits;

pub use ramp::RampSensor;
pub use random::RandomSensor;
pub use script::ScriptSensor;
pub use traits::SensorSource;

use log::info;
use std::sync::Arc;

use crate::config::SensorConfig;
use crate::utils::error::ServerError;

/// Build the sensor described by the `[updater.sensor]` table
pub fn from_config(config: &SensorConfig) -> Result<Arc<dyn SensorSource>, ServerError> {
    let sensor: Arc<dyn SensorSource> = match config {
        SensorConfig::Script { program, args } => {
            Arc::new(ScriptSensor::new(program.as_str(), args.clone()))
        }
        SensorConfig::Ramp {
            start,
            step,
            min,
            max,
        } => Arc::new(RampSensor::new(*start, *step, *min, *max)?),
        SensorConfig::Random { min, max } => Arc::new(RandomSensor::new(*min, *max)?),
    };

    info!(
        "🌡️  Sensor source: {} ({})",
        sensor.name(),
        sensor.sensor_type()
    );
    Ok(sensor)
}
