use crate::utils::error::ServerError;

/// Produces the next value of the simulated sensor.
///
/// Called once per updater tick from a blocking thread; implementations must
/// not touch the register map, the updater performs the write.
pub trait SensorSource: Send + Sync {
    fn sensor_type(&self) -> &str;
    fn name(&self) -> &str;
    fn next_value(&self) -> Result<u16, ServerError>;
}
