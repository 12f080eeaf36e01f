use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::registers::RegisterMap;
use crate::sensors::SensorSource;
use crate::utils::error::ServerError;

/// Periodically stores a fresh sensor reading in one input register.
///
/// Runs beside the connection multiplexer and shares the register map with
/// it; the map's own locking keeps readers from seeing a partial update.
pub struct BackgroundUpdater {
    map: Arc<RegisterMap>,
    sensor: Arc<dyn SensorSource>,
    period: Duration,
    register: u16,
    sensor_timeout: Duration,
}

impl BackgroundUpdater {
    /// The sensor deadline defaults to one period
    pub fn new(map: Arc<RegisterMap>, sensor: Arc<dyn SensorSource>, period: Duration) -> Self {
        Self {
            map,
            sensor,
            period,
            register: 0,
            sensor_timeout: period,
        }
    }

    pub fn with_register(mut self, register: u16) -> Self {
        self.register = register;
        self
    }

    pub fn with_sensor_timeout(mut self, sensor_timeout: Duration) -> Self {
        self.sensor_timeout = sensor_timeout;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One cycle on the calling thread: read the sensor, store the value
    pub fn tick(&self) -> Result<u16, ServerError> {
        self.store(self.sensor.next_value())
    }

    /// One cycle with the sensor call on the blocking pool, bounded by the
    /// sensor deadline. A late reading is discarded, never stored.
    pub async fn tick_async(&self) -> Result<u16, ServerError> {
        let sensor = Arc::clone(&self.sensor);
        let task = tokio::task::spawn_blocking(move || sensor.next_value());

        let reading = match timeout(self.sensor_timeout, task).await {
            Ok(Ok(reading)) => reading,
            Ok(Err(e)) => Err(ServerError::SensorError(format!("sensor task failed: {}", e))),
            Err(_) => Err(ServerError::SensorError(format!(
                "{} gave no reading within {:?}",
                self.sensor.name(),
                self.sensor_timeout
            ))),
        };
        self.store(reading)
    }

    fn store(&self, reading: Result<u16, ServerError>) -> Result<u16, ServerError> {
        let value = reading?;
        self.map.set_input_register(self.register, value)?;
        debug!("Input register {} <- {}", self.register, value);
        Ok(value)
    }

    /// Sleep, compute, write; forever. A failed reading skips that cycle.
    pub async fn run(self) {
        info!(
            "⏱️  Updating input register {} from {} every {:?}",
            self.register,
            self.sensor.name(),
            self.period
        );

        loop {
            sleep(self.period).await;

            match self.tick_async().await {
                Ok(_) => {}
                Err(ServerError::SensorError(e)) => warn!("⚠️  Sensor reading skipped: {}", e),
                Err(e) => error!("❌ Failed to store sensor value: {}", e),
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
