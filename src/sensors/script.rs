use log::debug;
use std::path::PathBuf;
use std::process::Command;

use super::traits::SensorSource;
use crate::utils::error::ServerError;

/// Runs an external program per reading and parses its standard output.
pub struct ScriptSensor {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl ScriptSensor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            name: program.display().to_string(),
            program,
            args,
        }
    }
}

impl SensorSource for ScriptSensor {
    fn sensor_type(&self) -> &str {
        "script"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn next_value(&self) -> Result<u16, ServerError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| ServerError::SensorError(format!("failed to run {}: {}", self.name, e)))?;

        if !output.status.success() {
            return Err(ServerError::SensorError(format!(
                "{} exited with {}: {}",
                self.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("Sensor script {} printed {:?}", self.name, stdout.trim());
        parse_reading(stdout.trim())
    }
}

/// Parse a numeric reading; the fractional part is dropped.
pub fn parse_reading(text: &str) -> Result<u16, ServerError> {
    let value: f64 = text
        .parse()
        .map_err(|_| ServerError::SensorError(format!("not a number: {:?}", text)))?;

    if !value.is_finite() || value < 0.0 || value >= 65536.0 {
        return Err(ServerError::SensorError(format!(
            "reading {} does not fit in a 16-bit register",
            value
        )));
    }

    Ok(value.trunc() as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading("42").unwrap(), 42);
        assert_eq!(parse_reading("65535").unwrap(), 65535);
        assert_eq!(parse_reading("12.9").unwrap(), 12);
        assert!(parse_reading("65536").is_err());
        assert!(parse_reading("-1").is_err());
        assert!(parse_reading("NaN").is_err());
        assert!(parse_reading("").is_err());
        assert!(parse_reading("fourty-two").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_script_output_is_used() {
        let sensor = ScriptSensor::new("sh", vec!["-c".to_string(), "echo ' 321 '".to_string()]);
        assert_eq!(sensor.next_value().unwrap(), 321);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_script_is_an_error() {
        let sensor = ScriptSensor::new("sh", vec!["-c".to_string(), "exit 3".to_string()]);
        assert!(matches!(sensor.next_value(), Err(ServerError::SensorError(_))));

        let missing = ScriptSensor::new("/nonexistent/sensor-script", Vec::new());
        assert!(missing.next_value().is_err());
    }
}
