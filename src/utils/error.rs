use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Invalid frame: {0}")]
    FrameError(String),

    #[error("Listener failure: {0}")]
    ListenerError(String),

    #[error("Sensor error: {0}")]
    SensorError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Lock acquisition failed")]
    LockError,
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::CommunicationError(format!("IO error: {}", err))
    }
}

impl From<toml::de::Error> for ServerError {
    fn from(err: toml::de::Error) -> Self {
        ServerError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for ServerError {
    fn from(err: toml::ser::Error) -> Self {
        ServerError::ConfigError(format!("TOML serialization error: {}", err))
    }
}

impl From<crate::registers::RegisterError> for ServerError {
    fn from(err: crate::registers::RegisterError) -> Self {
        ServerError::InvalidData(format!("Register map: {}", err))
    }
}
