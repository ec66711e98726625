//! Error types for Tula

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Tula error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file serialization error
    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    /// Parameter store (de)serialization error
    #[error("Parameter store error: {0}")]
    Store(#[from] serde_json::Error),

    /// Sensor returned no usable reading this tick
    #[error("Sensor fault: {0}")]
    SensorFault(String),

    /// Motor sink rejected a command
    #[error("Motor fault: {0}")]
    MotorFault(String),

    /// Unknown rig name in config
    #[error("Unknown rig: {0}")]
    UnknownRig(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
