use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Packet capture error: {0}")]
    PacketCapture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Capture pipeline stopped before it became ready")]
    PipelineNotReady,

    #[error("Task error: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
