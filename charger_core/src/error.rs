use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ChargerError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("battery sensor unreachable: {0}")]
    BatterySensor(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("supervisor link error: {0}")]
    Link(String),
    #[error("loop iteration exceeded {0} ms")]
    IterationOverrun(u64),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing battery monitor")]
    MissingBatteryMonitor,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
