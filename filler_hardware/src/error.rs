use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("scale disconnected")]
    Disconnected,
    #[error("scale timeout")]
    Timeout,
    #[error("reading {0} outside sensor range")]
    OutOfRange(f32),
    #[error("valve: {0}")]
    Actuator(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
