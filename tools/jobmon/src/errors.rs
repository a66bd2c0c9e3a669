use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("stop requested")]
    Stopped,
    #[error("io error: {0}")]
    Io(String),
    #[error("terminal error: {0}")]
    Terminal(String),
    #[error("signal error: {0}")]
    Signal(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("{0}")]
    Worker(String),
}

impl MonitorError {
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
