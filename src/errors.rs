use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("DATA_UNAVAILABLE: {0}")]
    DataUnavailable(String),
    #[error("INSUFFICIENT_DATA: {0}")]
    InsufficientData(String),
    #[error("MISSING_FIELD: {0}")]
    MissingCriticalField(String),
    #[error("PERSISTENCE_FAILURE: {0}")]
    Persistence(String),
    #[error("MODEL_FITTING: {0}")]
    ModelFitting(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::DataUnavailable(value.to_string())
    }
}

impl From<ureq::Error> for AppError {
    fn from(value: ureq::Error) -> Self {
        Self::DataUnavailable(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
