use thiserror::Error;

/// Failures raised by the import engine.
///
/// `Shape` aborts job creation before anything is written. `Validation` and
/// `Admission` are attached to a single row; the batch carries on.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{}", .0.join("; "))]
    Shape(Vec<String>),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Admission(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Shape(_) => "shape_error",
            Self::Validation(_) => "validation_error",
            Self::Admission(_) => "admission_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Db(_) => "db_error",
            Self::Payload(_) => "payload_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
