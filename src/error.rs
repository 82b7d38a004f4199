use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Fetch(String),

    #[error("The AI model returned an invalid data format: {0}")]
    Format(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Stored analysis could not be decoded: {0}")]
    Decode(String),

    #[error("No signed-in session for this user")]
    NotSignedIn,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("Sign-in failed: {0}")]
    Provider(String),

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for PersistenceError {
    fn from(err: StorageError) -> Self {
        PersistenceError::Backend(err.to_string())
    }
}

impl From<reqwest::Error> for PersistenceError {
    fn from(err: reqwest::Error) -> Self {
        PersistenceError::Backend(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("{field} must be a number")]
    NotANumber { field: &'static str },

    #[error("{field} must not be negative")]
    Negative { field: &'static str },

    #[error("{field} must be at least one year")]
    ZeroTerm { field: &'static str },

    #[error("{field} is required")]
    Empty { field: &'static str },
}
