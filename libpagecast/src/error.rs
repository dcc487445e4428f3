//! Error types for Pagecast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PagecastError>;

#[derive(Error, Debug)]
pub enum PagecastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Scheduling conflict: {0}")]
    Conflict(String),
}

impl PagecastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PagecastError::Validation(_) | PagecastError::Conflict(_) => 3,
            PagecastError::Credential(_) => 2,
            PagecastError::Api(_) => 1,
            PagecastError::Config(_) => 1,
            PagecastError::Database(_) => 1,
        }
    }

    /// Whether a publish attempt that hit this error should re-enter the
    /// retry/backoff state machine. Validation and conflict errors are
    /// synchronous caller mistakes and are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PagecastError::Api(_) | PagecastError::Credential(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    #[error("No credential stored for {0}")]
    Missing(String),

    #[error("Credential for {0} has expired")]
    Expired(String),

    #[error("Cipher failure: {0}")]
    Cipher(String),

    #[error("Stored credential payload is malformed: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Remote API error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected API response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for PagecastError {
    fn from(err: reqwest::Error) -> Self {
        PagecastError::Api(ApiError::Transport(err.to_string()))
    }
}
