//! Error types for settlement validation

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Authentication failed for '{username}': {reason}")]
    Auth { username: String, reason: String },

    #[error("Logout failed: {0}")]
    Logout(String),

    #[error("Section '{0}' did not become visible")]
    SectionNotVisible(String),

    #[error("{0}")]
    RowNotFound(String),

    #[error("{entity} creation failed: {message}")]
    BackendRejected { entity: String, message: String },

    #[error("Timed out after {waited_ms} ms ({ticks} polls) waiting for {label}; last seen: {last_seen}")]
    ConvergenceTimeout {
        label: String,
        waited_ms: u64,
        ticks: u32,
        last_seen: String,
    },

    #[error("{0}")]
    InvariantViolation(String),

    #[error("Screenshot failed: {0}")]
    ArtifactCapture(String),

    #[error("Setup failed: {0}")]
    FatalSetup(String),

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install chromium")]
    DriverNotFound,

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl E2eError {
    pub fn invariant(message: impl Into<String>) -> Self {
        E2eError::InvariantViolation(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, E2eError::ConvergenceTimeout { .. })
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
