//! Error types for the reader engine

use std::sync::Arc;

use thiserror::Error;

/// Engine-wide result type
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Callback receiving short, human-readable failure messages for the UI layer
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Engine error type
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Renderer is not mounted")]
    RendererUnavailable,

    #[error("Renderer error: {0}")]
    Renderer(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Access token rejected")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Range already highlighted: {0}")]
    DuplicateRange(String),

    #[error("Cannot resolve range: {0}")]
    Resolution(String),

    #[error("Markup error: {0}")]
    Markup(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("No text found on the current screen")]
    NoText,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReaderError {
    /// Message safe to show to a reader. Technical detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            ReaderError::RendererUnavailable => "The book is not open yet",
            ReaderError::Renderer(_) | ReaderError::Navigation(_) => {
                "Could not move to that location"
            }
            ReaderError::Persistence(_) => "Could not reach the server, please try again",
            ReaderError::Unauthorized => "Your session has expired, please sign in again",
            ReaderError::NotFound(_) => "That item no longer exists",
            ReaderError::DuplicateRange(_) => "That passage is already highlighted",
            ReaderError::Resolution(_) | ReaderError::Markup(_) => {
                "Part of the book could not be read"
            }
            ReaderError::Settings(_) | ReaderError::Io(_) | ReaderError::Json(_) => {
                "Could not save your reading preferences"
            }
            ReaderError::Speech(_) => "Speech playback failed",
            ReaderError::NoText => "No text found on this page",
        }
    }
}

impl From<quick_xml::Error> for ReaderError {
    fn from(err: quick_xml::Error) -> Self {
        ReaderError::Markup(err.to_string())
    }
}

/// Log the technical error and hand the readable message to the callback.
pub(crate) fn report(on_error: &ErrorCallback, context: &str, err: &ReaderError) {
    tracing::error!(error = %err, "{}", context);
    on_error(err.user_message());
}

/// Error callback that only logs, for sessions without a UI attached.
pub fn log_only() -> ErrorCallback {
    Arc::new(|message: &str| tracing::warn!("Unhandled reader error: {}", message))
}
