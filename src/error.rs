//! # Error Module
//!
//! Error taxonomy for request handlers plus the application-level error
//! handler hook.
//!
//! Handlers return `Result<Reply, HandlerError>`. An `Err` never reaches the
//! socket directly: the dispatcher passes it through the app's
//! [`ErrorHandler`], which decides the status and body. The default handler
//! responds with the error's status and its `Display` text; applications may
//! install their own (for example a fixed `500` with a prefixed message).

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::dispatcher::{Reply, RequestCtx};

/// Errors a handler can surface.
///
/// `From<&str>` and `From<String>` map onto [`HandlerError::Message`], so a
/// handler can fail with `Err("duar".into())`.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Error with an explicit response status.
    #[error("{message}")]
    Custom { status: u16, message: String },
    /// Plain application error text, reported as a 500.
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Template(#[from] minijinja::Error),
    /// Malformed or missing multipart content.
    #[error("{0}")]
    Multipart(String),
    /// Internal failure (for example a recovered handler panic).
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    /// Error with an explicit response status code.
    pub fn custom(status: u16, message: impl Into<String>) -> Self {
        HandlerError::Custom {
            status,
            message: message.into(),
        }
    }

    /// Response status this error maps to. Everything except
    /// [`HandlerError::Custom`] is a 500.
    pub fn status(&self) -> u16 {
        match self {
            HandlerError::Custom { status, .. } => *status,
            _ => 500,
        }
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Message(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Message(msg)
    }
}

/// Maps a handler error to the reply sent to the client.
///
/// Runs inside the handler coroutine, after the handler has failed and before
/// `after` middleware.
pub type ErrorHandler = Arc<dyn Fn(&RequestCtx, &HandlerError) -> Reply + Send + Sync>;

/// Default error mapping: the error's status with its text as a plain body.
pub fn default_error_handler() -> ErrorHandler {
    Arc::new(|_ctx, err| Reply::text(err.to_string()).with_status(err.status()))
}
