//! Error handling for drawbot-rs
//!
//! This module defines the crate-wide error type and a Result alias.
//! Errors raised inside tasks are never thrown across a worker boundary;
//! the task monitor captures them and publishes them as status.

use thiserror::Error;

/// Main error type for drawbot-rs operations
#[derive(Error, Debug)]
pub enum DrawbotError {
    /// A worker context refused or lost a unit of work
    #[error("Worker error: {0}")]
    Worker(String),

    /// A computation failed inside a task stage
    #[error("Task error: {0}")]
    Task(String),

    /// Device I/O failed
    #[error("Device error on {device}: {message}")]
    Device { device: String, message: String },

    /// An operation needed a device but none is selected
    #[error("No output device selected")]
    DeviceNotSelected,

    /// Manual jog control was used out of sequence
    #[error("Manual mode error: {0}")]
    ManualMode(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to image decoding
    #[error("Image error: {0}")]
    Image(String),

    /// Errors related to export compilation or sinks
    #[error("Export error: {0}")]
    Export(String),

    /// The task was cancelled before it could finish
    #[error("Task cancelled")]
    Cancelled,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DrawbotError>,
    },
}

impl DrawbotError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DrawbotError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a device error for the named channel
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        DrawbotError::Device {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Whether this error (or the error it wraps) is a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            DrawbotError::Cancelled => true,
            DrawbotError::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Result type alias for drawbot-rs operations
pub type Result<T> = std::result::Result<T, DrawbotError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| DrawbotError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DrawbotError::from(e).with_context(f()))
    }
}
