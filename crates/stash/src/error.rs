// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// An error from a cache backend.
///
/// Backend errors are never fatal for the command a cache serves; the owning cache
/// logs them and degrades to a miss (on get) or reports `false` (on put).
#[derive(Debug, thiserror::Error)]
#[error("cache backend error: {message}")]
pub struct StoreError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    /// Creates an error with a message and no underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying cause.
    pub fn caused_by(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}
