// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Error returned by [`Timeout`][crate::Timeout] when the deadline is reached before
/// the inner future completes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("future timed out after {timeout:?}")]
pub struct Elapsed {
    timeout: Duration,
}

impl Elapsed {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The deadline that was exceeded.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_duration() {
        let elapsed = Elapsed::new(Duration::from_millis(200));
        assert_eq!(elapsed.to_string(), "future timed out after 200ms");
        assert_eq!(elapsed.timeout(), Duration::from_millis(200));
    }
}
