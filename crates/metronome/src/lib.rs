// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Primitives to interact with and manipulate machine time.
//!
//! # Why?
//!
//! Working with time is notoriously difficult to test and control. This crate provides a
//! [`Clock`] that code depends on instead of calling time functions directly, enabling
//! complete control over the flow of time in tests while adding near-zero overhead in
//! production.
//!
//! # Overview
//!
//! - [`Clock`] - Retrieves the current time and creates time primitives.
//! - [`Delay`] - A future that completes after a duration has elapsed.
//! - [`Timeout`] - A future that races an inner future against a deadline.
//! - [`Stopwatch`] - Measures elapsed time.
//! - [`ClockControl`] - Controls the flow of time in tests.
//!
//! # Testing
//!
//! In tests, construct a clock from a [`ClockControl`] and advance time manually. All
//! delays, timeouts, and elapsed-time measurements observe the controlled time, so tests
//! never sleep on the wall clock:
//!
//! ```
//! use std::time::Duration;
//!
//! use metronome::ClockControl;
//!
//! let control = ClockControl::new();
//! let clock = control.to_clock();
//!
//! let start = clock.instant();
//! control.advance(Duration::from_secs(5));
//!
//! assert_eq!(clock.instant().duration_since(start), Duration::from_secs(5));
//! ```

mod clock;
mod control;
mod delay;
mod error;
mod stopwatch;
mod timeout;
mod timers;

pub use clock::Clock;
pub use control::ClockControl;
pub use delay::Delay;
pub use error::Elapsed;
pub use stopwatch::Stopwatch;
pub use timeout::Timeout;

pub(crate) use timers::{TimerKey, Timers};
