// Copyright (c) The ktest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A small stopwatch for timing test execution.
//!
//! We track both a realtime clock (for tracing events — "this test started
//! at ...") and a monotonic clock (for the actual `exec_time` that ends up
//! in a `TestResult`), the same split nextest's own test runner keeps.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

/// A started stopwatch; call [`Stopwatch::elapsed`] to read it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Stopwatch {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl Stopwatch {
    pub(crate) fn start() -> Self {
        Self {
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    /// Wall-clock time elapsed since `start()`, via the monotonic clock.
    pub(crate) fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }

    /// The realtime instant this stopwatch was started at, for log lines.
    pub(crate) fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }
}
