// Copyright (c) The ktest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduling core for dispatching kernel tests against a system under test.
//!
//! This crate implements the two layered schedulers at the heart of a
//! Linux kernel test-execution engine:
//!
//! - [`TestScheduler`] dispatches a batch of [`Test`]s to a [`Sut`] with
//!   bounded parallelism, enforces a per-test timeout, and aborts the batch
//!   when the kernel becomes unhealthy (tainted, panicked, or unresponsive).
//! - [`SuiteScheduler`] wraps a `TestScheduler` to run whole [`Suite`]s with
//!   an end-to-end deadline, recovering from the kernel-health errors its
//!   inner scheduler raises by rebooting the SUT and resuming with whatever
//!   tests are left.
//!
//! The [`Sut`] trait is the only external contract this crate depends on:
//! no networked or SSH-backed transport ships here. A local-process
//! reference implementation used to exercise both schedulers lives under
//! this crate's own `tests/support/` directory.

mod errors;
mod model;
mod sut;
mod suite_scheduler;
mod test_scheduler;
mod time;

pub use errors::{BuildError, ScheduleError};
pub use model::{Outcome, Suite, SuiteResult, Test, TestResult};
pub use sut::{CommandOutcome, OutputSink, PanicWatchSink, Sut, SutError, TaintInfo, PANIC_MARKER};
pub use suite_scheduler::{SuiteScheduler, SuiteSchedulerBuilder, SuiteStopHandle};
pub use test_scheduler::{StopHandle, TestScheduler, TestSchedulerBuilder};
