// Copyright (c) The ktest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The error taxonomy schedulers raise, as distinct from the per-test
//! outcomes recorded silently in results.

use crate::sut::SutError;
use thiserror::Error;

/// Kernel-health and control-flow failures surfaced by
/// [`TestScheduler::schedule`](crate::TestScheduler::schedule) and absorbed
/// (for the first three variants) by
/// [`SuiteScheduler::schedule`](crate::SuiteScheduler::schedule).
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The post-test taint mask differs from the baseline captured at the
    /// start of this `schedule()` call.
    #[error(
        "kernel became tainted during test `{test}` (baseline {baseline:#x}, now {current:#x}): {}",
        .reasons.join(", ")
    )]
    KernelTainted {
        /// The test whose completion triggered the taint check.
        test: String,
        /// The taint mask captured before dispatch began.
        baseline: u64,
        /// The taint mask observed after the test completed.
        current: u64,
        /// Human-readable reasons reported by the SUT.
        reasons: Vec<String>,
    },

    /// The panic marker was observed in a test's stdout.
    #[error("kernel panic detected during test `{test}`")]
    KernelPanic {
        /// The test whose output contained the panic marker.
        test: String,
    },

    /// The SUT transport itself reported a timeout (the SUT is
    /// unresponsive), as distinct from a single test exceeding its own
    /// per-test deadline.
    #[error("SUT became unresponsive running test `{test:?}`")]
    KernelTimeout {
        /// The test in flight when the transport timed out, if known.
        test: Option<String>,
    },

    /// `schedule()` was interrupted by an external `stop()` call or, for a
    /// suite, by the suite deadline firing. Distinguished from the
    /// kernel-health variants above because it is never absorbed into the
    /// reboot-and-resume state machine: it always propagates to the direct
    /// caller.
    #[error("scheduling was cancelled")]
    Cancelled,

    /// Any other SUT transport failure.
    #[error(transparent)]
    Sut(#[from] SutError),
}

/// Validation failures from [`crate::TestSchedulerBuilder::build`] or
/// [`crate::SuiteSchedulerBuilder::build`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// `max_workers` was zero; at least one worker is required.
    #[error("max_workers must be at least 1")]
    ZeroWorkers,
}

impl ScheduleError {
    /// Whether this is one of the three kernel-health kinds a
    /// [`SuiteScheduler`](crate::SuiteScheduler) absorbs into a reboot,
    /// rather than propagating.
    pub fn is_kernel_health(&self) -> bool {
        matches!(
            self,
            Self::KernelTainted { .. } | Self::KernelPanic { .. } | Self::KernelTimeout { .. }
        )
    }
}
