// Copyright (c) The ktest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs whole suites with an end-to-end deadline, absorbing kernel-health
//! failures from the inner [`TestScheduler`] into SUT reboots and resumed
//! dispatch.

use crate::errors::{BuildError, ScheduleError};
use crate::model::{Outcome, Suite, SuiteResult, Test, TestResult};
use crate::sut::Sut;
use crate::test_scheduler::{TestScheduler, TestSchedulerBuilder};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

fn skipped_result(test: Test, elapsed_slice: Duration) -> TestResult {
    TestResult::new(test, Outcome::Skipped, 0, elapsed_slice, -1, String::new())
}

/// Builds a [`SuiteScheduler`].
pub struct SuiteSchedulerBuilder<S> {
    sut: Arc<S>,
    suite_timeout: Duration,
    exec_timeout: Duration,
    max_workers: usize,
}

impl<S: Sut + 'static> SuiteSchedulerBuilder<S> {
    /// Starts a builder for the given SUT, defaulting to a one-hour suite
    /// deadline, a one-hour per-test timeout, and a single worker.
    pub fn new(sut: Arc<S>) -> Self {
        Self {
            sut,
            suite_timeout: Duration::from_secs(3600),
            exec_timeout: Duration::from_secs(3600),
            max_workers: 1,
        }
    }

    /// Sets the end-to-end deadline for a whole `schedule(suites)` call.
    #[must_use]
    pub fn suite_timeout(mut self, suite_timeout: Duration) -> Self {
        self.suite_timeout = suite_timeout;
        self
    }

    /// Sets the per-test timeout forwarded to the inner [`TestScheduler`].
    #[must_use]
    pub fn exec_timeout(mut self, exec_timeout: Duration) -> Self {
        self.exec_timeout = exec_timeout;
        self
    }

    /// Sets the maximum number of tests the inner scheduler dispatches
    /// concurrently.
    #[must_use]
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Builds the scheduler, rejecting a `max_workers` of zero.
    pub fn build(self) -> Result<SuiteScheduler<S>, BuildError> {
        let inner = TestSchedulerBuilder::new(Arc::clone(&self.sut))
            .timeout(self.exec_timeout)
            .max_workers(self.max_workers)
            .build()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(SuiteScheduler {
            sut: self.sut,
            suite_timeout: self.suite_timeout,
            inner,
            results: Vec::new(),
            rebooted: 0,
            last_reboot_at: None,
            stop_tx,
            stop_rx,
        })
    }
}

/// Runs whole [`Suite`]s against a SUT, recovering from kernel-health
/// failures raised by the inner [`TestScheduler`] with reboot-and-resume.
pub struct SuiteScheduler<S> {
    sut: Arc<S>,
    suite_timeout: Duration,
    inner: TestScheduler<S>,
    results: Vec<SuiteResult>,
    rebooted: u32,
    last_reboot_at: Option<DateTime<Local>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl<S: Sut + 'static> SuiteScheduler<S> {
    /// Requests cooperative cancellation: stops the inner scheduler and
    /// returns without running additional suites. Never reboots the SUT.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        self.inner.stop();
    }

    /// A cloneable handle that can request cancellation independently of
    /// this scheduler's borrow; obtain it before calling `schedule` if you
    /// need to `stop()` from another task while it is running.
    pub fn stop_handle(&self) -> SuiteStopHandle {
        SuiteStopHandle {
            tx: self.stop_tx.clone(),
            inner: self.inner.stop_handle(),
        }
    }

    /// One [`SuiteResult`] per input suite processed so far, in order.
    pub fn results(&self) -> &[SuiteResult] {
        &self.results
    }

    /// The number of kernel-health events that triggered a SUT reboot
    /// during the run.
    pub fn rebooted(&self) -> u32 {
        self.rebooted
    }

    async fn restart_sut(&mut self) -> Result<(), ScheduleError> {
        info!(rebooted = self.rebooted + 1, "rebooting the SUT");
        self.inner.stop();
        self.sut.stop().await?;
        self.sut.communicate().await?;
        self.rebooted += 1;
        self.last_reboot_at = Some(Local::now());
        Ok(())
    }

    /// The realtime instant of the most recent reboot, if any.
    pub fn last_reboot_at(&self) -> Option<DateTime<Local>> {
        self.last_reboot_at
    }

    /// Runs each suite in order, producing one [`SuiteResult`] per input
    /// suite on normal completion (including when the suite deadline
    /// fires — the remaining tests of every not-yet-finished suite are
    /// recorded skipped rather than dispatched).
    #[instrument(skip(self, suites), fields(count = suites.len()))]
    pub async fn schedule(&mut self, suites: &[Suite]) -> Result<(), ScheduleError> {
        let _ = self.stop_tx.send(false);
        self.results.clear();
        self.rebooted = 0;

        let schedule_start = Instant::now();
        let deadline = schedule_start + self.suite_timeout;
        let mut stop_rx = self.stop_rx.clone();

        for suite in suites {
            if *stop_rx.borrow() {
                return Err(ScheduleError::Cancelled);
            }

            if Instant::now() >= deadline {
                let elapsed = schedule_start.elapsed();
                let skipped = suite
                    .tests()
                    .iter()
                    .cloned()
                    .map(|t| skipped_result(t, elapsed))
                    .collect();
                self.results.push(SuiteResult::new(suite.clone(), skipped));
                continue;
            }

            // `slots[i]` holds the result for `suite.tests()[i]` once known.
            // `pending` is the subset of original suite indices still
            // unresolved, in suite order. A kernel-health event can be
            // raised by a test completing at *any* pending index once
            // `max_workers > 1` lets tests finish out of dispatch order, so
            // retirement is tracked by index rather than by the length of a
            // contiguous completed prefix.
            let mut slots: Vec<Option<TestResult>> = vec![None; suite.tests().len()];
            let mut pending: Vec<usize> = (0..suite.tests().len()).collect();

            loop {
                if *stop_rx.borrow() {
                    let accumulated = slots.into_iter().flatten().collect();
                    self.results.push(SuiteResult::new(suite.clone(), accumulated));
                    return Err(ScheduleError::Cancelled);
                }

                if pending.is_empty() {
                    break;
                }

                if Instant::now() >= deadline {
                    let elapsed = schedule_start.elapsed();
                    for &idx in &pending {
                        slots[idx] = Some(skipped_result(suite.tests()[idx].clone(), elapsed));
                    }
                    pending.clear();
                    break;
                }

                let batch: Vec<Test> = pending.iter().map(|&idx| suite.tests()[idx].clone()).collect();

                tokio::select! {
                    outcome = self.inner.schedule(&batch) => {
                        match outcome {
                            Ok(()) => {
                                for (local, result) in self.inner.results().into_iter().enumerate() {
                                    slots[pending[local]] = Some(result);
                                }
                                pending.clear();
                            }
                            Err(ScheduleError::Cancelled) => {
                                for (local, result) in self.inner.results_sparse().into_iter().enumerate() {
                                    if let Some(result) = result {
                                        slots[pending[local]] = Some(result);
                                    }
                                }
                                let accumulated = slots.into_iter().flatten().collect();
                                self.results.push(SuiteResult::new(suite.clone(), accumulated));
                                return Err(ScheduleError::Cancelled);
                            }
                            Err(err) if err.is_kernel_health() => {
                                warn!(suite = suite.name(), error = %err, "kernel-health event, rebooting");
                                for (local, result) in self.inner.results_sparse().into_iter().enumerate() {
                                    if let Some(result) = result {
                                        slots[pending[local]] = Some(result);
                                    }
                                }
                                pending.retain(|&idx| slots[idx].is_none());
                                self.restart_sut().await?;
                            }
                            Err(other) => return Err(other),
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        // The `inner.schedule` branch above is dropped here. Its
                        // partial results survive in `inner`'s own result slots
                        // (written synchronously before each await point), so
                        // whatever completed before the drop is still visible,
                        // wherever in the batch it landed.
                        self.inner.stop();
                        for (local, result) in self.inner.results_sparse().into_iter().enumerate() {
                            if let Some(result) = result {
                                slots[pending[local]] = Some(result);
                            }
                        }
                        let elapsed = schedule_start.elapsed();
                        for &idx in &pending {
                            if slots[idx].is_none() {
                                slots[idx] = Some(skipped_result(suite.tests()[idx].clone(), elapsed));
                            }
                        }
                        pending.clear();
                    }
                }
            }

            let accumulated = slots
                .into_iter()
                .map(|slot| slot.expect("every pending index is resolved before the suite loop exits"))
                .collect();
            self.results.push(SuiteResult::new(suite.clone(), accumulated));
        }

        Ok(())
    }
}

/// A cloneable cancellation trigger for a [`SuiteScheduler`], obtained via
/// [`SuiteScheduler::stop_handle`]. Stops both the suite-level control loop
/// and, transitively, the inner [`TestScheduler`](crate::TestScheduler).
#[derive(Clone)]
pub struct SuiteStopHandle {
    tx: watch::Sender<bool>,
    inner: crate::test_scheduler::StopHandle,
}

impl SuiteStopHandle {
    /// Requests cooperative cancellation, identically to
    /// [`SuiteScheduler::stop`].
    pub fn stop(&self) {
        let _ = self.tx.send(true);
        self.inner.stop();
    }
}
