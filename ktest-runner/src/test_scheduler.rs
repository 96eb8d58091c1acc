// Copyright (c) The ktest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatches a batch of tests against a SUT with bounded parallelism.

use crate::errors::{BuildError, ScheduleError};
use crate::model::{Outcome, Test, TestResult};
use crate::sut::{OutputSink, PanicWatchSink, Sut, SutError};
use crate::time::Stopwatch;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

/// What a single dispatched test's worker task concluded with.
enum WorkerOutcome {
    /// Ran to a natural exit; classification (passed/failed) is decided by
    /// the caller from the return code.
    Completed(TestResult),
    /// The panic marker was seen in the test's stdout.
    Panic(TestResult),
    /// The scheduler's own per-test deadline elapsed before `run_command` did.
    TestTimeout(TestResult),
    /// The SUT transport itself reported the SUT unresponsive. The test is
    /// still recorded broken (whatever was captured before the transport
    /// gave up) so the batch makes forward progress across a reboot.
    KernelTimeout(TestResult),
    /// Any other transport failure.
    Sut(SutError),
}

async fn run_one<S: Sut>(
    sut: Arc<S>,
    test: Test,
    timeout: Duration,
    cancel: watch::Receiver<bool>,
) -> WorkerOutcome {
    sut.write_kernel_marker(test.name());

    let mut sink = PanicWatchSink::new();
    let command_line = test.command_line();
    let cwd = test.cwd().cloned();
    let stopwatch = Stopwatch::start();
    debug!(
        test = test.name(),
        command = %command_line,
        started_at = %stopwatch.start_time(),
        "dispatching test"
    );

    let call = sut.run_command(&command_line, cwd.as_deref(), &mut sink, cancel);
    let outcome = tokio::time::timeout(timeout, call).await;

    if sink.panic_detected() {
        let result = TestResult::new(test, Outcome::Broken, 0, stopwatch.elapsed(), -1, sink.captured());
        return WorkerOutcome::Panic(result);
    }

    match outcome {
        Ok(Ok(cmd)) if cmd.return_code() == 0 => WorkerOutcome::Completed(TestResult::new(
            test,
            Outcome::Passed,
            0,
            stopwatch.elapsed(),
            cmd.return_code(),
            sink.captured(),
        )),
        Ok(Ok(cmd)) => WorkerOutcome::Completed(TestResult::new(
            test,
            Outcome::Failed,
            0,
            stopwatch.elapsed(),
            cmd.return_code(),
            sink.captured(),
        )),
        Ok(Err(SutError::Timeout)) => WorkerOutcome::KernelTimeout(TestResult::new(
            test,
            Outcome::Broken,
            0,
            stopwatch.elapsed(),
            -1,
            sink.captured(),
        )),
        Ok(Err(other)) => WorkerOutcome::Sut(other),
        Err(_elapsed) => WorkerOutcome::TestTimeout(TestResult::new(
            test,
            Outcome::Broken,
            0,
            timeout,
            -1,
            String::new(),
        )),
    }
}

/// Builds a [`TestScheduler`].
pub struct TestSchedulerBuilder<S> {
    sut: Arc<S>,
    timeout: Duration,
    max_workers: usize,
}

impl<S: Sut + 'static> TestSchedulerBuilder<S> {
    /// Starts a builder for the given SUT, defaulting to a one-hour
    /// per-test timeout and a single worker.
    pub fn new(sut: Arc<S>) -> Self {
        Self {
            sut,
            timeout: Duration::from_secs(3600),
            max_workers: 1,
        }
    }

    /// Sets the per-test timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of tests dispatched concurrently.
    #[must_use]
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Builds the scheduler, rejecting a `max_workers` of zero.
    pub fn build(self) -> Result<TestScheduler<S>, BuildError> {
        if self.max_workers == 0 {
            return Err(BuildError::ZeroWorkers);
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(TestScheduler {
            sut: self.sut,
            timeout: self.timeout,
            max_workers: self.max_workers,
            slots: Vec::new(),
            stop_tx,
            stop_rx,
        })
    }
}

/// Dispatches an ordered batch of [`Test`]s to a SUT, enforcing bounded
/// parallelism, a per-test timeout, and kernel-health monitoring.
///
/// See the crate documentation for the full execution discipline.
pub struct TestScheduler<S> {
    sut: Arc<S>,
    timeout: Duration,
    max_workers: usize,
    /// Result slots, indexed by dispatch order. Written synchronously as
    /// each test completes so that a caller racing `schedule()` against an
    /// external deadline (and dropping the future) still sees whatever
    /// completed before the drop via [`TestScheduler::results`].
    slots: Vec<Option<TestResult>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl<S: Sut + 'static> TestScheduler<S> {
    /// Requests cooperative cancellation: in-flight tests are signalled to
    /// terminate, tests not yet started are not dispatched, and `schedule`
    /// returns [`ScheduleError::Cancelled`] without appending results for
    /// whatever was interrupted.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// A cloneable handle that can request cancellation independently of
    /// this scheduler's borrow. Useful for calling `stop()` from another
    /// task while `schedule()`'s `&mut self` future is in flight — obtain
    /// the handle before calling `schedule`.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Completed results, in dispatch order, up to the longest prefix of
    /// tests that finished before an abort (if any).
    pub fn results(&self) -> Vec<TestResult> {
        self.slots
            .iter()
            .take_while(|slot| slot.is_some())
            .map(|slot| slot.clone().expect("checked by take_while"))
            .collect()
    }

    /// All result slots, in dispatch order, `None` for a test not yet
    /// completed. Unlike [`TestScheduler::results`] (a contiguous prefix),
    /// this surfaces a test that completed out of dispatch order — with
    /// `max_workers > 1`, the test whose completion raised a kernel-health
    /// error need not be the lowest still-incomplete index, and a caller
    /// recovering from that error needs to know exactly which tests were
    /// retired, not just the head of the batch.
    pub fn results_sparse(&self) -> Vec<Option<TestResult>> {
        self.slots.clone()
    }

    /// Runs `tests` in order. On normal completion, [`TestScheduler::results`]
    /// holds one entry per test. Idempotent: each call resets internal
    /// state, including the cancellation flag from a previous `stop()`.
    #[instrument(skip(self, tests), fields(count = tests.len(), max_workers = self.max_workers))]
    pub async fn schedule(&mut self, tests: &[Test]) -> Result<(), ScheduleError> {
        let _ = self.stop_tx.send(false);
        self.slots = (0..tests.len()).map(|_| None).collect();

        let mut stop_rx = self.stop_rx.clone();
        let baseline = self.sut.get_tainted_info().await?;
        debug!(baseline_mask = baseline.mask(), "captured baseline taint mask");

        let n = tests.len();
        let mut join_set: JoinSet<(usize, WorkerOutcome)> = JoinSet::new();
        let mut next_idx = 0usize;
        let mut solo_idx: Option<usize> = None;

        let result = loop {
            if *stop_rx.borrow() {
                break Err(ScheduleError::Cancelled);
            }

            let can_dispatch = next_idx < n
                && solo_idx.is_none()
                && join_set.len() < self.max_workers
                && (tests[next_idx].parallelizable() || join_set.is_empty());

            if can_dispatch {
                let idx = next_idx;
                let test = tests[idx].clone();
                let is_solo = !test.parallelizable();
                let sut = Arc::clone(&self.sut);
                let timeout = self.timeout;
                let cancel = stop_rx.clone();
                join_set.spawn(async move { (idx, run_one(sut, test, timeout, cancel).await) });
                next_idx += 1;
                if is_solo {
                    solo_idx = Some(idx);
                }
                continue;
            }

            if next_idx >= n && join_set.is_empty() {
                break Ok(());
            }

            tokio::select! {
                _ = stop_rx.changed() => {
                    break Err(ScheduleError::Cancelled);
                }
                Some(joined) = join_set.join_next() => {
                    let (idx, outcome) = joined.expect("worker task was not cancelled here");
                    if solo_idx == Some(idx) {
                        solo_idx = None;
                    }

                    match outcome {
                        WorkerOutcome::Completed(result) => {
                            self.slots[idx] = Some(result);
                            let info = self.sut.get_tainted_info().await?;
                            if info.mask() != baseline.mask() {
                                break Err(ScheduleError::KernelTainted {
                                    test: tests[idx].name().to_string(),
                                    baseline: baseline.mask(),
                                    current: info.mask(),
                                    reasons: info.reasons().to_vec(),
                                });
                            }
                        }
                        WorkerOutcome::TestTimeout(result) => {
                            self.slots[idx] = Some(result);
                        }
                        WorkerOutcome::Panic(result) => {
                            self.slots[idx] = Some(result);
                            break Err(ScheduleError::KernelPanic { test: tests[idx].name().to_string() });
                        }
                        WorkerOutcome::KernelTimeout(result) => {
                            self.slots[idx] = Some(result);
                            break Err(ScheduleError::KernelTimeout { test: Some(tests[idx].name().to_string()) });
                        }
                        WorkerOutcome::Sut(e) => {
                            break Err(ScheduleError::Sut(e));
                        }
                    }
                }
            };
        };

        if result.is_err() {
            warn!(error = ?result, "aborting remaining in-flight tests");
            join_set.shutdown().await;
        }

        result
    }
}

/// A cloneable cancellation trigger for a [`TestScheduler`], obtained via
/// [`TestScheduler::stop_handle`]. Exists because `schedule` borrows the
/// scheduler mutably for the duration of the run, so a caller that wants to
/// `stop()` it from another task needs a handle taken out beforehand.
#[derive(Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Requests cooperative cancellation, identically to
    /// [`TestScheduler::stop`].
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}
