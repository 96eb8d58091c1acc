// Copyright (c) The ktest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scenario tests for [`TestScheduler`]: happy-path dispatch, cooperative
//! stop, taint/panic/timeout detection, and exclusive-test ordering.

mod support;

use ktest_runner::{ScheduleError, Test, TestSchedulerBuilder};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use support::MockSut;
use test_case::test_case;

fn ciao_tests(n: usize) -> Vec<Test> {
    (0..n)
        .map(|i| Test::new(format!("ciao{i}"), "echo").with_args(["-n", "ciao"]))
        .collect()
}

#[test_case(1; "single worker")]
#[test_case(10; "ten workers")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_path(max_workers: usize) {
    support::init_tracing();

    let sut = Arc::new(MockSut::clean());
    let mut scheduler = TestSchedulerBuilder::new(sut)
        .timeout(Duration::from_secs(5))
        .max_workers(max_workers)
        .build()
        .unwrap();

    let tests = ciao_tests(10);
    scheduler.schedule(&tests).await.unwrap();

    let results = scheduler.results();
    assert_eq!(results.len(), 10);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.test().name(), tests[i].name());
        assert_eq!(result.passed(), 1);
        assert_eq!(result.return_code(), 0);
        assert_eq!(result.stdout(), "ciao");
        assert!(result.exec_time() > Duration::ZERO);
        assert!(result.exec_time() < Duration::from_secs(1));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cooperative_stop() {
    support::init_tracing();

    let sut = Arc::new(MockSut::clean());
    let mut scheduler = TestSchedulerBuilder::new(Arc::clone(&sut))
        .timeout(Duration::from_secs(5))
        .max_workers(10)
        .build()
        .unwrap();

    let tests: Vec<Test> = (0..10)
        .map(|i| Test::new(format!("sleepy{i}"), "sleep").with_args(["1"]))
        .collect();

    let stop_handle = scheduler.stop_handle();
    let schedule = scheduler.schedule(&tests);
    tokio::pin!(schedule);

    tokio::select! {
        _ = &mut schedule => panic!("schedule must not complete before stop() fires"),
        _ = tokio::time::sleep(Duration::from_millis(100)) => {
            stop_handle.stop();
        }
    }

    let outcome = schedule.await;
    assert!(matches!(outcome, Err(ScheduleError::Cancelled)));
    assert_eq!(scheduler.results().len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn taint_mid_batch_fails() {
    support::init_tracing();

    let sut = Arc::new(MockSut::with_taint_sequence([
        ktest_runner::TaintInfo::clean(),
        ktest_runner::TaintInfo::new(1, ["machine check"]),
    ]));
    let mut scheduler = TestSchedulerBuilder::new(sut)
        .timeout(Duration::from_secs(5))
        .max_workers(1)
        .build()
        .unwrap();

    let tests = ciao_tests(10);
    let outcome = scheduler.schedule(&tests).await;
    assert!(matches!(outcome, Err(ScheduleError::KernelTainted { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panic_on_first_test() {
    support::init_tracing();

    let sut = Arc::new(MockSut::clean());
    let mut scheduler = TestSchedulerBuilder::new(sut)
        .timeout(Duration::from_secs(5))
        .max_workers(10)
        .build()
        .unwrap();

    let mut tests = vec![Test::new("panics", "echo").with_args(["Kernel", "panic"])];
    tests.extend(
        (1..10).map(|i| Test::new(format!("slow{i}"), "sleep").with_args(["5"])),
    );

    let outcome = scheduler.schedule(&tests).await;
    assert!(matches!(outcome, Err(ScheduleError::KernelPanic { .. })));

    let results = scheduler.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].broken(), 1);
    assert_eq!(results[0].return_code(), -1);
    assert_eq!(results[0].stdout(), "Kernel panic\n");
    assert!(results[0].exec_time() > Duration::ZERO);
    assert!(results[0].exec_time() < Duration::from_millis(200));
}

#[test_case(1; "single worker")]
#[test_case(10; "ten workers")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_test_timeout(max_workers: usize) {
    support::init_tracing();

    let sut = Arc::new(MockSut::clean());
    let mut scheduler = TestSchedulerBuilder::new(sut)
        .timeout(Duration::from_millis(50))
        .max_workers(max_workers)
        .build()
        .unwrap();

    let tests: Vec<Test> = (0..10)
        .map(|i| Test::new(format!("slow{i}"), "sh").with_args(["-c", "sleep 0.5 && echo -n ciao"]))
        .collect();

    scheduler.schedule(&tests).await.unwrap();

    let results = scheduler.results();
    assert_eq!(results.len(), 10);
    for result in results {
        assert_eq!(result.broken(), 1);
        assert_eq!(result.return_code(), -1);
        assert_eq!(result.stdout(), "");
        assert!(result.exec_time() > Duration::ZERO);
        assert!(result.exec_time() < Duration::from_millis(400));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kernel_timeout_aborts_batch() {
    support::init_tracing();

    let sut = Arc::new(MockSut::clean());
    sut.force_kernel_timeout();
    let mut scheduler = TestSchedulerBuilder::new(sut)
        .timeout(Duration::from_secs(5))
        .max_workers(1)
        .build()
        .unwrap();

    let tests = ciao_tests(3);
    let outcome = scheduler.schedule(&tests).await;
    assert!(matches!(
        outcome,
        Err(ScheduleError::KernelTimeout { test: Some(_) })
    ));
    assert_eq!(scheduler.results().len(), 1);
    assert_eq!(scheduler.results()[0].broken(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exclusive_test_runs_alone() {
    support::init_tracing();

    let sut = Arc::new(MockSut::clean());
    let mut scheduler = TestSchedulerBuilder::new(sut)
        .timeout(Duration::from_secs(5))
        .max_workers(4)
        .build()
        .unwrap();

    let mut tests = ciao_tests(3);
    tests.push(Test::new("exclusive", "echo").with_args(["-n", "solo"]).exclusive());
    tests.extend(ciao_tests(3).into_iter().map(|t| {
        Test::new(format!("after-{}", t.name()), t.cmd().to_string()).with_args(t.args().to_vec())
    }));

    scheduler.schedule(&tests).await.unwrap();
    let results = scheduler.results();
    assert_eq!(results.len(), tests.len());
    assert_eq!(results[3].stdout(), "solo");
}
