#![allow(missing_docs)]

#[macro_use]
mod common;

use common::*;
use filament::{
    this_fiber, waitfor_all, waitfor_any, Awaitable, Error, ErrorKind, Future, PackagedTask,
    Promise,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

#[test]
fn dropped_promise_breaks_its_future() {
    init_test("dropped_promise_breaks_its_future");
    run_on_scheduler(|_| {
        let promise = Promise::<u32>::new();
        let future = promise.get_future().expect("future");
        let producer = filament::spawn(move || {
            this_fiber::yield_now()?;
            drop(promise);
            Ok(())
        })
        .expect("spawn");
        let err = future.get().expect_err("broken");
        assert_eq!(err.kind(), ErrorKind::BrokenPromise);
        producer.join().expect("join");
    });
    test_complete!("dropped_promise_breaks_its_future");
}

#[test]
fn task_twice_and_moved() {
    init_test("task_twice_and_moved");
    let mut task = PackagedTask::new(|| Ok("ran"));
    let future = task.get_future().expect("future");

    test_section!("moved-from task");
    let mut owner = task.take();
    let err = task.call().expect_err("moved");
    assert_eq!(err.kind(), ErrorKind::TaskMoved);
    assert!(!future.is_ready());

    test_section!("second call");
    owner.call().expect("first call");
    let err = owner.call().expect_err("second call");
    assert_eq!(err.kind(), ErrorKind::TaskAlreadyStarted);
    assert!(owner.take().valid());

    let future = future;
    assert_eq!(future.get().expect("value"), "ran");
    test_complete!("task_twice_and_moved");
}

#[test]
fn any_of_five_reports_the_completed_one() {
    init_test("any_of_five_reports_the_completed_one");
    for i in 0..5 {
        run_on_scheduler(move |_| {
            let mut tasks: Vec<_> = (0..5).map(|n| PackagedTask::new(move || Ok(n))).collect();
            let futures: Vec<Future<usize>> = tasks
                .iter()
                .map(|task| task.get_future().expect("future"))
                .collect();
            let chosen = tasks.remove(i);
            let mut runner = filament::spawn(move || {
                this_fiber::yield_now()?;
                chosen.call()
            })
            .expect("spawn");
            runner.detach();

            let index = waitfor_any(&futures).expect("waitfor_any");
            assert_with_log!(index == i, "ready index", i, index);
            for (j, future) in futures.iter().enumerate() {
                assert_eq!(future.is_ready(), j == i, "future {j} readiness");
            }
            drop(tasks);
        });
    }
    test_complete!("any_of_five_reports_the_completed_one");
}

#[test]
fn any_prefers_lowest_ready_index() {
    init_test("any_prefers_lowest_ready_index");
    let promises: Vec<Promise<()>> = (0..4).map(|_| Promise::new()).collect();
    let futures: Vec<_> = promises
        .iter()
        .map(|p| p.get_future().expect("future"))
        .collect();
    promises[3].set_value(()).expect("set");
    promises[2].set_value(()).expect("set");
    assert_eq!(waitfor_any(&futures).expect("ready"), 2);
}

#[test]
fn all_returns_after_every_task_in_any_order() {
    init_test("all_returns_after_every_task_in_any_order");
    let finished = run_on_scheduler(|_| {
        let finished = Arc::new(AtomicUsize::new(0));
        let delays = [3_usize, 0, 5, 1, 2];
        let mut futures = Vec::new();
        for delay in delays {
            let finished = Arc::clone(&finished);
            let task = PackagedTask::new(move || {
                for _ in 0..delay {
                    this_fiber::yield_now()?;
                }
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(delay)
            });
            futures.push(task.get_future().expect("future"));
            let mut fiber = filament::spawn(move || task.call()).expect("spawn");
            fiber.detach();
        }
        waitfor_all(&futures).expect("waitfor_all");
        assert!(futures.iter().all(Future::is_ready));
        let values: Vec<_> = futures
            .iter()
            .map(|f| f.get().expect("value"))
            .collect();
        assert_eq!(values, delays);
        finished.load(Ordering::SeqCst)
    });
    assert_eq!(finished, 5);
    test_complete!("all_returns_after_every_task_in_any_order");
}

#[test]
fn mixed_any_from_fiber() {
    init_test("mixed_any_from_fiber");
    run_on_scheduler(|_| {
        let number = Promise::<i64>::new();
        let word = PackagedTask::new(|| Ok(String::from("hello")));
        let number_future = number.get_future().expect("future").share();
        let word_future = word.get_future().expect("future");
        let watcher = filament::spawn(move || {
            let inputs: [&dyn Awaitable; 2] = [&number_future, &word_future];
            let index = waitfor_any(&inputs)?;
            assert_eq!(index, 0);
            assert_eq!(number_future.get()?, -1);
            Ok(())
        })
        .expect("spawn");
        this_fiber::yield_now().expect("watcher blocks");
        number.set_value(-1).expect("set");
        watcher.join().expect("join");
        drop(word);
    });
    test_complete!("mixed_any_from_fiber");
}

#[test]
fn wait_callback_runs_once_across_waiters() {
    init_test("wait_callback_runs_once_across_waiters");
    let calls = run_on_scheduler(|_| {
        let calls = Arc::new(AtomicUsize::new(0));
        let promise = Promise::<u8>::new();
        {
            let calls = Arc::clone(&calls);
            promise
                .set_wait_callback(move |_completer| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .expect("callback");
        }
        let shared = promise.get_future().expect("future").share();
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let shared = shared.clone();
                filament::spawn(move || shared.get().map(|v: u8| assert_eq!(v, 4)))
                    .expect("spawn")
            })
            .collect();
        for _ in 0..3 {
            this_fiber::yield_now().expect("readers block");
        }
        promise.set_value(4).expect("set");
        for reader in readers {
            reader.join().expect("join");
        }
        calls.load(Ordering::SeqCst)
    });
    assert_eq!(calls, 1);
    test_complete!("wait_callback_runs_once_across_waiters");
}

#[test]
fn lazy_task_runs_on_first_get() {
    init_test("lazy_task_runs_on_first_get");
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&runs);
    let task = PackagedTask::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1, 2, 3])
    });
    task.set_wait_callback(|invoker| {
        let _ = invoker.invoke();
    })
    .expect("callback");
    let future = task.get_future().expect("future");
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(future.get().expect("value"), vec![1, 2, 3]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn stored_error_keeps_identity() {
    init_test("stored_error_keeps_identity");
    #[derive(Debug, thiserror::Error)]
    #[error("quota exceeded by {0}")]
    struct Quota(u32);

    let promise = Promise::<()>::new();
    let future = promise.get_future().expect("future");
    promise.set_exception(Error::user(Quota(7))).expect("set");
    let err = future.get().expect_err("stored");
    assert_eq!(err.downcast_ref::<Quota>().map(|q| q.0), Some(7));
}
