//! End-to-end scenarios exercising the submission API, its retry/cancel
//! contract, and the scheduler, all as a host would actually use them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Local;
use taskloom::{
    CancelToken, Config, ExecuteResult, PriorityWorkQueue, ServiceContext, StreamItem, TaskError, TaskWrapper, Unit,
    WorkQueue, WorkScheduler, await_all,
};

#[tokio::test]
async fn fifo_queue_runs_three_void_units_in_submission_order() {
    let queue: WorkQueue<()> = WorkQueue::new(Config::default());
    queue.start();

    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for n in 0..3u32 {
        let order = Arc::clone(&order);
        handles.push(
            queue
                .submit(
                    Unit::async_void(move || {
                        let order = Arc::clone(&order);
                        async move {
                            order.lock().await.push(n);
                        }
                    }),
                    1,
                    CancelToken::new(),
                )
                .expect("valid attempts"),
        );
    }

    await_all(handles).await;
    assert_eq!(*order.lock().await, vec![0, 1, 2]);
    queue.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn priority_queue_drains_strictly_highest_first() {
    let queue: PriorityWorkQueue<u32> = PriorityWorkQueue::new(Config::default());
    // Four units submitted with priorities [0, 0, 1, 2]; once drained their
    // completion order must be [priority-2, priority-1, priority-0 (in
    // submission order)] -- i.e. result values [3, 2, 0, 1].
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let priorities = [0u32, 0, 1, 2];
    for (i, priority) in priorities.into_iter().enumerate() {
        let order = Arc::clone(&order);
        queue
            .submit(
                Unit::async_void(move || {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().await.push(i as u32);
                    }
                }),
                1,
                priority,
                CancelToken::new(),
            )
            .expect("valid attempts");
    }

    queue.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*order.lock().await, vec![3, 2, 0, 1]);
    queue.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn unit_retries_until_attempts_exhausted_then_resolves_business_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&calls);
    let unit = Unit::async_result(move || {
        let c = Arc::clone(&c);
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TaskError::BusinessError {
                task_id: uuid::Uuid::nil(),
                message: "always fails".into(),
            })
        }
    });

    let (wrapper, handle) = TaskWrapper::new(unit, 3, CancelToken::new());
    let outer = CancelToken::new();
    loop {
        let result = wrapper.execute((), ServiceContext::new(), &outer).await;
        if result == ExecuteResult::Done {
            break;
        }
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(handle.await, Err(TaskError::BusinessError { .. })));
}

#[tokio::test]
async fn outer_shutdown_mid_retry_does_not_consume_the_attempt_budget() {
    let started = Arc::new(tokio::sync::Notify::new());
    let started_clone = Arc::clone(&started);
    let unit = Unit::async_result(move || {
        let started = Arc::clone(&started_clone);
        async move {
            started.notify_one();
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<u32, TaskError>(0)
        }
    });

    let (wrapper, _handle) = TaskWrapper::new(unit, 2, CancelToken::new());
    let outer = CancelToken::new();

    let wrapper_clone = Arc::clone(&wrapper);
    let outer_clone = outer.clone();
    let exec = tokio::spawn(async move { wrapper_clone.execute((), ServiceContext::new(), &outer_clone).await });

    started.notified().await;
    outer.cancel();
    // The worker/host shutdown token firing mid-execution must be reported
    // as a retry, not a resolved outcome -- losing the worker must not also
    // lose the task.
    assert_eq!(exec.await.unwrap(), ExecuteResult::Retry);
}

#[tokio::test]
async fn submit_rejects_out_of_range_attempts_before_queuing_anything() {
    let queue: WorkQueue<()> = WorkQueue::new(Config::default());
    let err = queue
        .submit(Unit::async_void(|| async {}), 0, CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, TaskError::OutOfRange(_)));
}

#[tokio::test]
async fn one_shot_delayed_schedule_resolves_after_its_due_time() {
    let scheduler: WorkScheduler<&'static str> = WorkScheduler::new(
        ServiceContext::new(),
        Config {
            scheduler_horizon: Duration::from_secs(1),
            scheduler_beforehand: Duration::from_millis(50),
            ..Config::default()
        },
    );
    scheduler.start().await;

    let at = Local::now() + chrono::Duration::milliseconds(200);
    let handle = scheduler
        .add_delayed_work(Unit::async_result(|| async { Ok("done") }), 1, at, CancelToken::new())
        .expect("valid schedule");

    let started = std::time::Instant::now();
    let value = handle.await.expect("resolves");
    assert_eq!(value, "done");
    assert!(started.elapsed() >= Duration::from_millis(150));
    scheduler.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn repeated_schedule_fires_exec_count_times_on_its_period() {
    let scheduler: WorkScheduler<u32> = WorkScheduler::new(
        ServiceContext::new(),
        Config {
            scheduler_horizon: Duration::from_secs(1),
            scheduler_beforehand: Duration::from_millis(20),
            ..Config::default()
        },
    );
    scheduler.start().await;

    let counter = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&counter);
    let start_at = Local::now() + chrono::Duration::milliseconds(100);
    let mut handle = scheduler
        .add_repeated_work(
            Unit::async_result(move || {
                let c = Arc::clone(&c);
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1) }
            }),
            1,
            start_at,
            Duration::from_millis(250),
            4,
            CancelToken::new(),
        )
        .expect("valid schedule");

    let mut values = Vec::new();
    loop {
        match handle.recv().await {
            Some(StreamItem::Next(v)) => values.push(*v),
            Some(StreamItem::Complete) => break,
            Some(StreamItem::Error(_)) => {}
            None => break,
        }
    }
    assert_eq!(values, vec![1, 2, 3, 4]);
    scheduler.stop(Duration::from_secs(1)).await;
}
