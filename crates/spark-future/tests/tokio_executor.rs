use std::time::Duration;

use spark_future::{ExecutorError, FutureError, RequestContext, TokioExecutor, contract};
use tokio::sync::oneshot;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn callback_runs_on_tokio_worker() {
    let executor = TokioExecutor::current().expect("inside runtime");
    let (promise, future) = contract::<u32>();
    let (tx, rx) = oneshot::channel();

    let ctx = RequestContext::new().with_value("trace_id", 7_u64);
    {
        let _scope = RequestContext::enter(Some(ctx));
        future.via(executor.keep_alive()).on_complete(move |result| {
            let trace_id = RequestContext::current()
                .and_then(|current| current.get::<u64>("trace_id").copied());
            let _ = tx.send((result.ok(), trace_id));
        });
    }

    std::thread::spawn(move || promise.set_value(99))
        .join()
        .expect("producer thread must not panic");

    let delivered = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("callback scheduled within timeout")
        .expect("sender kept alive until callback");
    assert_eq!(delivered, (Some(99), Some(7)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broken_promise_is_delivered_through_runtime() {
    let executor = TokioExecutor::current().expect("inside runtime");
    let (promise, future) = contract::<u32>();
    let (tx, rx) = oneshot::channel();
    future
        .via(executor.keep_alive())
        .on_complete(move |result| {
            let _ = tx.send(matches!(result, Err(FutureError::BrokenPromise)));
        });
    drop(promise);
    assert!(rx.await.expect("callback ran"));
}

#[test]
fn current_outside_runtime_is_unbound() {
    assert_eq!(TokioExecutor::current().err(), Some(ExecutorError::Unbound));
}
