//! 共享状态的跨线程行为验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：单元测试覆盖了单线程下的每条迁移，这里用真实线程重放生产者/消费者竞争，
//!   确认回调恰好运行一次、结果恰好释放一次、请求上下文跨执行器线程仍然可见。
//! - **结构 (How)**：每个场景重复多轮，以提高命中两种到达顺序的概率；断言只依赖最终可观测结果，
//!   不依赖具体交错。

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
};

use spark_future::{
    CoreState, FutureError, InlineContinuation, KeepAlive, RequestContext, SharedState, contract,
    test_stubs::ManualExecutor,
};

const ROUNDS: usize = 200;

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn racing_result_and_callback_deliver_exactly_once() {
    for round in 0..ROUNDS {
        let (promise, future) = contract::<usize>();
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));
        let (tx, rx) = mpsc::channel();

        let producer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                promise.set_value(round);
            })
        };

        let counter = Arc::clone(&calls);
        barrier.wait();
        future.on_complete(move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(result).expect("receiver alive");
        });
        producer.join().expect("producer must not panic");

        let delivered = rx.recv().expect("callback ran").expect("value result");
        assert_eq!(delivered, round);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "第 {round} 轮回调次数异常");
    }
}

#[test]
fn racing_proxy_and_callback_deliver_exactly_once() {
    for round in 0..ROUNDS {
        let (outer_promise, outer_future) = contract::<usize>();
        let (inner_promise, inner_future) = contract::<usize>();
        let barrier = Arc::new(Barrier::new(2));
        let (tx, rx) = mpsc::channel();

        let producer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                outer_promise.forward_from(inner_future);
                inner_promise.set_value(round * 2);
            })
        };

        barrier.wait();
        outer_future.on_complete(move |result| tx.send(result).expect("receiver alive"));
        producer.join().expect("producer must not panic");

        assert_eq!(rx.recv().expect("callback ran").ok(), Some(round * 2));
        assert!(rx.try_recv().is_err(), "转发链上不得重复回调");
    }
}

#[test]
fn result_is_released_exactly_once_whatever_the_order() {
    for round in 0..ROUNDS {
        let drops = Arc::new(AtomicUsize::new(0));
        let (promise, future) = contract::<DropCounter>();
        let value = DropCounter(Arc::clone(&drops));

        let producer = thread::spawn(move || promise.set_value(value));
        if round % 2 == 0 {
            future.on_complete(drop);
        } else {
            drop(future);
        }
        producer.join().expect("producer must not panic");
        assert_eq!(drops.load(Ordering::SeqCst), 1, "第 {round} 轮结果释放次数异常");
    }
}

#[test]
fn executor_thread_sees_captured_request_context() {
    let manual = ManualExecutor::new();
    let (promise, future) = contract::<u8>();
    let (tx, rx) = mpsc::channel();

    let ctx = RequestContext::new().with_value("tenant", "acme");
    {
        let _scope = RequestContext::enter(Some(ctx.clone()));
        future.via(manual.keep_alive()).on_complete(move |_| {
            let tenant = RequestContext::current()
                .and_then(|current| current.get::<&'static str>("tenant").copied());
            tx.send(tenant).expect("receiver alive");
        });
    }
    promise.set_value(0);

    let runner = manual.clone();
    thread::spawn(move || {
        assert!(RequestContext::current().is_none());
        runner.run_all();
        assert!(RequestContext::current().is_none(), "回调结束后恢复执行线程原有上下文");
    })
    .join()
    .expect("executor thread must not panic");

    assert_eq!(rx.recv().expect("callback ran"), Some("acme"));
}

#[test]
fn interrupt_races_handler_registration_without_loss() {
    for _ in 0..ROUNDS {
        let (promise, future) = contract::<u8>();
        let hits = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));

        let consumer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                future.raise(FutureError::interrupted("deadline"));
                future.raise(FutureError::Cancelled);
                future
            })
        };

        let counter = Arc::clone(&hits);
        barrier.wait();
        promise.set_interrupt_handler(move |error| {
            assert_eq!(error.code(), "future.interrupted", "只投递第一次中断");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let future = consumer.join().expect("consumer must not panic");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        promise.set_error(FutureError::Cancelled);
        drop(future);
    }
}

#[test]
fn dropped_executor_task_still_tears_down() {
    let manual = ManualExecutor::new();
    let drops = Arc::new(AtomicUsize::new(0));
    let core = SharedState::<DropCounter>::new();
    core.set_executor(manual.keep_alive());
    core.set_callback(|_, _| unreachable!("任务被丢弃，不应运行"), None, InlineContinuation::Forbid);
    core.detach_future();
    core.set_result(KeepAlive::empty(), Ok(DropCounter(Arc::clone(&drops))));
    assert_eq!(core.state(), CoreState::Done);

    assert_eq!(manual.discard_all(), 1);
    assert_eq!(core.callback_ref_count(), 0, "丢弃任务即释放回调");
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    core.detach_promise();
    assert_eq!(core.attached_count(), 0);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
