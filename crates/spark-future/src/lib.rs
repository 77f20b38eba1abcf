#![deny(unsafe_code)]
#![doc = "spark-future: promise/future 共享状态机、延迟执行器与中断通道。"]
#![doc = ""]
#![doc = "== 模块划分 =="]
#![doc = "1. `shared`：一对 promise/future 共享的无锁状态机，负责结果与回调的汇合、转发与拆除。"]
#![doc = "2. `deferred`：执行器尚未确定时缓存单个工作项的延迟执行器，支持嵌套链。"]
#![doc = "3. `interrupt`：消费者到生产者方向的中断通道，独立加锁。"]
#![doc = "4. `promise`：以值语义消费的 `Promise`/`Future` 句柄。"]
#![doc = ""]
#![doc = "== 并发模型 =="]
#![doc = "所有状态迁移使用 acquire/release CAS；`cfg(loom)` 构建下原子量与锁由 Loom 接管，模型测试位于 `tests/loom_shared_state.rs`。"]

mod context;
mod deferred;
mod error;
mod executor;
mod interrupt;
mod promise;
mod shared;
mod sync;

#[cfg(feature = "runtime-tokio")]
mod runtime_tokio;

/// 测试桩命名空间，集中暴露手动执行器与拒绝执行器，供单元测试、集成测试与基准复用。
pub mod test_stubs;

pub use context::{ContextScope, RequestContext};
pub use deferred::{DeferredExecutor, DeferredHandle, DeferredState, RejectHook};
pub use error::{FutureError, Try, codes};
pub use executor::{Executor, ExecutorError, InlineExecutor, KeepAlive, KeepAliveTask, Task};
pub use interrupt::{InterruptChannel, InterruptHandler};
pub use promise::{Future, Promise, contract};
pub use shared::{BoundExecutor, Callback, CoreState, InlineContinuation, SharedState};

#[cfg(feature = "runtime-tokio")]
pub use runtime_tokio::TokioExecutor;
