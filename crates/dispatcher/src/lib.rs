//! 协调器组件
//!
//! Worker注册与心跳、过期回收、FIFO工作队列、结果校验，以及把它们组合在
//! 单个存储事务内执行的 [`Coordinator`]。

pub mod coordinator;
pub mod garbage_collector;
pub mod result_validator;
pub mod work_queue;
pub mod worker_registry;

pub use coordinator::Coordinator;
pub use garbage_collector::{GarbageCollector, SweepReport};
pub use result_validator::ResultValidator;
pub use work_queue::WorkQueue;
pub use worker_registry::WorkerRegistry;
