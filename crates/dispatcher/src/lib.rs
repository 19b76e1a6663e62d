//! # Dispatcher
//!
//! 变更事件分发模块。
//!
//! 负责：
//! - `ChangeNotifier`：请求入口，规范化后入队，从不失败、不等待投递
//! - 工作线程：按批出队，不同路径并发投递，同一路径严格按序
//! - 重试：可重试错误指数退避，被拒立即丢弃
//! - 优雅关闭：截止时间内排空队列，超时后停止并汇报

pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod retry;

pub use contracts::{DeliveryOutcome, DeliveryStatus, DispatchReport, NotifierConfig};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder};
pub use error::DispatcherError;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use notifier::ChangeNotifier;
pub use retry::{deliver_with_retry, RetryPolicy};
