//! 会话级事件子系统（eventing）
//!
//! - `EventHandler`：观察命令执行结果，可注入变更集或重入执行命令；
//! - `HandlerRegistry`：按注册顺序通知处理器，并限制重入深度；
//! - `OperationCollector`：收集子阶段（如派生字段补全）产生的操作。
//!
//! 通知完全同步，处理器与会话存储共享同一执行线程。
//!
pub mod collector;
pub mod handler;
pub mod registry;

pub use collector::OperationCollector;
pub use handler::{CommandExecuted, EventHandler, HandledCommands};
pub use registry::{HandlerId, HandlerRegistry, HandlerScope};
