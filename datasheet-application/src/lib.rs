//! 数据表应用层：变更会话编排
//!
//! 加载快照存储、执行命令、组装变更集并提交权威服务，
//! 随后记录来源、失效读缓存、广播并读回结果。
//!
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod context;
pub mod dto;
pub mod error;
pub mod loader;
pub mod mutations;
pub mod ports;
pub mod quota;
pub mod read_back;
pub mod session;
pub mod transform;

pub use broadcast::InMemoryBroadcast;
pub use cache::InMemoryProjectionCache;
pub use mutations::DatasheetMutations;
pub use session::{MutationSession, SessionOutcome, SessionPlan, SessionState};
