//! 数据表领域层：快照、命令、操作与变更集
//!
//! - `snapshot`：内存快照模型与存储；
//! - `command`：封闭命令集合与无 I/O 的命令分派器；
//! - `eventing`：会话级处理器注册与重入执行；
//! - `assembler`：变更集组装；
//! - `datasheet`：会话执行入口。
//!
pub mod assembler;
pub mod changeset;
pub mod command;
pub mod datasheet;
pub mod error;
pub mod eventing;
pub mod ids;
pub mod operation;
pub mod snapshot;
