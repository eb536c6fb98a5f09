//! 快照（snapshot）
//!
//! 数据表的内存模型（字段、记录、视图）、加载过滤条件与会话级快照存储。

mod filter;
mod model;
mod store;

pub use filter::SnapshotFilter;
pub use model::{
    CellValue, DatasheetPack, DatasheetSnapshot, Field, FieldKind, Meta, Record, SelectOption,
    View, ViewKind,
};
pub use store::{SnapshotStore, StoreState};
