//! 命令（Command）与命令分派（Dispatcher）
//!
//! 命令是作用于某个数据表的不可变意图，由封闭的 [`CommandKind`] 枚举表达，
//! 每个变体携带各自的类型化载荷。未知命令名在构造期即被拒绝。
//!
mod context;
mod dispatcher;
mod execution;
mod fields;
mod records;

pub use dispatcher::CommandDispatcher;
pub use execution::{CommandOutput, ExecuteOutcome, ExecutionData, ExecutionResult};

use crate::error::{DomainError, DomainResult};
use crate::ids::{DatasheetId, FieldId, RecordId, ViewId};
use crate::snapshot::{CellValue, Field, FieldKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 命令名（无载荷的标签）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandName {
    AddRecords,
    SetRecords,
    DeleteRecords,
    AddFields,
    DeleteField,
    SetFieldAttr,
}

impl CommandName {
    pub const ALL: [CommandName; 6] = [
        Self::AddRecords,
        Self::SetRecords,
        Self::DeleteRecords,
        Self::AddFields,
        Self::DeleteField,
        Self::SetFieldAttr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddRecords => "AddRecords",
            Self::SetRecords => "SetRecords",
            Self::DeleteRecords => "DeleteRecords",
            Self::AddFields => "AddFields",
            Self::DeleteField => "DeleteField",
            Self::SetFieldAttr => "SetFieldAttr",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| DomainError::UnsupportedCommand { name: s.to_string() })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordInput {
    #[serde(default)]
    pub cells: BTreeMap<FieldId, CellValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddRecordsPayload {
    #[serde(default)]
    pub view_id: Option<ViewId>,
    #[serde(default)]
    pub index: Option<usize>,
    pub records: Vec<RecordInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub record_id: RecordId,
    pub field_id: FieldId,
    pub value: Option<CellValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetRecordsPayload {
    pub updates: Vec<CellUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRecordsPayload {
    pub record_ids: Vec<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInput {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFieldsPayload {
    pub fields: Vec<FieldInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFieldData {
    pub field_id: FieldId,
    /// 关联字段：true 删除外表兄弟字段，false 将其转为文本字段
    #[serde(default)]
    pub delete_brother_field: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFieldPayload {
    pub fields: Vec<DeleteFieldData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFieldAttrPayload {
    pub field_id: FieldId,
    pub field: Field,
}

/// 命令种类及载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum CommandKind {
    AddRecords(AddRecordsPayload),
    SetRecords(SetRecordsPayload),
    DeleteRecords(DeleteRecordsPayload),
    AddFields(AddFieldsPayload),
    DeleteField(DeleteFieldPayload),
    SetFieldAttr(SetFieldAttrPayload),
}

impl CommandKind {
    pub fn name(&self) -> CommandName {
        match self {
            Self::AddRecords(_) => CommandName::AddRecords,
            Self::SetRecords(_) => CommandName::SetRecords,
            Self::DeleteRecords(_) => CommandName::DeleteRecords,
            Self::AddFields(_) => CommandName::AddFields,
            Self::DeleteField(_) => CommandName::DeleteField,
            Self::SetFieldAttr(_) => CommandName::SetFieldAttr,
        }
    }
}

/// 作用于目标数据表的命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    target: DatasheetId,
    #[serde(flatten)]
    kind: CommandKind,
}

impl Command {
    pub fn new(target: DatasheetId, kind: CommandKind) -> Self {
        Self { target, kind }
    }

    /// 由命令名与 JSON 载荷构造命令；未知命令名返回 `UnsupportedCommand`
    pub fn parse(name: &str, target: DatasheetId, payload: serde_json::Value) -> DomainResult<Self> {
        let name: CommandName = name.parse()?;
        let invalid = |e: serde_json::Error| {
            DomainError::validation("command_payload_invalid", format!("{name}: {e}"))
        };
        let kind = match name {
            CommandName::AddRecords => {
                CommandKind::AddRecords(serde_json::from_value(payload).map_err(invalid)?)
            }
            CommandName::SetRecords => {
                CommandKind::SetRecords(serde_json::from_value(payload).map_err(invalid)?)
            }
            CommandName::DeleteRecords => {
                CommandKind::DeleteRecords(serde_json::from_value(payload).map_err(invalid)?)
            }
            CommandName::AddFields => {
                CommandKind::AddFields(serde_json::from_value(payload).map_err(invalid)?)
            }
            CommandName::DeleteField => {
                CommandKind::DeleteField(serde_json::from_value(payload).map_err(invalid)?)
            }
            CommandName::SetFieldAttr => {
                CommandKind::SetFieldAttr(serde_json::from_value(payload).map_err(invalid)?)
            }
        };
        Ok(Self::new(target, kind))
    }

    pub fn add_records(target: DatasheetId, records: Vec<RecordInput>) -> Self {
        Self::new(
            target,
            CommandKind::AddRecords(AddRecordsPayload {
                records,
                ..Default::default()
            }),
        )
    }

    pub fn set_records(target: DatasheetId, updates: Vec<CellUpdate>) -> Self {
        Self::new(target, CommandKind::SetRecords(SetRecordsPayload { updates }))
    }

    pub fn delete_records(target: DatasheetId, record_ids: Vec<RecordId>) -> Self {
        Self::new(
            target,
            CommandKind::DeleteRecords(DeleteRecordsPayload { record_ids }),
        )
    }

    pub fn add_fields(target: DatasheetId, fields: Vec<FieldInput>) -> Self {
        Self::new(target, CommandKind::AddFields(AddFieldsPayload { fields }))
    }

    pub fn delete_fields(target: DatasheetId, fields: Vec<DeleteFieldData>) -> Self {
        Self::new(target, CommandKind::DeleteField(DeleteFieldPayload { fields }))
    }

    pub fn set_field_attr(target: DatasheetId, field: Field) -> Self {
        Self::new(
            target,
            CommandKind::SetFieldAttr(SetFieldAttrPayload {
                field_id: field.id.clone(),
                field,
            }),
        )
    }

    pub fn target(&self) -> &DatasheetId {
        &self.target
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn name(&self) -> CommandName {
        self.kind.name()
    }
}
