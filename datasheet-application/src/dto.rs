use datasheet_domain::ids::{FieldId, RecordId, ViewId};
use datasheet_domain::snapshot::{Field, FieldKind, View, ViewKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 数据传输对象（DTO）
///
/// - 作为应用层的输出载体，面向接口/外部系统序列化友好；
/// - 与领域模型解耦，避免将快照内部结构直接暴露到接口层。
pub trait Dto: Serialize + Send + Sync + 'static {}

/// 请求中单元格的键：字段名或字段 ID
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    #[default]
    Name,
    Id,
}

/// 请求中的一条记录：键 → JSON 值
///
/// 选项以名称给出，关联以记录 ID 数组给出，`null` 表示清空。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddRecordsRequest {
    #[serde(default)]
    pub field_key: FieldKey,
    #[serde(default)]
    pub view_id: Option<ViewId>,
    pub records: Vec<RecordFields>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub record_id: RecordId,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecordsRequest {
    #[serde(default)]
    pub field_key: FieldKey,
    #[serde(default)]
    pub view_id: Option<ViewId>,
    pub records: Vec<RecordUpdate>,
}

/// 删除关联字段时外表兄弟字段的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    #[default]
    Delete,
    KeepText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVo {
    pub id: FieldId,
    pub name: String,
    pub kind: FieldKind,
    pub is_primary: bool,
}

impl Dto for FieldVo {}

impl FieldVo {
    pub fn from_field(field: &Field, primary: Option<&FieldId>) -> Self {
        Self {
            id: field.id.clone(),
            name: field.name.clone(),
            kind: field.kind.clone(),
            is_primary: primary == Some(&field.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewVo {
    pub id: ViewId,
    pub name: String,
    pub kind: ViewKind,
}

impl Dto for ViewVo {}

impl From<&View> for ViewVo {
    fn from(view: &View) -> Self {
        Self {
            id: view.id.clone(),
            name: view.name.clone(),
            kind: view.kind.clone(),
        }
    }
}
