use crate::ids::{DatasheetId, FieldId, OptionId, RecordId, ViewId};
use datasheet_macros::value_object;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单选/多选字段的选项
#[value_object]
#[derive(Default)]
pub struct SelectOption {
    pub id: OptionId,
    pub name: String,
    pub color: u8,
}

/// 字段类型及其属性
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number {
        precision: u8,
    },
    Checkbox,
    SingleSelect {
        options: Vec<SelectOption>,
    },
    MultiSelect {
        options: Vec<SelectOption>,
    },
    Link {
        foreign_datasheet_id: DatasheetId,
        #[serde(default)]
        brother_field_id: Option<FieldId>,
    },
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number { .. } => "number",
            Self::Checkbox => "checkbox",
            Self::SingleSelect { .. } => "single_select",
            Self::MultiSelect { .. } => "multi_select",
            Self::Link { .. } => "link",
        }
    }

    pub fn options(&self) -> Option<&[SelectOption]> {
        match self {
            Self::SingleSelect { options } | Self::MultiSelect { options } => Some(options),
            _ => None,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Self::Link { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    /// 若为关联字段，返回 (外表 ID, 兄弟字段 ID)
    pub fn link_target(&self) -> Option<(&DatasheetId, Option<&FieldId>)> {
        match &self.kind {
            FieldKind::Link {
                foreign_datasheet_id,
                brother_field_id,
            } => Some((foreign_datasheet_id, brother_field_id.as_ref())),
            _ => None,
        }
    }
}

/// 单元格取值；缺省（不存在）即为空
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Options(Vec<OptionId>),
    Links(Vec<RecordId>),
}

impl CellValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::Options(_) => "options",
            Self::Links(_) => "links",
        }
    }

    pub fn links(&self) -> &[RecordId] {
        match self {
            Self::Links(ids) => ids,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub cells: BTreeMap<FieldId, CellValue>,
}

impl Record {
    pub fn cell(&self, field_id: &FieldId) -> Option<&CellValue> {
        self.cells.get(field_id)
    }
}

#[value_object]
#[derive(Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    #[default]
    Grid,
    Gallery,
    Kanban,
}

impl ViewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Gallery => "gallery",
            Self::Kanban => "kanban",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub id: ViewId,
    pub name: String,
    #[serde(default)]
    pub kind: ViewKind,
    #[serde(default)]
    pub rows: Vec<RecordId>,
    #[serde(default)]
    pub columns: Vec<FieldId>,
}

/// 表格元数据：字段定义与视图
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub field_map: BTreeMap<FieldId, Field>,
    #[serde(default)]
    pub views: Vec<View>,
}

impl Meta {
    /// 首个视图即默认视图
    pub fn default_view(&self) -> Option<&View> {
        self.views.first()
    }

    /// 默认视图的首列为主字段
    pub fn primary_field_id(&self) -> Option<&FieldId> {
        self.default_view().and_then(|v| v.columns.first())
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.field_map.values().find(|f| f.name == name)
    }
}

/// 内存中的表格快照（单个数据表）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasheetSnapshot {
    pub datasheet_id: DatasheetId,
    #[serde(default)]
    pub name: String,
    pub revision: u64,
    pub meta: Meta,
    #[serde(default)]
    pub record_map: BTreeMap<RecordId, Record>,
}

impl DatasheetSnapshot {
    /// 表格记录数（以默认视图的行数为准，不受记录过滤影响）
    pub fn record_count(&self) -> usize {
        self.meta.default_view().map_or(0, |v| v.rows.len())
    }

    pub fn field(&self, field_id: &FieldId) -> Option<&Field> {
        self.meta.field_map.get(field_id)
    }

    pub fn record(&self, record_id: &RecordId) -> Option<&Record> {
        self.record_map.get(record_id)
    }

    pub fn view(&self, view_id: &ViewId) -> Option<&View> {
        self.meta.views.iter().find(|v| &v.id == view_id)
    }

    /// 行中是否存在该记录（不要求记录数据已加载）
    pub fn contains_row(&self, record_id: &RecordId) -> bool {
        self.meta
            .default_view()
            .is_some_and(|v| v.rows.contains(record_id))
            || self.record_map.contains_key(record_id)
    }
}

/// 持久层返回的原始快照数据包；`meta` 可能被省略，需要二次获取
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasheetPack {
    pub datasheet_id: DatasheetId,
    #[serde(default)]
    pub name: String,
    pub revision: u64,
    #[serde(default)]
    pub meta: Option<Meta>,
    #[serde(default)]
    pub records: Vec<Record>,
}

impl DatasheetPack {
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }
}
