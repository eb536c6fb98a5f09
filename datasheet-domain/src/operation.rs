//! 操作（Operation）
//!
//! 单个数据表上的原子、可重放变更。命令执行时逐条产生并应用到工作快照，
//! 权威服务落盘后同样按顺序重放到持久快照上。
//!
use crate::ids::{FieldId, RecordId};
use crate::snapshot::{CellValue, DatasheetSnapshot, Field, FieldKind, Record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AddRecord {
        record: Record,
        #[serde(default)]
        index: Option<usize>,
    },
    DeleteRecord {
        record: Record,
    },
    SetCell {
        record_id: RecordId,
        field_id: FieldId,
        old: Option<CellValue>,
        new: Option<CellValue>,
    },
    AddField {
        field: Field,
        #[serde(default)]
        index: Option<usize>,
    },
    DeleteField {
        field: Field,
    },
    SetField {
        old: Field,
        new: Field,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddRecord { .. } => "add_record",
            Self::DeleteRecord { .. } => "delete_record",
            Self::SetCell { .. } => "set_cell",
            Self::AddField { .. } => "add_field",
            Self::DeleteField { .. } => "delete_field",
            Self::SetField { .. } => "set_field",
        }
    }

    /// 将操作应用到快照上（幂等：重复添加/删除不会产生重复行列）
    pub fn apply_to(&self, snapshot: &mut DatasheetSnapshot) {
        match self {
            Self::AddRecord { record, index } => {
                for view in &mut snapshot.meta.views {
                    if !view.rows.contains(&record.id) {
                        insert_at(&mut view.rows, *index, record.id.clone());
                    }
                }
                snapshot.record_map.insert(record.id.clone(), record.clone());
            }
            Self::DeleteRecord { record } => {
                for view in &mut snapshot.meta.views {
                    view.rows.retain(|id| id != &record.id);
                }
                snapshot.record_map.remove(&record.id);
            }
            Self::SetCell {
                record_id,
                field_id,
                new,
                ..
            } => {
                if let Some(record) = snapshot.record_map.get_mut(record_id) {
                    match new {
                        Some(value) => {
                            record.cells.insert(field_id.clone(), value.clone());
                        }
                        None => {
                            record.cells.remove(field_id);
                        }
                    }
                }
            }
            Self::AddField { field, index } => {
                for view in &mut snapshot.meta.views {
                    if !view.columns.contains(&field.id) {
                        insert_at(&mut view.columns, *index, field.id.clone());
                    }
                }
                snapshot
                    .meta
                    .field_map
                    .insert(field.id.clone(), field.clone());
            }
            Self::DeleteField { field } => {
                for view in &mut snapshot.meta.views {
                    view.columns.retain(|id| id != &field.id);
                }
                for record in snapshot.record_map.values_mut() {
                    record.cells.remove(&field.id);
                }
                snapshot.meta.field_map.remove(&field.id);
            }
            Self::SetField { old, new } => {
                // 关联字段转为文本时，将单元格中的记录 ID 转写为文本
                if old.kind.is_link() && new.kind == FieldKind::Text {
                    for record in snapshot.record_map.values_mut() {
                        if let Some(CellValue::Links(ids)) = record.cells.get(&new.id) {
                            let text = ids
                                .iter()
                                .map(|id| id.as_str())
                                .collect::<Vec<_>>()
                                .join(", ");
                            record.cells.insert(new.id.clone(), CellValue::Text(text));
                        }
                    }
                }
                snapshot.meta.field_map.insert(new.id.clone(), new.clone());
            }
        }
    }
}

fn insert_at<T>(list: &mut Vec<T>, index: Option<usize>, item: T) {
    match index {
        Some(i) => list.insert(i.min(list.len()), item),
        None => list.push(item),
    }
}
