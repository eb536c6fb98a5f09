use crate::ids::{DatasheetId, RecordId};
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 快照加载过滤条件
///
/// - `record_ids`：仅加载主表的这些记录（`None` 表示全部加载）；
/// - `linked_record_map`：关联表需要加载的记录（按表 ID 分组）。
#[derive(Builder, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    record_ids: Option<Vec<RecordId>>,
    linked_record_map: Option<BTreeMap<DatasheetId, Vec<RecordId>>>,
}

impl SnapshotFilter {
    /// 不加载任何记录（仅元数据）
    pub fn meta_only() -> Self {
        Self {
            record_ids: Some(Vec::new()),
            linked_record_map: None,
        }
    }

    pub fn record_ids(&self) -> Option<&[RecordId]> {
        self.record_ids.as_deref()
    }

    pub fn linked_record_map(&self) -> Option<&BTreeMap<DatasheetId, Vec<RecordId>>> {
        self.linked_record_map.as_ref()
    }

    pub fn linked_records(&self, datasheet_id: &DatasheetId) -> Option<&[RecordId]> {
        self.linked_record_map
            .as_ref()
            .and_then(|m| m.get(datasheet_id))
            .map(Vec::as_slice)
    }

    /// 判断主表 / 关联表中的记录是否应被保留
    pub(crate) fn keeps(&self, primary: bool, datasheet_id: &DatasheetId, record_id: &RecordId) -> bool {
        let allowed = if primary {
            self.record_ids()
        } else {
            self.linked_records(datasheet_id)
        };
        allowed.is_none_or(|ids| ids.contains(record_id))
    }
}
