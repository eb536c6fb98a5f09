//! 读回（Read-back）
//!
//! 由快照存储构建记录视图对象：单元格以字段名为键，列限定为视图的列。
//!
use crate::dto::Dto;
use crate::error::{AppError, AppResult};
use datasheet_domain::ids::{DatasheetId, RecordId, ViewId};
use datasheet_domain::snapshot::{CellValue, StoreState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordVo {
    pub record_id: RecordId,
    pub fields: BTreeMap<String, CellValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordsReadBack {
    pub datasheet_id: DatasheetId,
    pub revision: u64,
    pub records: Vec<RecordVo>,
}

impl Dto for RecordsReadBack {}

impl RecordsReadBack {
    /// 按 `record_ids` 顺序读回记录；未加载的记录被跳过
    ///
    /// `view_id` 为空时使用默认视图的列。
    pub fn build(
        state: StoreState<'_>,
        datasheet_id: &DatasheetId,
        record_ids: &[RecordId],
        view_id: Option<&ViewId>,
    ) -> AppResult<Self> {
        let snapshot = state.datasheet(datasheet_id)?;
        let view = match view_id {
            Some(id) => snapshot
                .view(id)
                .ok_or_else(|| AppError::NotFound(format!("view {id} of datasheet {datasheet_id}")))?,
            None => snapshot
                .meta
                .default_view()
                .ok_or_else(|| AppError::NotFound(format!("default view of datasheet {datasheet_id}")))?,
        };

        let records = record_ids
            .iter()
            .filter_map(|id| snapshot.record(id))
            .map(|record| RecordVo {
                record_id: record.id.clone(),
                fields: view
                    .columns
                    .iter()
                    .filter_map(|field_id| {
                        let field = snapshot.field(field_id)?;
                        let value = record.cell(field_id)?;
                        Some((field.name.clone(), value.clone()))
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            datasheet_id: datasheet_id.clone(),
            revision: snapshot.revision,
            records,
        })
    }

    pub fn record_ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.record_id.clone()).collect()
    }
}
