use super::filter::SnapshotFilter;
use super::model::{DatasheetPack, DatasheetSnapshot, Field, Record, View};
use crate::error::{DomainError, DomainResult};
use crate::ids::{DatasheetId, FieldId, RecordId, ViewId};
use crate::operation::Operation;
use std::collections::BTreeMap;

/// 快照存储：一次获取（fetch）范围内的可变内存投影
///
/// - 第一个数据包为主表，其余为关联表；
/// - 对外只暴露只读视图 [`StoreState`]，变更只能经由命令分派器以操作形式应用；
/// - 存储永远不是记录系统，变更集被权威服务接受之前修改只在本实例可见。
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    primary: DatasheetId,
    datasheets: BTreeMap<DatasheetId, DatasheetSnapshot>,
    filter: SnapshotFilter,
}

impl SnapshotStore {
    /// 由原始数据包与过滤条件构建存储
    pub fn build(packs: Vec<DatasheetPack>, filter: SnapshotFilter) -> DomainResult<Self> {
        let mut packs = packs.into_iter();
        let Some(first) = packs.next() else {
            return Err(DomainError::not_found("no datasheet pack to build store from"));
        };

        let primary = first.datasheet_id.clone();
        let mut datasheets = BTreeMap::new();

        for (is_primary, pack) in std::iter::once((true, first)).chain(packs.map(|p| (false, p))) {
            let snapshot = Self::project(is_primary, pack, &filter)?;
            datasheets
                .entry(snapshot.datasheet_id.clone())
                .or_insert(snapshot);
        }

        Ok(Self {
            primary,
            datasheets,
            filter,
        })
    }

    fn project(
        is_primary: bool,
        pack: DatasheetPack,
        filter: &SnapshotFilter,
    ) -> DomainResult<DatasheetSnapshot> {
        let Some(meta) = pack.meta else {
            return Err(DomainError::not_found(format!(
                "meta of datasheet {} is missing",
                pack.datasheet_id
            )));
        };

        let record_map = pack
            .records
            .into_iter()
            .filter(|r| filter.keeps(is_primary, &pack.datasheet_id, &r.id))
            .map(|r| (r.id.clone(), r))
            .collect();

        Ok(DatasheetSnapshot {
            datasheet_id: pack.datasheet_id,
            name: pack.name,
            revision: pack.revision,
            meta,
            record_map,
        })
    }

    pub fn primary_id(&self) -> &DatasheetId {
        &self.primary
    }

    pub fn filter(&self) -> &SnapshotFilter {
        &self.filter
    }

    /// 只读视图
    pub fn state(&self) -> StoreState<'_> {
        StoreState {
            primary: &self.primary,
            datasheets: &self.datasheets,
        }
    }

    /// 应用一批操作到指定数据表（仅命令分派器可调用）
    pub(crate) fn apply(&mut self, resource_id: &DatasheetId, operations: &[Operation]) -> DomainResult<()> {
        let Some(snapshot) = self.datasheets.get_mut(resource_id) else {
            return Err(DomainError::not_found(format!(
                "datasheet {resource_id} is not loaded in store"
            )));
        };
        for op in operations {
            op.apply_to(snapshot);
        }
        Ok(())
    }
}

/// 存储的只读视图
#[derive(Debug, Clone, Copy)]
pub struct StoreState<'a> {
    primary: &'a DatasheetId,
    datasheets: &'a BTreeMap<DatasheetId, DatasheetSnapshot>,
}

impl<'a> StoreState<'a> {
    pub fn primary_id(&self) -> &'a DatasheetId {
        self.primary
    }

    pub fn contains(&self, datasheet_id: &DatasheetId) -> bool {
        self.datasheets.contains_key(datasheet_id)
    }

    pub fn datasheet_ids(self) -> impl Iterator<Item = &'a DatasheetId> + 'a {
        self.datasheets.keys()
    }

    pub fn datasheet(&self, datasheet_id: &DatasheetId) -> DomainResult<&'a DatasheetSnapshot> {
        self.datasheets
            .get(datasheet_id)
            .ok_or_else(|| DomainError::not_found(format!("datasheet {datasheet_id} not found")))
    }

    pub fn primary(&self) -> DomainResult<&'a DatasheetSnapshot> {
        self.datasheet(self.primary)
    }

    pub fn field(&self, datasheet_id: &DatasheetId, field_id: &FieldId) -> Option<&'a Field> {
        self.datasheets.get(datasheet_id)?.field(field_id)
    }

    pub fn record(&self, datasheet_id: &DatasheetId, record_id: &RecordId) -> Option<&'a Record> {
        self.datasheets.get(datasheet_id)?.record(record_id)
    }

    pub fn default_view(&self, datasheet_id: &DatasheetId) -> Option<&'a View> {
        self.datasheets.get(datasheet_id)?.meta.default_view()
    }

    pub fn view(&self, datasheet_id: &DatasheetId, view_id: &ViewId) -> Option<&'a View> {
        self.datasheets.get(datasheet_id)?.view(view_id)
    }

    pub fn record_count(&self, datasheet_id: &DatasheetId) -> usize {
        self.datasheets
            .get(datasheet_id)
            .map_or(0, DatasheetSnapshot::record_count)
    }
}
