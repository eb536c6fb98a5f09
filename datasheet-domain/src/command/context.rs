use crate::error::DomainResult;
use crate::ids::{DatasheetId, FieldId, RecordId};
use crate::operation::Operation;
use crate::snapshot::{CellValue, Field, FieldKind, SnapshotStore, StoreState};

/// 命令执行上下文
///
/// 命令逻辑在存储的工作副本上逐条产生并应用操作，执行成功后由分派器整体提交；
/// 失败时工作副本被丢弃，原存储保持不变。
pub(crate) struct CommandContext {
    working: SnapshotStore,
    emitted: Vec<(DatasheetId, Operation)>,
}

impl CommandContext {
    pub(crate) fn new(store: &SnapshotStore) -> Self {
        Self {
            working: store.clone(),
            emitted: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> StoreState<'_> {
        self.working.state()
    }

    pub(crate) fn emit(&mut self, resource_id: &DatasheetId, op: Operation) -> DomainResult<()> {
        self.working.apply(resource_id, std::slice::from_ref(&op))?;
        self.emitted.push((resource_id.clone(), op));
        Ok(())
    }

    pub(crate) fn finish(self) -> (SnapshotStore, Vec<(DatasheetId, Operation)>) {
        (self.working, self.emitted)
    }

    /// 同步关联字段的反向引用：`old` → `new` 的差异写入外表兄弟字段
    ///
    /// 外表未加载、无兄弟字段或外表记录未加载时跳过。
    pub(crate) fn sync_back_links(
        &mut self,
        target: &DatasheetId,
        field: &Field,
        record_id: &RecordId,
        old: &[RecordId],
        new: &[RecordId],
    ) -> DomainResult<()> {
        let Some((foreign, Some(brother))) = field.link_target() else {
            return Ok(());
        };
        if foreign == target || !self.state().contains(foreign) {
            return Ok(());
        }
        let (foreign, brother) = (foreign.clone(), brother.clone());

        let added = new.iter().filter(|id| !old.contains(id));
        let removed = old.iter().filter(|id| !new.contains(id));
        let changes: Vec<(RecordId, bool)> = added
            .map(|id| (id.clone(), true))
            .chain(removed.map(|id| (id.clone(), false)))
            .collect();

        for (foreign_record, link) in changes {
            self.set_back_link(&foreign, &brother, &foreign_record, record_id, link)?;
        }
        Ok(())
    }

    fn set_back_link(
        &mut self,
        foreign: &DatasheetId,
        brother: &FieldId,
        foreign_record: &RecordId,
        record_id: &RecordId,
        link: bool,
    ) -> DomainResult<()> {
        let state = self.state();
        let Some(record) = state.record(foreign, foreign_record) else {
            return Ok(());
        };
        if !state
            .field(foreign, brother)
            .is_some_and(|f| matches!(f.kind, FieldKind::Link { .. }))
        {
            return Ok(());
        }

        let old = record.cell(brother).cloned();
        let mut ids = old.as_ref().map(|v| v.links().to_vec()).unwrap_or_default();
        match (link, ids.contains(record_id)) {
            (true, false) => ids.push(record_id.clone()),
            (false, true) => ids.retain(|id| id != record_id),
            _ => return Ok(()),
        }
        let new = (!ids.is_empty()).then_some(CellValue::Links(ids));

        self.emit(
            foreign,
            Operation::SetCell {
                record_id: foreign_record.clone(),
                field_id: brother.clone(),
                old,
                new,
            },
        )
    }
}
