use super::context::CommandContext;
use super::{Command, CommandKind, CommandOutput, ExecutionResult, fields, records};
use crate::changeset::{SourceType, group_by_resource};
use crate::error::{DomainError, DomainResult};
use crate::snapshot::SnapshotStore;

/// 命令分派器
///
/// 对 [`CommandKind`] 穷尽匹配执行命令，不做任何 I/O。
/// 执行失败（校验错误）时存储保持不变；成功时一次性提交全部操作，
/// 并按首次触达顺序为每个资源生成一个变更集。
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDispatcher {
    source_type: SourceType,
}

impl CommandDispatcher {
    pub fn new(source_type: SourceType) -> Self {
        Self { source_type }
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn execute(&self, command: &Command, store: &mut SnapshotStore) -> DomainResult<CommandOutput> {
        let target = command.target();
        store.state().datasheet(target)?;

        let mut ctx = CommandContext::new(store);
        let executed = match command.kind() {
            CommandKind::AddRecords(p) => records::add_records(&mut ctx, target, p),
            CommandKind::SetRecords(p) => records::set_records(&mut ctx, target, p),
            CommandKind::DeleteRecords(p) => records::delete_records(&mut ctx, target, p),
            CommandKind::AddFields(p) => fields::add_fields(&mut ctx, target, p),
            CommandKind::DeleteField(p) => fields::delete_field(&mut ctx, target, p),
            CommandKind::SetFieldAttr(p) => fields::set_field_attr(&mut ctx, target, p),
        };

        let data = match executed {
            Ok(data) => data,
            Err(DomainError::ValidationFailure { code, reason }) => {
                tracing::debug!(command = %command.name(), datasheet = %target, code, %reason, "command rejected");
                return Ok(CommandOutput {
                    result: ExecutionResult::failure(code, reason),
                    changesets: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let (working, emitted) = ctx.finish();
        if emitted.is_empty() {
            tracing::debug!(command = %command.name(), datasheet = %target, "command produced no operation");
            return Ok(CommandOutput {
                result: ExecutionResult::none(),
                changesets: Vec::new(),
            });
        }

        let state = store.state();
        let changesets = group_by_resource(emitted, self.source_type)
            .into_iter()
            .map(|cs| match state.datasheet(&cs.resource_id) {
                Ok(snapshot) => {
                    let revision = snapshot.revision;
                    cs.with_base_revision(revision)
                }
                Err(_) => cs,
            })
            .collect::<Vec<_>>();
        *store = working;

        tracing::debug!(
            command = %command.name(),
            datasheet = %target,
            changesets = changesets.len(),
            operations = changesets.iter().map(|cs| cs.len()).sum::<usize>(),
            "command executed"
        );
        Ok(CommandOutput {
            result: ExecutionResult::success(data),
            changesets,
        })
    }
}
