use super::handler::{CommandExecuted, EventHandler};
use super::registry::HandlerScope;
use crate::assembler::merge_sequence;
use crate::changeset::Changeset;
use crate::command::ExecuteOutcome;
use std::sync::{Mutex, PoisonError};

/// 收集被通知命令产生的全部操作，用于派生字段补全（enrichment）阶段
///
/// 被通知的命令执行失败时返回错误，使整个会话中止。
#[derive(Debug, Default)]
pub struct OperationCollector {
    collected: Mutex<Vec<Changeset>>,
}

impl OperationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出已收集的变更集（按资源合并），收集器随之清空
    pub fn take(&self) -> Vec<Changeset> {
        let mut guard = self.collected.lock().unwrap_or_else(PoisonError::into_inner);
        merge_sequence(std::mem::take(&mut *guard))
    }
}

impl EventHandler for OperationCollector {
    fn handler_name(&self) -> &str {
        "operation_collector"
    }

    fn handle(
        &self,
        event: &CommandExecuted<'_>,
        _scope: &mut HandlerScope<'_>,
    ) -> anyhow::Result<Vec<Changeset>> {
        if let ExecuteOutcome::Failure {
            reason_code,
            reason,
        } = &event.result.outcome
        {
            anyhow::bail!(
                "command {} failed during collection: {reason_code}: {reason}",
                event.command.name()
            );
        }

        self.collected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(event.changesets.iter().cloned());
        Ok(Vec::new())
    }
}
