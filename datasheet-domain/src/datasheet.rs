//! 会话数据表（Datasheet）
//!
//! 将快照存储、命令分派器与处理器注册表绑定为一次会话的执行入口：
//! 每次 `do_command` 之后同步通知已注册的处理器。
//!
use crate::assembler::combine_injected;
use crate::changeset::Changeset;
use crate::command::{Command, CommandDispatcher, CommandOutput, ExecutionResult};
use crate::error::DomainResult;
use crate::eventing::registry::execute_and_notify;
use crate::eventing::{EventHandler, HandlerId, HandlerRegistry};
use crate::ids::DatasheetId;
use crate::snapshot::{SnapshotStore, StoreState};
use std::sync::Arc;

/// 一次命令执行（含处理器通知）的输出
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCommand {
    pub output: CommandOutput,
    /// 处理器注入的变更集，按注册顺序
    pub injected: Vec<Changeset>,
}

impl ExecutedCommand {
    pub fn result(&self) -> &ExecutionResult {
        &self.output.result
    }

    /// 组装最终变更集：注入操作前置
    pub fn into_changesets(self) -> DomainResult<Vec<Changeset>> {
        combine_injected(self.output.changesets, self.injected)
    }
}

#[derive(Debug)]
pub struct Datasheet {
    store: SnapshotStore,
    dispatcher: CommandDispatcher,
    registry: HandlerRegistry,
    max_handler_depth: usize,
}

impl Datasheet {
    pub const DEFAULT_MAX_HANDLER_DEPTH: usize = 8;

    pub fn new(store: SnapshotStore, dispatcher: CommandDispatcher) -> Self {
        Self {
            store,
            dispatcher,
            registry: HandlerRegistry::new(),
            max_handler_depth: Self::DEFAULT_MAX_HANDLER_DEPTH,
        }
    }

    pub fn with_max_handler_depth(mut self, max_handler_depth: usize) -> Self {
        self.max_handler_depth = max_handler_depth;
        self
    }

    pub fn id(&self) -> &DatasheetId {
        self.store.primary_id()
    }

    pub fn state(&self) -> StoreState<'_> {
        self.store.state()
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn into_store(self) -> SnapshotStore {
        self.store
    }

    pub fn add_event_handler(&mut self, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.registry.add(handler)
    }

    pub fn remove_event_handler(&mut self, id: HandlerId) -> bool {
        self.registry.remove(id)
    }

    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    pub fn do_command(&mut self, command: &Command) -> DomainResult<ExecutedCommand> {
        execute_and_notify(
            &mut self.store,
            &self.dispatcher,
            &self.registry,
            command,
            0,
            self.max_handler_depth,
        )
    }
}
