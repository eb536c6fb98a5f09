use super::handler::{CommandExecuted, EventHandler};
use crate::changeset::Changeset;
use crate::command::{Command, CommandDispatcher, CommandName};
use crate::datasheet::ExecutedCommand;
use crate::error::{DomainError, DomainResult};
use crate::snapshot::{SnapshotStore, StoreState};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// 会话级处理器注册表：按注册顺序通知
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: u64,
    handlers: Vec<(HandlerId, Arc<dyn EventHandler>)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.push((id, handler));
        id
    }

    /// 注销处理器，返回是否存在
    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(hid, _)| *hid != id);
        self.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn matching(&self, name: CommandName) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .iter()
            .filter(|(_, h)| h.handled_commands().matches(name))
            .map(|(_, h)| h.clone())
            .collect()
    }

    /// 依注册顺序通知处理器，收集注入的变更集；任一处理器出错即中止
    pub(crate) fn notify(
        &self,
        event: &CommandExecuted<'_>,
        scope: &mut HandlerScope<'_>,
    ) -> DomainResult<Vec<Changeset>> {
        let mut injected = Vec::new();
        for handler in self.matching(event.command.name()) {
            let name = handler.handler_name();
            tracing::debug!(handler = name, command = %event.command.name(), depth = event.depth, "notify handler");
            let out = handler
                .handle(event, scope)
                .map_err(|e| handler_error(name, e))?;
            injected.extend(out);
        }
        Ok(injected)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|(id, h)| (id, h.handler_name())))
            .finish()
    }
}

/// 处理器返回的领域错误原样透传（如深度超限），其余包装为 `EventHandler`
fn handler_error(handler: &str, err: anyhow::Error) -> DomainError {
    match err.downcast::<DomainError>() {
        Ok(domain) => domain,
        Err(other) => DomainError::EventHandler {
            handler: handler.to_string(),
            reason: format!("{other:#}"),
        },
    }
}

/// 处理器的执行范围：可读取当前存储状态，并可重入执行命令
pub struct HandlerScope<'a> {
    store: &'a mut SnapshotStore,
    dispatcher: &'a CommandDispatcher,
    registry: &'a HandlerRegistry,
    depth: usize,
    max_depth: usize,
}

impl HandlerScope<'_> {
    pub fn state(&self) -> StoreState<'_> {
        self.store.state()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 在同一存储上重入执行命令（深度 + 1），并再次通知处理器
    pub fn do_command(&mut self, command: &Command) -> DomainResult<ExecutedCommand> {
        execute_and_notify(
            self.store,
            self.dispatcher,
            self.registry,
            command,
            self.depth + 1,
            self.max_depth,
        )
    }
}

pub(crate) fn execute_and_notify(
    store: &mut SnapshotStore,
    dispatcher: &CommandDispatcher,
    registry: &HandlerRegistry,
    command: &Command,
    depth: usize,
    max_depth: usize,
) -> DomainResult<ExecutedCommand> {
    if depth > max_depth {
        tracing::warn!(command = %command.name(), depth, max_depth, "handler re-entry too deep");
        return Err(DomainError::HandlerDepthExceeded { max_depth });
    }

    let output = dispatcher.execute(command, store)?;
    let event = CommandExecuted {
        command,
        result: &output.result,
        changesets: &output.changesets,
        depth,
    };
    let mut scope = HandlerScope {
        store,
        dispatcher,
        registry,
        depth,
        max_depth,
    };
    let injected = registry.notify(&event, &mut scope)?;

    Ok(ExecutedCommand { output, injected })
}
