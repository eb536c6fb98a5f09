//! 事件处理器（EventHandler）
//!
//! 定义在命令执行后被通知的处理逻辑与元信息（名称、订阅的命令）。
//!
use super::registry::HandlerScope;
use crate::changeset::Changeset;
use crate::command::{Command, CommandName, ExecutionResult};

#[derive(Clone, Debug)]
pub enum HandledCommands {
    One(CommandName),
    Many(Vec<CommandName>),
    All,
}

impl HandledCommands {
    pub fn matches(&self, name: CommandName) -> bool {
        match self {
            Self::One(n) => *n == name,
            Self::Many(ns) => ns.contains(&name),
            Self::All => true,
        }
    }
}

/// 命令执行完成事件
#[derive(Debug, Clone, Copy)]
pub struct CommandExecuted<'a> {
    pub command: &'a Command,
    pub result: &'a ExecutionResult,
    pub changesets: &'a [Changeset],
    /// 重入深度，顶层命令为 0
    pub depth: usize,
}

/// 事件处理器：观察命令执行，可返回需要注入的变更集，或通过 scope 重入执行命令
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于错误定位）
    fn handler_name(&self) -> &str;
    /// 返回该处理器关心的命令
    fn handled_commands(&self) -> HandledCommands {
        HandledCommands::All
    }
    /// 处理事件
    fn handle(
        &self,
        event: &CommandExecuted<'_>,
        scope: &mut HandlerScope<'_>,
    ) -> anyhow::Result<Vec<Changeset>>;
}
