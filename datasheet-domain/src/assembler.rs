//! 变更集组装（Assembler）
//!
//! 将命令产生的原始变更集与处理器注入的操作合并：注入操作排在命令操作之前。
//!
use crate::changeset::Changeset;
use crate::error::{DomainError, DomainResult};
use crate::ids::DatasheetId;
use crate::operation::Operation;

/// 将处理器操作前置到 `resource_id` 对应的变更集
///
/// - `primary` 为空：视为空操作，处理器操作被丢弃；
/// - 处理器操作非空但找不到对应资源的变更集：`MissingResourceChangeset`。
pub fn combine(
    mut primary: Vec<Changeset>,
    handler_operations: Vec<Operation>,
    resource_id: &DatasheetId,
) -> DomainResult<Vec<Changeset>> {
    if primary.is_empty() {
        if !handler_operations.is_empty() {
            tracing::debug!(
                resource_id = %resource_id,
                dropped = handler_operations.len(),
                "no primary changeset, handler operations dropped"
            );
        }
        return Ok(primary);
    }
    if handler_operations.is_empty() {
        return Ok(primary);
    }

    let Some(target) = primary.iter_mut().find(|cs| &cs.resource_id == resource_id) else {
        let resources: Vec<String> = primary.iter().map(|cs| cs.resource_id.to_string()).collect();
        tracing::error!(
            resource_id = %resource_id,
            pending_operations = handler_operations.len(),
            primary_resources = ?resources,
            "handler operations have no matching changeset"
        );
        return Err(DomainError::MissingResourceChangeset {
            resource_id: resource_id.to_string(),
            pending_operations: handler_operations.len(),
        });
    };

    let mut operations = handler_operations;
    operations.append(&mut target.operations);
    target.operations = operations;
    Ok(primary)
}

/// 将注入的变更集（按资源分组后）逐个并入 `primary`
pub fn combine_injected(
    primary: Vec<Changeset>,
    injected: Vec<Changeset>,
) -> DomainResult<Vec<Changeset>> {
    merge_sequence(injected)
        .into_iter()
        .try_fold(primary, |acc, cs| combine(acc, cs.operations, &cs.resource_id))
}

/// 按资源合并一组变更集，保持执行顺序；基准版本取首个变更集的版本
pub fn merge_sequence(changesets: impl IntoIterator<Item = Changeset>) -> Vec<Changeset> {
    let mut merged: Vec<Changeset> = Vec::new();
    for mut cs in changesets {
        match merged.iter_mut().find(|m| m.resource_id == cs.resource_id) {
            Some(existing) => existing.operations.append(&mut cs.operations),
            None => merged.push(cs),
        }
    }
    merged.retain(|cs| !cs.is_empty());
    merged
}
