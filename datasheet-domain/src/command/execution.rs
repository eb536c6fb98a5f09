use crate::changeset::Changeset;
use crate::ids::{FieldId, RecordId};
use serde::{Deserialize, Serialize};

/// 命令执行结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecuteOutcome {
    Success,
    /// 语义上的空操作：状态未变化
    None,
    /// 载荷校验或应用失败，附带面向调用方的原因码
    Failure { reason_code: String, reason: String },
}

/// 命令返回的数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "ids", rename_all = "snake_case")]
pub enum ExecutionData {
    #[default]
    Empty,
    RecordIds(Vec<RecordId>),
    FieldIds(Vec<FieldId>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: ExecuteOutcome,
    #[serde(default)]
    pub data: ExecutionData,
}

impl ExecutionResult {
    pub fn success(data: ExecutionData) -> Self {
        Self {
            outcome: ExecuteOutcome::Success,
            data,
        }
    }

    pub fn none() -> Self {
        Self {
            outcome: ExecuteOutcome::None,
            data: ExecutionData::Empty,
        }
    }

    pub fn failure(reason_code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: ExecuteOutcome::Failure {
                reason_code: reason_code.into(),
                reason: reason.into(),
            },
            data: ExecutionData::Empty,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExecuteOutcome::Success)
    }

    pub fn is_none(&self) -> bool {
        matches!(self.outcome, ExecuteOutcome::None)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ExecuteOutcome::Failure { .. })
    }

    pub fn record_ids(&self) -> &[RecordId] {
        match &self.data {
            ExecutionData::RecordIds(ids) => ids,
            _ => &[],
        }
    }

    pub fn field_ids(&self) -> &[FieldId] {
        match &self.data {
            ExecutionData::FieldIds(ids) => ids,
            _ => &[],
        }
    }
}

/// 分派器输出：执行结果 + 按资源划分的变更集
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub result: ExecutionResult,
    pub changesets: Vec<Changeset>,
}
