//! 变更集（Changeset）
//!
//! 作用于单个数据表的有序操作批次，作为一个整体提交给权威服务。
//!
use crate::ids::DatasheetId;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 变更来源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    OpenApi,
    Collaborator,
    InternalFix,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenApi => "open_api",
            Self::Collaborator => "collaborator",
            Self::InternalFix => "internal_fix",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub resource_id: DatasheetId,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub source_type: SourceType,
    /// 生成该变更集时所基于的快照版本
    #[serde(default)]
    pub base_revision: Option<u64>,
}

impl Changeset {
    pub fn new(resource_id: DatasheetId, source_type: SourceType) -> Self {
        Self {
            resource_id,
            operations: Vec::new(),
            source_type,
            base_revision: None,
        }
    }

    pub fn with_base_revision(mut self, revision: u64) -> Self {
        self.base_revision = Some(revision);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// 按资源分组并保持首次出现顺序（同一资源的操作按原顺序拼接）
pub(crate) fn group_by_resource(
    entries: impl IntoIterator<Item = (DatasheetId, Operation)>,
    source_type: SourceType,
) -> Vec<Changeset> {
    let mut out: Vec<Changeset> = Vec::new();
    for (resource_id, op) in entries {
        match out.iter_mut().find(|cs| cs.resource_id == resource_id) {
            Some(cs) => cs.operations.push(op),
            None => {
                let mut cs = Changeset::new(resource_id, source_type);
                cs.operations.push(op);
                out.push(cs);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Record;

    fn add(id: &str) -> Operation {
        Operation::AddRecord {
            record: Record {
                id: id.into(),
                ..Default::default()
            },
            index: None,
        }
    }

    #[test]
    fn group_keeps_first_touch_order_per_resource() {
        let grouped = group_by_resource(
            vec![
                ("dst2".into(), add("r1")),
                ("dst1".into(), add("r2")),
                ("dst2".into(), add("r3")),
            ],
            SourceType::OpenApi,
        );

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].resource_id, DatasheetId::from("dst2"));
        assert_eq!(grouped[0].operations, vec![add("r1"), add("r3")]);
        assert_eq!(grouped[1].operations, vec![add("r2")]);
    }

    #[test]
    fn source_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SourceType::InternalFix).unwrap(),
            "\"internal_fix\""
        );
        assert_eq!(SourceType::default().to_string(), "open_api");
    }
}
