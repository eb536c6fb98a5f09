//! 变更管线配置
//!
//! 默认值 → JSON 配置 → 环境变量覆盖（非法值忽略并告警）。
//!
use crate::error::{AppError, AppResult};
use bon::Builder;
use datasheet_domain::changeset::SourceType;
use serde::{Deserialize, Serialize};

pub const ENV_MAX_RECORD_COUNT: &str = "DATASHEET_MAX_RECORD_COUNT";
pub const ENV_RECORD_REMIND_RANGE: &str = "DATASHEET_RECORD_REMIND_RANGE";
pub const ENV_MAX_HANDLER_DEPTH: &str = "DATASHEET_MAX_HANDLER_DEPTH";

/// 单表记录数上限；达到 `max * range / 100` 时提醒
#[derive(Builder, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordLimitConfig {
    #[builder(default = 50_000)]
    pub max_record_count: usize,
    /// 百分比
    #[builder(default = 90)]
    pub record_remind_range: usize,
}

impl Default for RecordLimitConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RecordLimitConfig {
    /// `total / max >= range / 100`，在 u128 上交叉相乘，不取整也不溢出
    pub fn should_remind(&self, total: usize) -> bool {
        total <= self.max_record_count
            && total as u128 * 100 >= self.max_record_count as u128 * self.record_remind_range as u128
    }
}

#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    #[builder(default)]
    pub record_limit: RecordLimitConfig,
    #[builder(default = 8)]
    pub max_handler_depth: usize,
    #[builder(default)]
    pub source_type: SourceType,
    #[builder(default = 1024)]
    pub broadcast_capacity: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MutationConfig {
    pub fn from_json(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw).map_err(|e| AppError::Infra(format!("invalid mutation config: {e}")))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// 以任意键值来源覆盖配置
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = parse_var(&lookup, ENV_MAX_RECORD_COUNT) {
            self.record_limit.max_record_count = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_RECORD_REMIND_RANGE) {
            if value <= 100 {
                self.record_limit.record_remind_range = value;
            } else {
                tracing::warn!("invalid {ENV_RECORD_REMIND_RANGE}, ignoring: {value} > 100");
            }
        }
        if let Some(value) = parse_var(&lookup, ENV_MAX_HANDLER_DEPTH) {
            self.max_handler_depth = value;
        }
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<usize>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("invalid {key}, ignoring: {err}");
            None
        }
    }
}
