//! 领域层统一错误定义
//!
//! 覆盖快照构建、命令分派、事件处理与变更集组装环节，
//! 每个变体都提供稳定的 `reason_code`，供接口层映射为传输层状态码。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 快照/资源 ---
    #[error("not found: {reason}")]
    NotFound { reason: String },

    // --- 命令 ---
    #[error("unsupported command: {name}")]
    UnsupportedCommand { name: String },
    #[error("validation failure: code={code}, reason={reason}")]
    ValidationFailure { code: &'static str, reason: String },

    // --- 事件处理/变更集组装 ---
    #[error("missing resource changeset: resource={resource_id}, pending_operations={pending_operations}")]
    MissingResourceChangeset {
        resource_id: String,
        pending_operations: usize,
    },
    #[error("event handler error: handler={handler}, reason={reason}")]
    EventHandler { handler: String, reason: String },
    #[error("handler depth exceeded: max_depth={max_depth}")]
    HandlerDepthExceeded { max_depth: usize },

    // --- 状态 ---
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
}

impl DomainError {
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }

    pub fn validation(code: &'static str, reason: impl Into<String>) -> Self {
        Self::ValidationFailure {
            code,
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// 稳定的原因码（不随错误文案变化）
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Serde { .. } => "serialization_error",
            Self::NotFound { .. } => "not_found",
            Self::UnsupportedCommand { .. } => "unsupported_command",
            Self::ValidationFailure { code, .. } => *code,
            Self::MissingResourceChangeset { .. } => "missing_resource_changeset",
            Self::EventHandler { .. } => "event_handler_failed",
            Self::HandlerDepthExceeded { .. } => "handler_depth_exceeded",
            Self::InvalidState { .. } => "invalid_state",
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;
