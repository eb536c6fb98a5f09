use datasheet_domain::error::DomainError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failure: code={code}, reason={reason}")]
    ValidationFailure { code: String, reason: String },

    #[error("apply rejected: {reason}")]
    ApplyRejected { reason: String },

    #[error("quota exceeded: datasheet={datasheet_id}, total={total}, max={max}")]
    QuotaExceeded {
        datasheet_id: String,
        total: usize,
        max: usize,
    },

    #[error("broadcast failure: {0}")]
    BroadcastFailure(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("infra: {0}")]
    Infra(String),
}

impl AppError {
    pub fn validation(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailure {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// 稳定的原因码，供接口层映射传输层状态码
    pub fn reason_code(&self) -> &str {
        match self {
            Self::Domain(DomainError::NotFound { .. }) | Self::NotFound(_) => "not_found",
            Self::Domain(e) => e.reason_code(),
            Self::ValidationFailure { code, .. } => code,
            Self::ApplyRejected { .. } => "apply_rejected",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::BroadcastFailure(_) => "broadcast_failure",
            Self::Authorization(_) => "authorization",
            Self::Infra(_) => "infra",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
