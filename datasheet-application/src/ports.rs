//! 外部协作方（Ports）
//!
//! 快照/元数据来源、权威服务、来源记录、广播、配额通知与读缓存，
//! 均以 `Arc<dyn Trait>` 注入，核心不绑定任何传输实现。
//!
use crate::context::{AuthContext, InternalAuth, InternalFix};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use datasheet_domain::changeset::{Changeset, SourceType};
use datasheet_domain::ids::{DatasheetId, RecordId, UserId};
use datasheet_domain::operation::Operation;
use datasheet_domain::snapshot::{DatasheetPack, Meta, SnapshotFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(
        &self,
        datasheet_id: &DatasheetId,
        auth: &AuthContext,
        filter: &SnapshotFilter,
    ) -> AppResult<Option<DatasheetPack>>;
}

#[async_trait]
pub trait MetaSource: Send + Sync {
    async fn fetch_meta(&self, datasheet_id: &DatasheetId) -> AppResult<Option<Meta>>;
}

/// 提交给权威服务的请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub resource_id: DatasheetId,
    pub changesets: Vec<Changeset>,
    pub source_type: SourceType,
    pub internal_auth: Option<InternalAuth>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChangeset {
    pub resource_id: DatasheetId,
    pub revision: u64,
    pub message_id: String,
    pub user_id: Option<UserId>,
    pub operations: Vec<Operation>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorityApplyResult {
    pub applied: Vec<AppliedChangeset>,
    pub acting_user_id: Option<UserId>,
}

/// 权威排序服务；拒绝以 `ApplyRejected` 返回，核心不重试
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn apply(&self, request: ApplyRequest, auth: &AuthContext) -> AppResult<AuthorityApplyResult>;
}

/// 新建记录的来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSource {
    pub user_id: Option<UserId>,
    pub datasheet_id: DatasheetId,
    pub source_id: Option<String>,
    pub record_ids: Vec<RecordId>,
    pub source_type: SourceType,
}

#[async_trait]
pub trait ProvenanceRecorder: Send + Sync {
    async fn record_record_source(&self, source: RecordSource) -> AppResult<()>;

    async fn record_changeset_sources(
        &self,
        result: &AuthorityApplyResult,
        source_type: SourceType,
    ) -> AppResult<()>;
}

#[async_trait]
pub trait BroadcastNotifier: Send + Sync {
    async fn notify(&self, resource_id: &DatasheetId, result: &AuthorityApplyResult) -> AppResult<()>;
}

/// 记录数配额通知的内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuotaNotice {
    pub space_id: Option<String>,
    pub datasheet_id: DatasheetId,
    pub user_id: Option<UserId>,
    pub total: usize,
    pub max: usize,
}

#[async_trait]
pub trait QuotaNotifier: Send + Sync {
    async fn remind_soon_limit(&self, notice: &RecordQuotaNotice) -> AppResult<()>;

    async fn notify_out_of_limit(&self, notice: &RecordQuotaNotice) -> AppResult<()>;
}

pub trait ReadCache: Send + Sync {
    fn invalidate(&self, datasheet_id: &DatasheetId);
}

/// 内部修复权限的决策点
pub trait InternalFixGate: Send + Sync {
    fn authorize(&self, auth: &AuthContext, datasheet_id: &DatasheetId, fix: &InternalFix) -> AppResult<()>;
}

/// 默认拒绝所有内部修复
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyInternalFix;

impl InternalFixGate for DenyInternalFix {
    fn authorize(&self, _auth: &AuthContext, datasheet_id: &DatasheetId, _fix: &InternalFix) -> AppResult<()> {
        Err(AppError::Authorization(format!(
            "internal fix is not allowed on datasheet {datasheet_id}"
        )))
    }
}

/// 放行所有内部修复（仅用于受信部署）
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowInternalFix;

impl InternalFixGate for AllowInternalFix {
    fn authorize(&self, _auth: &AuthContext, _datasheet_id: &DatasheetId, _fix: &InternalFix) -> AppResult<()> {
        Ok(())
    }
}

/// 一次变更会话依赖的外部协作方
#[derive(Builder, Clone)]
pub struct MutationPorts {
    pub snapshots: Arc<dyn SnapshotSource>,
    pub metas: Arc<dyn MetaSource>,
    pub authority: Arc<dyn AuthorityClient>,
    pub provenance: Arc<dyn ProvenanceRecorder>,
    pub broadcast: Arc<dyn BroadcastNotifier>,
    pub cache: Arc<dyn ReadCache>,
}
