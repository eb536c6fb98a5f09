//! 变更会话（MutationSession）
//!
//! 编排一次请求的完整生命周期：
//! 构建存储 → 注册处理器 → 派生字段补全 → 执行命令 → 组装变更集 →
//! 提交权威服务 → 记录来源 → 失效读缓存 → 广播 → 重建存储并读回。
//!
//! 状态机：`Built → Executing → {NoOp | Submitting → Applied | Failed}`。
//! `run` 消费会话本身，因此同一会话至多提交一次。
//!
use crate::config::MutationConfig;
use crate::context::{AppContext, AuthContext, InternalAuth, MutationContext};
use crate::error::{AppError, AppResult};
use crate::loader::{LoadRequest, StoreLoader};
use crate::ports::{ApplyRequest, AuthorityApplyResult, MutationPorts, RecordSource};
use crate::read_back::RecordsReadBack;
use bon::Builder;
use datasheet_domain::assembler::{combine_injected, merge_sequence};
use datasheet_domain::changeset::Changeset;
use datasheet_domain::command::{Command, CommandDispatcher, CommandName, ExecuteOutcome, ExecutionResult};
use datasheet_domain::datasheet::Datasheet;
use datasheet_domain::error::{DomainError, DomainResult};
use datasheet_domain::eventing::{EventHandler, OperationCollector};
use datasheet_domain::ids::{DatasheetId, RecordId, UserId, ViewId};
use datasheet_domain::snapshot::{SnapshotFilter, StoreState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Built,
    Executing,
    NoOp,
    Submitting,
    Applied,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Executing => "executing",
            Self::NoOp => "no_op",
            Self::Submitting => "submitting",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NoOp | Self::Applied | Self::Failed)
    }

    /// 状态迁移；终态不可离开，非法迁移返回 `InvalidState`
    pub fn transition(self, next: SessionState) -> DomainResult<SessionState> {
        use SessionState::*;
        match (self, next) {
            (Built, Executing)
            | (Executing, NoOp)
            | (Executing, Submitting)
            | (Executing, Failed)
            | (Submitting, Applied)
            | (Submitting, Failed) => Ok(next),
            _ => Err(DomainError::invalid_state(format!(
                "session cannot move from {self} to {next}"
            ))),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 提交后读回哪些记录
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReadBack {
    #[default]
    Skip,
    /// 本次新建的记录
    CreatedRecords,
    Records(Vec<RecordId>),
}

/// 会话执行计划
#[derive(Builder, Default)]
pub struct SessionPlan {
    /// 补全阶段命令（其操作被收集后前置到目标表变更集）
    #[builder(default)]
    pub enrichment: Vec<Command>,
    #[builder(default)]
    pub commands: Vec<Command>,
    /// 会话期间持续注册的处理器
    #[builder(default)]
    pub handlers: Vec<Arc<dyn EventHandler>>,
    pub internal_auth: Option<InternalAuth>,
    #[builder(default)]
    pub read_back: ReadBack,
    pub view_id: Option<ViewId>,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub results: Vec<ExecutionResult>,
    pub changesets: Vec<Changeset>,
    pub applied: Option<AuthorityApplyResult>,
    pub read_back: Option<RecordsReadBack>,
    /// 广播失败不回滚已提交的变更，仅在此报告
    pub broadcast_error: Option<String>,
    /// 提交后重建存储或读回失败；变更已生效，仅在此报告
    pub read_back_error: Option<String>,
    pub created_record_ids: Vec<RecordId>,
}

impl SessionOutcome {
    pub fn is_applied(&self) -> bool {
        self.state == SessionState::Applied
    }

    pub fn is_noop(&self) -> bool {
        self.state == SessionState::NoOp
    }

    pub fn acting_user_id(&self) -> Option<&UserId> {
        self.applied.as_ref()?.acting_user_id.as_ref()
    }
}

struct Executed {
    results: Vec<(CommandName, ExecutionResult)>,
    changesets: Vec<Changeset>,
}

impl Executed {
    fn created_record_ids(&self) -> Vec<RecordId> {
        self.results
            .iter()
            .filter(|(name, _)| *name == CommandName::AddRecords)
            .flat_map(|(_, result)| result.record_ids().iter().cloned())
            .collect()
    }
}

pub struct MutationSession {
    state: SessionState,
    target: DatasheetId,
    datasheet: Datasheet,
    ports: MutationPorts,
    loader: StoreLoader,
    config: MutationConfig,
    app: AppContext,
    context: MutationContext,
    load: LoadRequest,
}

impl MutationSession {
    /// 加载目标表（及关联表）并构建会话
    pub async fn open(
        ports: MutationPorts,
        config: MutationConfig,
        app: AppContext,
        context: MutationContext,
        mut load: LoadRequest,
    ) -> AppResult<Self> {
        if load.meta.is_none() {
            load.meta = context.meta.clone();
        }
        let loader = StoreLoader::new(ports.snapshots.clone(), ports.metas.clone());
        let store = loader.load(load.clone(), &app.auth).await?;
        let datasheet = Datasheet::new(store, CommandDispatcher::new(config.source_type))
            .with_max_handler_depth(config.max_handler_depth);

        Ok(Self {
            state: SessionState::Built,
            target: load.target.clone(),
            datasheet,
            ports,
            loader,
            config,
            app,
            context,
            load,
        })
    }

    pub fn target(&self) -> &DatasheetId {
        &self.target
    }

    pub fn session_state(&self) -> SessionState {
        self.state
    }

    /// 会话存储的只读视图（用于规划命令）
    pub fn state(&self) -> StoreState<'_> {
        self.datasheet.state()
    }

    pub fn context(&self) -> &MutationContext {
        &self.context
    }

    fn advance(&mut self, next: SessionState) -> AppResult<()> {
        self.state = self.state.transition(next)?;
        Ok(())
    }

    fn fail(&mut self, err: &AppError) {
        tracing::warn!(
            datasheet = %self.target,
            from = %self.state,
            code = err.reason_code(),
            "mutation session failed: {err}"
        );
        if let Ok(next) = self.state.transition(SessionState::Failed) {
            self.state = next;
        }
    }

    pub async fn run(mut self, plan: SessionPlan) -> AppResult<SessionOutcome> {
        self.advance(SessionState::Executing)?;

        let executed = match self.execute(&plan) {
            Ok(executed) => executed,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };
        let created = executed.created_record_ids();
        let results: Vec<ExecutionResult> =
            executed.results.iter().map(|(_, r)| r.clone()).collect();

        if executed.changesets.is_empty() {
            self.advance(SessionState::NoOp)?;
            tracing::info!(datasheet = %self.target, "no operation produced, skip submission");
            let read_back = match read_back_ids(&plan.read_back, &created) {
                Some(ids) => Some(RecordsReadBack::build(
                    self.datasheet.state(),
                    &self.target,
                    &ids,
                    plan.view_id.as_ref(),
                )?),
                None => None,
            };
            return Ok(SessionOutcome {
                state: self.state,
                results,
                changesets: Vec::new(),
                applied: None,
                read_back,
                broadcast_error: None,
                read_back_error: None,
                created_record_ids: created,
            });
        }

        self.advance(SessionState::Submitting)?;
        let changesets = executed.changesets;
        let applied = match self.submit(&changesets, plan.internal_auth.clone()).await {
            Ok(applied) => applied,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };
        self.advance(SessionState::Applied)?;

        self.record_provenance(&applied, &created).await;
        for cs in &changesets {
            self.ports.cache.invalidate(&cs.resource_id);
        }
        let broadcast_error = match self.ports.broadcast.notify(&self.target, &applied).await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(datasheet = %self.target, "broadcast failed after apply: {err}");
                Some(err.to_string())
            }
        };

        let mut read_back_error = None;
        let read_back = match read_back_ids(&plan.read_back, &created) {
            Some(ids) => match self.rebuild_read_back(&ids, plan.view_id.as_ref()).await {
                Ok(read_back) => Some(read_back),
                Err(err) => {
                    tracing::warn!(datasheet = %self.target, "read-back failed after apply: {err}");
                    read_back_error = Some(err.to_string());
                    None
                }
            },
            None => None,
        };

        Ok(SessionOutcome {
            state: self.state,
            results,
            changesets,
            applied: Some(applied),
            read_back,
            broadcast_error,
            read_back_error,
            created_record_ids: created,
        })
    }

    fn execute(&mut self, plan: &SessionPlan) -> AppResult<Executed> {
        let ids: Vec<_> = plan
            .handlers
            .iter()
            .map(|h| self.datasheet.add_event_handler(h.clone()))
            .collect();
        let executed = self.execute_registered(plan);
        for id in ids {
            self.datasheet.remove_event_handler(id);
        }
        executed
    }

    fn execute_registered(&mut self, plan: &SessionPlan) -> AppResult<Executed> {
        let mut injected = Vec::new();

        let enrichment = if plan.enrichment.is_empty() {
            Vec::new()
        } else {
            let collector = Arc::new(OperationCollector::new());
            let id = self.datasheet.add_event_handler(collector.clone());
            let collected = plan.enrichment.iter().try_for_each(|command| {
                let executed = self.datasheet.do_command(command)?;
                injected.extend(executed.injected);
                Ok::<_, DomainError>(())
            });
            self.datasheet.remove_event_handler(id);
            collected?;
            collector.take()
        };

        let mut results = Vec::with_capacity(plan.commands.len());
        let mut primary = Vec::new();
        for command in &plan.commands {
            let executed = self.datasheet.do_command(command)?;
            if let ExecuteOutcome::Failure {
                reason_code,
                reason,
            } = &executed.output.result.outcome
            {
                return Err(AppError::validation(reason_code.clone(), reason.clone()));
            }
            results.push((command.name(), executed.output.result));
            primary.extend(executed.output.changesets);
            injected.extend(executed.injected);
        }

        let changesets = combine_injected(merge_sequence(primary), injected)?;
        let changesets = combine_injected(changesets, enrichment)?;
        Ok(Executed {
            results,
            changesets,
        })
    }

    async fn submit(
        &self,
        changesets: &[Changeset],
        internal_auth: Option<InternalAuth>,
    ) -> AppResult<AuthorityApplyResult> {
        let auth = if internal_auth.is_some() {
            AuthContext::internal()
        } else {
            self.app.auth.clone()
        };
        tracing::info!(
            datasheet = %self.target,
            correlation_id = ?self.app.correlation_id,
            changesets = changesets.len(),
            operations = changesets.iter().map(Changeset::len).sum::<usize>(),
            internal = internal_auth.is_some(),
            "submitting changesets"
        );

        let request = ApplyRequest {
            resource_id: self.target.clone(),
            changesets: changesets.to_vec(),
            source_type: self.config.source_type,
            internal_auth,
        };
        let applied = self.ports.authority.apply(request, &auth).await?;

        tracing::info!(
            datasheet = %self.target,
            applied = applied.applied.len(),
            revisions = ?applied.applied.iter().map(|a| a.revision).collect::<Vec<_>>(),
            "changesets applied"
        );
        Ok(applied)
    }

    async fn record_provenance(&self, applied: &AuthorityApplyResult, created: &[RecordId]) {
        let source_type = self.config.source_type;
        if let Err(err) = self
            .ports
            .provenance
            .record_changeset_sources(applied, source_type)
            .await
        {
            tracing::error!(datasheet = %self.target, "record changeset sources failed: {err}");
        }

        if created.is_empty() {
            return;
        }
        let source = RecordSource {
            user_id: applied
                .acting_user_id
                .clone()
                .or_else(|| self.context.user_id.clone()),
            datasheet_id: self.target.clone(),
            source_id: self
                .context
                .source_id
                .clone()
                .or_else(|| Some(self.target.to_string())),
            record_ids: created.to_vec(),
            source_type,
        };
        if let Err(err) = self.ports.provenance.record_record_source(source).await {
            tracing::error!(datasheet = %self.target, "record record source failed: {err}");
        }
    }

    async fn rebuild_read_back(
        &self,
        record_ids: &[RecordId],
        view_id: Option<&ViewId>,
    ) -> AppResult<RecordsReadBack> {
        let filter = SnapshotFilter::builder()
            .record_ids(record_ids.to_vec())
            .maybe_linked_record_map(self.context.linked_record_map.clone())
            .build();
        let request = LoadRequest {
            filter,
            meta: None,
            ..self.load.clone()
        };
        let store = self.loader.load(request, &self.app.auth).await?;
        RecordsReadBack::build(store.state(), &self.target, record_ids, view_id)
    }
}

fn read_back_ids(read_back: &ReadBack, created: &[RecordId]) -> Option<Vec<RecordId>> {
    match read_back {
        ReadBack::Skip => None,
        ReadBack::CreatedRecords => Some(created.to_vec()),
        ReadBack::Records(ids) => Some(ids.clone()),
    }
}
