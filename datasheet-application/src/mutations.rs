//! 数据表变更服务（DatasheetMutations）
//!
//! 在变更会话之上提供请求级操作：新增/更新/删除记录、字段增删、
//! 自定义命令执行以及读取路径。
//!
//! 每个写操作对应一次（或按顺序的多次）会话提交；读取路径只加载快照，不提交。
//!
use crate::cache::{InMemoryProjectionCache, ProjectionKey, ReadCacheChain};
use crate::config::MutationConfig;
use crate::context::{AppContext, InternalFix, MutationContext};
use crate::dto::{AddRecordsRequest, Conversion, FieldVo, UpdateRecordsRequest, ViewVo};
use crate::error::{AppError, AppResult};
use crate::loader::{LoadRequest, StoreLoader};
use crate::ports::{
    DenyInternalFix, InternalFixGate, MutationPorts, QuotaNotifier, ReadCache, RecordQuotaNotice,
};
use crate::quota::check_record_quota;
use crate::read_back::RecordsReadBack;
use crate::session::{MutationSession, ReadBack, SessionOutcome, SessionPlan};
use crate::transform::{enrich_select_fields, enrichment_commands, to_cell_updates, to_record_inputs};
use datasheet_domain::command::{AddRecordsPayload, Command, CommandKind, DeleteFieldData, FieldInput};
use datasheet_domain::ids::{DatasheetId, FieldId, RecordId, ViewId};
use datasheet_domain::snapshot::{DatasheetSnapshot, FieldKind, SnapshotFilter, SnapshotStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct DatasheetMutations {
    ports: MutationPorts,
    quota: Arc<dyn QuotaNotifier>,
    fix_gate: Arc<dyn InternalFixGate>,
    config: MutationConfig,
    projections: Arc<InMemoryProjectionCache>,
}

impl DatasheetMutations {
    pub fn new(ports: MutationPorts, quota: Arc<dyn QuotaNotifier>, config: MutationConfig) -> Self {
        Self {
            ports,
            quota,
            fix_gate: Arc::new(DenyInternalFix),
            config,
            projections: Arc::new(InMemoryProjectionCache::new()),
        }
    }

    pub fn with_fix_gate(mut self, gate: Arc<dyn InternalFixGate>) -> Self {
        self.fix_gate = gate;
        self
    }

    pub fn with_projection_cache(mut self, cache: Arc<InMemoryProjectionCache>) -> Self {
        self.projections = cache;
        self
    }

    pub fn projections(&self) -> &InMemoryProjectionCache {
        &self.projections
    }

    fn loader(&self) -> StoreLoader {
        StoreLoader::new(self.ports.snapshots.clone(), self.ports.metas.clone())
    }

    async fn open(
        &self,
        app: &AppContext,
        context: MutationContext,
        load: LoadRequest,
    ) -> AppResult<MutationSession> {
        // 投影缓存与外部读缓存一起在广播之前失效
        let cache = ReadCacheChain::new([
            self.ports.cache.clone(),
            self.projections.clone() as Arc<dyn ReadCache>,
        ]);
        let ports = MutationPorts {
            cache: Arc::new(cache),
            ..self.ports.clone()
        };
        MutationSession::open(ports, self.config.clone(), app.clone(), context, load).await
    }

    /// 新增记录：配额检查 → 选项补全 → `AddRecords` → 读回新建记录
    pub async fn add_records(
        &self,
        app: &AppContext,
        datasheet_id: &DatasheetId,
        request: AddRecordsRequest,
        context: MutationContext,
    ) -> AppResult<SessionOutcome> {
        tracing::info!(datasheet = %datasheet_id, records = request.records.len(), "adding records");

        let filter = SnapshotFilter::builder()
            .record_ids(Vec::new())
            .maybe_linked_record_map(context.linked_record_map.clone())
            .build();
        let load = LoadRequest::builder()
            .target(datasheet_id.clone())
            .include_links(true)
            .filter(filter)
            .build();
        let session = self.open(app, context, load).await?;

        let notice = {
            let snapshot = session.state().primary()?;
            RecordQuotaNotice {
                space_id: session.context().space_id.clone(),
                datasheet_id: datasheet_id.clone(),
                user_id: session
                    .context()
                    .user_id
                    .clone()
                    .or_else(|| app.auth.user_id.clone()),
                total: snapshot.record_count() + request.records.len(),
                max: self.config.record_limit.max_record_count,
            }
        };
        check_record_quota(&*self.quota, &self.config.record_limit, notice).await?;

        let rows = request.records.iter().map(|r| &r.fields);
        let plan = {
            let snapshot = session.state().primary()?;
            let mut enriched = enrich_select_fields(snapshot, request.field_key, rows.clone())?;
            for (id, field) in &session.context().enrich_select_fields {
                enriched.entry(id.clone()).or_insert_with(|| field.clone());
            }
            let records = to_record_inputs(snapshot, request.field_key, rows, &enriched)?;
            SessionPlan::builder()
                .enrichment(enrichment_commands(datasheet_id, &enriched))
                .commands(vec![Command::new(
                    datasheet_id.clone(),
                    CommandKind::AddRecords(AddRecordsPayload {
                        view_id: request.view_id.clone(),
                        index: None,
                        records,
                    }),
                )])
                .read_back(ReadBack::CreatedRecords)
                .maybe_view_id(request.view_id.clone())
                .build()
        };

        session.run(plan).await
    }

    /// 更新记录：记录必须全部存在；无变化时从会话存储读回
    pub async fn update_records(
        &self,
        app: &AppContext,
        datasheet_id: &DatasheetId,
        request: UpdateRecordsRequest,
        context: MutationContext,
    ) -> AppResult<SessionOutcome> {
        let record_ids: Vec<RecordId> = request.records.iter().map(|r| r.record_id.clone()).collect();
        tracing::info!(datasheet = %datasheet_id, records = record_ids.len(), "updating records");

        let filter = SnapshotFilter::builder()
            .record_ids(record_ids.clone())
            .maybe_linked_record_map(context.linked_record_map.clone())
            .build();
        let load = LoadRequest::builder()
            .target(datasheet_id.clone())
            .include_links(true)
            .filter(filter)
            .build();
        let session = self.open(app, context, load).await?;

        let plan = {
            let snapshot = session.state().primary()?;
            ensure_records_exist(snapshot, &record_ids)?;

            let rows = request.records.iter().map(|r| &r.fields);
            let mut enriched = enrich_select_fields(snapshot, request.field_key, rows)?;
            for (id, field) in &session.context().enrich_select_fields {
                enriched.entry(id.clone()).or_insert_with(|| field.clone());
            }
            let updates = to_cell_updates(
                snapshot,
                request.field_key,
                request.records.iter().map(|r| (&r.record_id, &r.fields)),
                &enriched,
            )?;
            SessionPlan::builder()
                .enrichment(enrichment_commands(datasheet_id, &enriched))
                .commands(vec![Command::set_records(datasheet_id.clone(), updates)])
                .read_back(ReadBack::Records(record_ids))
                .maybe_view_id(request.view_id.clone())
                .build()
        };

        session.run(plan).await
    }

    pub async fn delete_records(
        &self,
        app: &AppContext,
        datasheet_id: &DatasheetId,
        record_ids: Vec<RecordId>,
    ) -> AppResult<SessionOutcome> {
        tracing::info!(datasheet = %datasheet_id, records = record_ids.len(), "deleting records");

        let load = LoadRequest::builder()
            .target(datasheet_id.clone())
            .include_links(true)
            .filter(SnapshotFilter::builder().record_ids(record_ids.clone()).build())
            .build();
        let session = self.open(app, MutationContext::default(), load).await?;
        ensure_records_exist(session.state().primary()?, &record_ids)?;

        let plan = SessionPlan::builder()
            .commands(vec![Command::delete_records(datasheet_id.clone(), record_ids)])
            .build();
        session.run(plan).await
    }

    /// 新增单个字段；关联字段同时加载外表以创建兄弟字段
    pub async fn add_field(
        &self,
        app: &AppContext,
        datasheet_id: &DatasheetId,
        field: FieldInput,
    ) -> AppResult<SessionOutcome> {
        tracing::info!(datasheet = %datasheet_id, field = %field.name, kind = field.kind.type_name(), "adding field");

        let linked = match &field.kind {
            FieldKind::Link {
                foreign_datasheet_id,
                ..
            } if foreign_datasheet_id != datasheet_id => vec![foreign_datasheet_id.clone()],
            _ => Vec::new(),
        };
        let load = LoadRequest::builder()
            .target(datasheet_id.clone())
            .linked(linked)
            .filter(SnapshotFilter::meta_only())
            .build();
        let session = self.open(app, MutationContext::default(), load).await?;

        let plan = SessionPlan::builder()
            .commands(vec![Command::add_fields(datasheet_id.clone(), vec![field])])
            .build();
        session.run(plan).await
    }

    /// 删除字段；关联字段的外表兄弟字段按 `conversion` 删除或转为文本
    pub async fn delete_field(
        &self,
        app: &AppContext,
        datasheet_id: &DatasheetId,
        field_id: &FieldId,
        conversion: Conversion,
    ) -> AppResult<SessionOutcome> {
        tracing::info!(datasheet = %datasheet_id, field = %field_id, ?conversion, "deleting field");

        let load = LoadRequest::builder()
            .target(datasheet_id.clone())
            .include_links(true)
            .filter(SnapshotFilter::meta_only())
            .build();
        let session = self.open(app, MutationContext::default(), load).await?;

        let plan = SessionPlan::builder()
            .commands(vec![Command::delete_fields(
                datasheet_id.clone(),
                vec![DeleteFieldData {
                    field_id: field_id.clone(),
                    delete_brother_field: conversion == Conversion::Delete,
                }],
            )])
            .build();
        session.run(plan).await
    }

    /// 为新建数据表写入字段：先新增字段，再逐个删除调用前已有的占位字段
    ///
    /// 每条命令各自开启会话并按顺序提交。
    pub async fn add_datasheet_fields(
        &self,
        app: &AppContext,
        datasheet_id: &DatasheetId,
        fields: Vec<FieldInput>,
    ) -> AppResult<Vec<SessionOutcome>> {
        if fields.is_empty() {
            return Err(AppError::validation(
                "field_required",
                format!("no field given for datasheet {datasheet_id}"),
            ));
        }

        let load = LoadRequest::builder()
            .target(datasheet_id.clone())
            .filter(SnapshotFilter::meta_only())
            .build();
        let session = self.open(app, MutationContext::default(), load).await?;
        let placeholders = ordered_field_ids(session.state().primary()?);
        tracing::info!(
            datasheet = %datasheet_id,
            fields = fields.len(),
            placeholders = placeholders.len(),
            "initializing datasheet fields"
        );

        let plan = SessionPlan::builder()
            .commands(vec![Command::add_fields(datasheet_id.clone(), fields)])
            .build();
        let mut outcomes = vec![session.run(plan).await?];

        for field_id in placeholders {
            outcomes.push(
                self.delete_field(app, datasheet_id, &field_id, Conversion::Delete)
                    .await?,
            );
        }
        Ok(outcomes)
    }

    /// 执行自定义命令；内部修复须经 `InternalFixGate` 放行
    pub async fn execute_command(
        &self,
        app: &AppContext,
        datasheet_id: &DatasheetId,
        command: Command,
        include_link: bool,
        internal_fix: Option<InternalFix>,
    ) -> AppResult<SessionOutcome> {
        if command.target() != datasheet_id {
            return Err(AppError::validation(
                "command_target_mismatch",
                format!("command targets {} but request is for {datasheet_id}", command.target()),
            ));
        }
        let internal_auth = match &internal_fix {
            Some(fix) => {
                self.fix_gate.authorize(&app.auth, datasheet_id, fix)?;
                fix.to_internal_auth()
            }
            None => None,
        };
        tracing::info!(
            datasheet = %datasheet_id,
            command = %command.name(),
            include_link,
            internal = internal_auth.is_some(),
            "executing command"
        );

        let load = LoadRequest::builder()
            .target(datasheet_id.clone())
            .include_links(include_link)
            .build();
        let session = self.open(app, MutationContext::default(), load).await?;

        let plan = SessionPlan::builder()
            .commands(vec![command])
            .maybe_internal_auth(internal_auth)
            .build();
        session.run(plan).await
    }

    /// 读取记录；`record_ids` 为空时读取视图的全部行
    pub async fn get_records(
        &self,
        app: &AppContext,
        datasheet_id: &DatasheetId,
        record_ids: Vec<RecordId>,
        view_id: Option<ViewId>,
    ) -> AppResult<RecordsReadBack> {
        let key = ProjectionKey {
            datasheet_id: datasheet_id.clone(),
            record_ids: record_ids.clone(),
            view_id: view_id.clone(),
        };
        if let Some(hit) = self.projections.get(&key) {
            tracing::debug!(datasheet = %datasheet_id, "projection cache hit");
            return Ok(hit);
        }

        let filter = if record_ids.is_empty() {
            SnapshotFilter::default()
        } else {
            SnapshotFilter::builder().record_ids(record_ids.clone()).build()
        };
        let load = LoadRequest::builder()
            .target(datasheet_id.clone())
            .filter(filter)
            .build();
        let store = self.loader().load(load, &app.auth).await?;
        let state = store.state();

        let record_ids = if record_ids.is_empty() {
            let view = match &view_id {
                Some(id) => state.view(datasheet_id, id),
                None => state.default_view(datasheet_id),
            };
            view.map(|v| v.rows.clone()).unwrap_or_default()
        } else {
            record_ids
        };
        let read_back = RecordsReadBack::build(state, datasheet_id, &record_ids, view_id.as_ref())?;
        self.projections.insert(key, read_back.clone());
        Ok(read_back)
    }

    /// 字段列表：按默认视图列顺序，不在视图中的字段排在最后
    pub async fn get_fields(&self, app: &AppContext, datasheet_id: &DatasheetId) -> AppResult<Vec<FieldVo>> {
        let store = self.load_meta(app, datasheet_id).await?;
        let snapshot = store.state().primary()?;
        let primary = snapshot.meta.primary_field_id();
        Ok(ordered_field_ids(snapshot)
            .iter()
            .filter_map(|id| snapshot.field(id))
            .map(|field| FieldVo::from_field(field, primary))
            .collect())
    }

    pub async fn get_views(&self, app: &AppContext, datasheet_id: &DatasheetId) -> AppResult<Vec<ViewVo>> {
        let store = self.load_meta(app, datasheet_id).await?;
        let snapshot = store.state().primary()?;
        Ok(snapshot.meta.views.iter().map(ViewVo::from).collect())
    }

    async fn load_meta(
        &self,
        app: &AppContext,
        datasheet_id: &DatasheetId,
    ) -> AppResult<SnapshotStore> {
        let load = LoadRequest::builder()
            .target(datasheet_id.clone())
            .filter(SnapshotFilter::meta_only())
            .build();
        self.loader().load(load, &app.auth).await
    }
}

fn ensure_records_exist(snapshot: &DatasheetSnapshot, record_ids: &[RecordId]) -> AppResult<()> {
    let missing: Vec<&str> = record_ids
        .iter()
        .filter(|id| snapshot.record(id).is_none())
        .map(RecordId::as_str)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(AppError::NotFound(format!(
        "record_not_exists: {} in datasheet {}",
        missing.join(", "),
        snapshot.datasheet_id
    )))
}

fn ordered_field_ids(snapshot: &DatasheetSnapshot) -> Vec<FieldId> {
    let mut ids: Vec<FieldId> = snapshot
        .meta
        .default_view()
        .map(|v| v.columns.clone())
        .unwrap_or_default();
    for id in snapshot.meta.field_map.keys() {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids.retain(|id| snapshot.field(id).is_some());
    ids
}
