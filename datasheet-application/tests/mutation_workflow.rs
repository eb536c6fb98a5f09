use async_trait::async_trait;
use chrono::Utc;
use datasheet_application::cache::{InMemoryProjectionCache, ProjectionKey};
use datasheet_application::config::{MutationConfig, RecordLimitConfig};
use datasheet_application::context::{AppContext, AuthContext, InternalAuth, InternalFix, MutationContext};
use datasheet_application::dto::{AddRecordsRequest, Conversion, RecordFields, RecordUpdate, UpdateRecordsRequest};
use datasheet_application::error::{AppError, AppResult};
use datasheet_application::loader::LoadRequest;
use datasheet_application::ports::{
    AllowInternalFix, AppliedChangeset, ApplyRequest, AuthorityApplyResult, AuthorityClient,
    BroadcastNotifier, MetaSource, MutationPorts, ProvenanceRecorder, QuotaNotifier, ReadCache,
    RecordQuotaNotice, RecordSource, SnapshotSource,
};
use datasheet_application::session::{MutationSession, SessionPlan, SessionState};
use datasheet_application::DatasheetMutations;
use datasheet_domain::changeset::{Changeset, SourceType};
use datasheet_domain::command::{CellUpdate, Command, FieldInput};
use datasheet_domain::error::DomainError;
use datasheet_domain::eventing::{CommandExecuted, EventHandler, HandlerScope};
use datasheet_domain::ids::{DatasheetId, FieldId, RecordId};
use datasheet_domain::operation::Operation;
use datasheet_domain::snapshot::{
    CellValue, DatasheetPack, DatasheetSnapshot, Field, FieldKind, Meta, Record, SelectOption,
    SnapshotFilter, View,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ---------- 内存版协作方 ----------

/// 快照来源 + 元数据来源 + 权威服务：按顺序重放操作并递增版本
#[derive(Default)]
struct FakeServer {
    datasheets: Mutex<BTreeMap<DatasheetId, DatasheetSnapshot>>,
    applies: Mutex<Vec<(ApplyRequest, AuthContext)>>,
    fetches: AtomicUsize,
    meta_fetches: AtomicUsize,
    omit_meta: bool,
    /// 按过滤条件返回记录（默认返回全部）
    honour_filter: bool,
    reject: Option<String>,
}

impl FakeServer {
    fn with(datasheets: Vec<DatasheetSnapshot>) -> Self {
        Self {
            datasheets: Mutex::new(
                datasheets
                    .into_iter()
                    .map(|s| (s.datasheet_id.clone(), s))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn snapshot(&self, id: &str) -> DatasheetSnapshot {
        self.datasheets.lock().unwrap()[&DatasheetId::from(id)].clone()
    }

    fn apply_count(&self) -> usize {
        self.applies.lock().unwrap().len()
    }
}

#[async_trait]
impl SnapshotSource for FakeServer {
    async fn fetch(
        &self,
        datasheet_id: &DatasheetId,
        _auth: &AuthContext,
        filter: &SnapshotFilter,
    ) -> AppResult<Option<DatasheetPack>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let wanted = filter.record_ids().filter(|_| self.honour_filter);
        let datasheets = self.datasheets.lock().unwrap();
        Ok(datasheets.get(datasheet_id).map(|s| DatasheetPack {
            datasheet_id: s.datasheet_id.clone(),
            name: s.name.clone(),
            revision: s.revision,
            meta: (!self.omit_meta).then(|| s.meta.clone()),
            records: s
                .record_map
                .values()
                .filter(|r| wanted.is_none_or(|ids| ids.contains(&r.id)))
                .cloned()
                .collect(),
        }))
    }
}

#[async_trait]
impl MetaSource for FakeServer {
    async fn fetch_meta(&self, datasheet_id: &DatasheetId) -> AppResult<Option<Meta>> {
        self.meta_fetches.fetch_add(1, Ordering::SeqCst);
        let datasheets = self.datasheets.lock().unwrap();
        Ok(datasheets.get(datasheet_id).map(|s| s.meta.clone()))
    }
}

#[async_trait]
impl AuthorityClient for FakeServer {
    async fn apply(&self, request: ApplyRequest, auth: &AuthContext) -> AppResult<AuthorityApplyResult> {
        self.applies.lock().unwrap().push((request.clone(), auth.clone()));
        if let Some(reason) = &self.reject {
            return Err(AppError::ApplyRejected {
                reason: reason.clone(),
            });
        }

        let mut datasheets = self.datasheets.lock().unwrap();
        let mut applied = Vec::new();
        for (i, cs) in request.changesets.into_iter().enumerate() {
            let snapshot = datasheets
                .get_mut(&cs.resource_id)
                .ok_or_else(|| AppError::NotFound(cs.resource_id.to_string()))?;
            for op in &cs.operations {
                op.apply_to(snapshot);
            }
            snapshot.revision += 1;
            applied.push(AppliedChangeset {
                resource_id: cs.resource_id,
                revision: snapshot.revision,
                message_id: format!("msg{i}"),
                user_id: auth.user_id.clone(),
                operations: cs.operations,
                applied_at: Utc::now(),
            });
        }
        Ok(AuthorityApplyResult {
            applied,
            acting_user_id: auth.user_id.clone(),
        })
    }
}

#[derive(Default)]
struct ProvenanceSpy {
    record_sources: Mutex<Vec<RecordSource>>,
    changeset_calls: AtomicUsize,
}

#[async_trait]
impl ProvenanceRecorder for ProvenanceSpy {
    async fn record_record_source(&self, source: RecordSource) -> AppResult<()> {
        self.record_sources.lock().unwrap().push(source);
        Ok(())
    }

    async fn record_changeset_sources(
        &self,
        _result: &AuthorityApplyResult,
        _source_type: SourceType,
    ) -> AppResult<()> {
        self.changeset_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct BroadcastSpy {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl BroadcastNotifier for BroadcastSpy {
    async fn notify(&self, _resource_id: &DatasheetId, _result: &AuthorityApplyResult) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::BroadcastFailure("room closed".into()));
        }
        Ok(())
    }
}

/// 提交成功后快照来源即不可用
struct UnavailableAfterApply(Arc<FakeServer>);

#[async_trait]
impl SnapshotSource for UnavailableAfterApply {
    async fn fetch(
        &self,
        datasheet_id: &DatasheetId,
        auth: &AuthContext,
        filter: &SnapshotFilter,
    ) -> AppResult<Option<DatasheetPack>> {
        if self.0.apply_count() > 0 {
            return Err(AppError::Infra("snapshot store unavailable".into()));
        }
        self.0.fetch(datasheet_id, auth, filter).await
    }
}

/// 收到广播时读取投影缓存中 rec1 的标题
struct ProjectionWatcher {
    projections: Arc<InMemoryProjectionCache>,
    seen: Mutex<Vec<Option<CellValue>>>,
}

#[async_trait]
impl BroadcastNotifier for ProjectionWatcher {
    async fn notify(&self, resource_id: &DatasheetId, _result: &AuthorityApplyResult) -> AppResult<()> {
        let key = ProjectionKey {
            datasheet_id: resource_id.clone(),
            record_ids: vec!["rec1".into()],
            view_id: None,
        };
        let title = self
            .projections
            .get(&key)
            .map(|cached| cached.records[0].fields["Title"].clone());
        self.seen.lock().unwrap().push(title);
        Ok(())
    }
}

#[derive(Default)]
struct QuotaSpy {
    calls: Mutex<Vec<(&'static str, usize)>>,
}

#[async_trait]
impl QuotaNotifier for QuotaSpy {
    async fn remind_soon_limit(&self, notice: &RecordQuotaNotice) -> AppResult<()> {
        self.calls.lock().unwrap().push(("remind", notice.total));
        Ok(())
    }

    async fn notify_out_of_limit(&self, notice: &RecordQuotaNotice) -> AppResult<()> {
        self.calls.lock().unwrap().push(("out_of_limit", notice.total));
        Ok(())
    }
}

#[derive(Default)]
struct CacheSpy {
    invalidated: Mutex<Vec<DatasheetId>>,
}

impl ReadCache for CacheSpy {
    fn invalidate(&self, datasheet_id: &DatasheetId) {
        self.invalidated.lock().unwrap().push(datasheet_id.clone());
    }
}

struct Harness {
    server: Arc<FakeServer>,
    provenance: Arc<ProvenanceSpy>,
    broadcast: Arc<BroadcastSpy>,
    quota: Arc<QuotaSpy>,
    cache: Arc<CacheSpy>,
}

impl Harness {
    fn new(server: FakeServer) -> Self {
        Self::with_broadcast(server, BroadcastSpy::default())
    }

    fn with_broadcast(server: FakeServer, broadcast: BroadcastSpy) -> Self {
        Self {
            server: Arc::new(server),
            provenance: Arc::new(ProvenanceSpy::default()),
            broadcast: Arc::new(broadcast),
            quota: Arc::new(QuotaSpy::default()),
            cache: Arc::new(CacheSpy::default()),
        }
    }

    fn ports(&self) -> MutationPorts {
        MutationPorts::builder()
            .snapshots(self.server.clone())
            .metas(self.server.clone())
            .authority(self.server.clone())
            .provenance(self.provenance.clone())
            .broadcast(self.broadcast.clone())
            .cache(self.cache.clone())
            .build()
    }

    fn service(&self) -> DatasheetMutations {
        self.service_with(MutationConfig::default())
    }

    fn service_with(&self, config: MutationConfig) -> DatasheetMutations {
        DatasheetMutations::new(self.ports(), self.quota.clone(), config)
    }

    fn record_sources(&self) -> Vec<RecordSource> {
        self.provenance.record_sources.lock().unwrap().clone()
    }
}

// ---------- 数据 ----------

fn field(id: &str, name: &str, kind: FieldKind) -> Field {
    Field {
        id: id.into(),
        name: name.into(),
        kind,
    }
}

fn snapshot(id: &str, name: &str, fields: Vec<Field>, records: Vec<Record>, rows: Vec<RecordId>) -> DatasheetSnapshot {
    DatasheetSnapshot {
        datasheet_id: id.into(),
        name: name.into(),
        revision: 1,
        meta: Meta {
            views: vec![View {
                id: "viw1".into(),
                name: "Grid".into(),
                rows,
                columns: fields.iter().map(|f| f.id.clone()).collect(),
                ..Default::default()
            }],
            field_map: fields.into_iter().map(|f| (f.id.clone(), f)).collect(),
        },
        record_map: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
    }
}

fn record(id: &str, cells: Vec<(&str, CellValue)>) -> Record {
    Record {
        id: id.into(),
        cells: cells
            .into_iter()
            .map(|(f, v)| (FieldId::from(f), v))
            .collect(),
    }
}

/// dst1 "Projects"（rec1 关联 dst2 的 recA）与 dst2 "Tasks"
fn linked_server() -> FakeServer {
    let projects = snapshot(
        "dst1",
        "Projects",
        vec![
            field("fldTitle", "Title", FieldKind::Text),
            field(
                "fldTags",
                "Tags",
                FieldKind::MultiSelect {
                    options: vec![SelectOption {
                        id: "optRed".into(),
                        name: "red".into(),
                        color: 0,
                    }],
                },
            ),
            field(
                "fldLink",
                "Tasks",
                FieldKind::Link {
                    foreign_datasheet_id: "dst2".into(),
                    brother_field_id: Some("fldBack".into()),
                },
            ),
        ],
        vec![record(
            "rec1",
            vec![
                ("fldTitle", CellValue::Text("Alpha".into())),
                ("fldLink", CellValue::Links(vec!["recA".into()])),
            ],
        )],
        vec!["rec1".into()],
    );
    let tasks = snapshot(
        "dst2",
        "Tasks",
        vec![
            field("fldName", "Name", FieldKind::Text),
            field(
                "fldBack",
                "Projects",
                FieldKind::Link {
                    foreign_datasheet_id: "dst1".into(),
                    brother_field_id: Some("fldLink".into()),
                },
            ),
        ],
        vec![record("recA", vec![("fldBack", CellValue::Links(vec!["rec1".into()]))])],
        vec!["recA".into()],
    );
    FakeServer::with(vec![projects, tasks])
}

fn empty_server(rows: usize) -> FakeServer {
    let rows = (0..rows).map(|i| RecordId::from(format!("rec{i}"))).collect();
    FakeServer::with(vec![snapshot(
        "dst3",
        "Empty",
        vec![field("fldTitle", "Title", FieldKind::Text)],
        vec![],
        rows,
    )])
}

fn app() -> AppContext {
    AppContext {
        correlation_id: Some("cor-1".into()),
        auth: AuthContext::user("usr1".into(), "token"),
    }
}

fn row(value: serde_json::Value) -> RecordFields {
    RecordFields {
        fields: serde_json::from_value(value).unwrap(),
    }
}

fn update(record_id: &str, value: serde_json::Value) -> UpdateRecordsRequest {
    UpdateRecordsRequest {
        records: vec![RecordUpdate {
            record_id: record_id.into(),
            fields: serde_json::from_value(value).unwrap(),
        }],
        ..Default::default()
    }
}

// ---------- 场景 ----------

#[tokio::test]
async fn adding_three_records_submits_one_changeset_and_reads_them_back() {
    let h = Harness::new(empty_server(0));
    let request = AddRecordsRequest {
        records: vec![row(json!({"Title": "a"})), row(json!({"Title": "b"})), row(json!({"Title": "c"}))],
        ..Default::default()
    };

    let outcome = h
        .service()
        .add_records(&app(), &"dst3".into(), request, MutationContext::default())
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::Applied);
    assert_eq!(outcome.changesets.len(), 1);
    assert_eq!(outcome.changesets[0].operations.len(), 3);
    assert!(outcome.changesets[0]
        .operations
        .iter()
        .all(|op| matches!(op, Operation::AddRecord { .. })));
    assert_eq!(h.server.apply_count(), 1);

    let sources = h.record_sources();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].record_ids, outcome.created_record_ids);
    assert_eq!(sources[0].user_id, Some("usr1".into()));
    assert_eq!(sources[0].source_id.as_deref(), Some("dst3"));
    assert_eq!(h.provenance.changeset_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.broadcast.calls.load(Ordering::SeqCst), 1);

    let read_back = outcome.read_back.unwrap();
    assert_eq!(read_back.record_ids(), outcome.created_record_ids);
    assert_eq!(read_back.revision, 2);
    let titles: Vec<_> = read_back.records.iter().map(|r| r.fields["Title"].clone()).collect();
    assert_eq!(
        titles,
        ["a", "b", "c"].map(|t| CellValue::Text(t.into())).to_vec()
    );
    assert_eq!(h.server.snapshot("dst3").record_count(), 3);
}

#[tokio::test]
async fn unchanged_update_is_noop_without_submission() {
    let h = Harness::new(linked_server());

    let outcome = h
        .service()
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Title": "Alpha"})), MutationContext::default())
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::NoOp);
    assert!(outcome.changesets.is_empty());
    assert_eq!(h.server.apply_count(), 0);
    assert_eq!(h.broadcast.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.provenance.changeset_calls.load(Ordering::SeqCst), 0);

    let read_back = outcome.read_back.unwrap();
    assert_eq!(read_back.revision, 1);
    assert_eq!(read_back.records[0].fields["Title"], CellValue::Text("Alpha".into()));
}

#[tokio::test]
async fn new_option_is_enriched_before_the_cell_update() {
    let h = Harness::new(linked_server());

    let outcome = h
        .service()
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Tags": ["red", "blue"]})), MutationContext::default())
        .await
        .unwrap();

    assert!(outcome.is_applied());
    assert_eq!(outcome.changesets.len(), 1);
    let ops = &outcome.changesets[0].operations;
    assert_eq!(ops.len(), 2);
    assert!(matches!(ops[0], Operation::SetField { .. }));
    assert!(matches!(ops[1], Operation::SetCell { .. }));

    let stored = h.server.snapshot("dst1");
    let tags = stored.field(&"fldTags".into()).unwrap();
    let names: Vec<_> = tags.kind.options().unwrap().iter().map(|o| o.name.clone()).collect();
    assert_eq!(names, ["red", "blue"]);
    match stored.record(&"rec1".into()).unwrap().cell(&"fldTags".into()) {
        Some(CellValue::Options(ids)) => assert_eq!(ids.len(), 2),
        other => panic!("unexpected cell {other:?}"),
    }
}

#[tokio::test]
async fn link_change_yields_one_changeset_per_resource() {
    let h = Harness::new(linked_server());

    let outcome = h
        .service()
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Tasks": null})), MutationContext::default())
        .await
        .unwrap();

    let resources: Vec<_> = outcome.changesets.iter().map(|cs| cs.resource_id.as_str()).collect();
    assert_eq!(resources, ["dst1", "dst2"]);
    for cs in &outcome.changesets {
        assert_eq!(cs.operations.len(), 1);
        assert_eq!(cs.base_revision, Some(1));
    }
    assert!(h.server.snapshot("dst2").record(&"recA".into()).unwrap().cell(&"fldBack".into()).is_none());

    let invalidated = h.cache.invalidated.lock().unwrap().clone();
    assert_eq!(invalidated, [DatasheetId::from("dst1"), DatasheetId::from("dst2")]);
    // 同一会话只调用一次权威服务
    assert_eq!(h.server.apply_count(), 1);
}

#[tokio::test]
async fn quota_near_limit_reminds_and_proceeds() {
    let h = Harness::new(empty_server(94));
    let config = MutationConfig::builder()
        .record_limit(
            RecordLimitConfig::builder()
                .max_record_count(100)
                .record_remind_range(90)
                .build(),
        )
        .build();
    let request = AddRecordsRequest {
        records: vec![row(json!({"Title": "x"}))],
        ..Default::default()
    };

    let outcome = h
        .service_with(config)
        .add_records(&app(), &"dst3".into(), request, MutationContext::default())
        .await
        .unwrap();

    assert!(outcome.is_applied());
    assert_eq!(*h.quota.calls.lock().unwrap(), vec![("remind", 95)]);
}

#[tokio::test]
async fn quota_over_limit_rejects_without_submission() {
    let h = Harness::new(empty_server(100));
    let config = MutationConfig::builder()
        .record_limit(
            RecordLimitConfig::builder()
                .max_record_count(100)
                .record_remind_range(90)
                .build(),
        )
        .build();
    let request = AddRecordsRequest {
        records: vec![row(json!({"Title": "x"}))],
        ..Default::default()
    };

    let err = h
        .service_with(config)
        .add_records(&app(), &"dst3".into(), request, MutationContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::QuotaExceeded { total: 101, max: 100, .. }));
    assert_eq!(*h.quota.calls.lock().unwrap(), vec![("out_of_limit", 101)]);
    assert_eq!(h.server.apply_count(), 0);
    assert!(h.record_sources().is_empty());
}

#[tokio::test]
async fn deleting_a_field_twice_is_noop_the_second_time() {
    let h = Harness::new(linked_server());
    let service = h.service();

    let first = service
        .delete_field(&app(), &"dst1".into(), &"fldTags".into(), Conversion::Delete)
        .await
        .unwrap();
    assert!(first.is_applied());
    assert_eq!(first.changesets.len(), 1);
    assert!(matches!(
        first.changesets[0].operations.as_slice(),
        [Operation::DeleteField { .. }]
    ));

    let second = service
        .delete_field(&app(), &"dst1".into(), &"fldTags".into(), Conversion::Delete)
        .await
        .unwrap();
    assert!(second.is_noop());
    assert_eq!(h.server.apply_count(), 1);
}

#[tokio::test]
async fn deleting_a_link_field_keeping_text_converts_the_brother() {
    let h = Harness::new(linked_server());

    let outcome = h
        .service()
        .delete_field(&app(), &"dst1".into(), &"fldLink".into(), Conversion::KeepText)
        .await
        .unwrap();

    assert_eq!(outcome.changesets.len(), 2);
    let brother = h.server.snapshot("dst2").field(&"fldBack".into()).cloned().unwrap();
    assert_eq!(brother.kind, FieldKind::Text);
    assert!(h.server.snapshot("dst1").field(&"fldLink".into()).is_none());
}

#[tokio::test]
async fn broadcast_failure_still_reports_applied() {
    let h = Harness::with_broadcast(
        linked_server(),
        BroadcastSpy {
            fail: true,
            ..Default::default()
        },
    );

    let outcome = h
        .service()
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Title": "Beta"})), MutationContext::default())
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::Applied);
    assert!(outcome.broadcast_error.unwrap().contains("room closed"));
    assert_eq!(h.broadcast.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcome.read_back.unwrap().records[0].fields["Title"],
        CellValue::Text("Beta".into())
    );
}

#[tokio::test]
async fn internal_fix_is_denied_by_default_gate() {
    let h = Harness::new(linked_server());
    let command = Command::set_records(
        "dst1".into(),
        vec![CellUpdate {
            record_id: "rec1".into(),
            field_id: "fldTitle".into(),
            value: Some(CellValue::Text("Fixed".into())),
        }],
    );
    let fix = InternalFix {
        anonymous: true,
        fix_user: None,
    };

    let err = h
        .service()
        .execute_command(&app(), &"dst1".into(), command.clone(), false, Some(fix.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "authorization");
    assert_eq!(h.server.apply_count(), 0);

    let outcome = h
        .service()
        .with_fix_gate(Arc::new(AllowInternalFix))
        .execute_command(&app(), &"dst1".into(), command, false, Some(fix))
        .await
        .unwrap();
    assert!(outcome.is_applied());

    let applies = h.server.applies.lock().unwrap();
    let (request, auth) = &applies[0];
    assert_eq!(request.internal_auth, Some(InternalAuth::Anonymous));
    assert!(auth.is_internal());
    assert_eq!(auth.user_id, None);
}

#[tokio::test]
async fn failing_command_surfaces_validation_code() {
    let h = Harness::new(linked_server());
    let command = Command::set_records(
        "dst1".into(),
        vec![CellUpdate {
            record_id: "rec404".into(),
            field_id: "fldTitle".into(),
            value: None,
        }],
    );

    let err = h
        .service()
        .execute_command(&app(), &"dst1".into(), command, true, None)
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "record_not_exists");
    assert_eq!(h.server.apply_count(), 0);
}

#[tokio::test]
async fn updating_missing_record_is_not_found() {
    let h = Harness::new(linked_server());

    let err = h
        .service()
        .update_records(&app(), &"dst1".into(), update("rec404", json!({"Title": "x"})), MutationContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(ref reason) if reason.contains("rec404")));
    assert_eq!(err.reason_code(), "not_found");
}

#[tokio::test]
async fn rejected_apply_records_no_provenance() {
    let mut server = linked_server();
    server.reject = Some("revision conflict".into());
    let h = Harness::new(server);

    let err = h
        .service()
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Title": "Beta"})), MutationContext::default())
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "apply_rejected");
    assert_eq!(h.provenance.changeset_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.broadcast.calls.load(Ordering::SeqCst), 0);
    assert!(h.cache.invalidated.lock().unwrap().is_empty());
}

/// 为未出现在主变更集中的数据表注入操作
struct StrayInjector;

impl EventHandler for StrayInjector {
    fn handler_name(&self) -> &str {
        "stray_injector"
    }

    fn handle(
        &self,
        _event: &CommandExecuted<'_>,
        _scope: &mut HandlerScope<'_>,
    ) -> anyhow::Result<Vec<Changeset>> {
        let mut cs = Changeset::new("dst2".into(), SourceType::OpenApi);
        cs.operations.push(Operation::SetCell {
            record_id: "recA".into(),
            field_id: "fldName".into(),
            old: None,
            new: Some(CellValue::Text("stray".into())),
        });
        Ok(vec![cs])
    }
}

#[tokio::test]
async fn handler_ops_for_missing_resource_abort_submission() {
    let h = Harness::new(linked_server());
    let load = LoadRequest::builder()
        .target("dst1".into())
        .linked(vec!["dst2".into()])
        .build();
    let session = MutationSession::open(h.ports(), MutationConfig::default(), app(), MutationContext::default(), load)
        .await
        .unwrap();
    assert_eq!(session.session_state(), SessionState::Built);

    let plan = SessionPlan::builder()
        .commands(vec![Command::set_records(
            "dst1".into(),
            vec![CellUpdate {
                record_id: "rec1".into(),
                field_id: "fldTitle".into(),
                value: Some(CellValue::Text("Beta".into())),
            }],
        )])
        .handlers(vec![Arc::new(StrayInjector) as Arc<dyn EventHandler>])
        .build();
    let err = session.run(plan).await.unwrap_err();

    assert!(matches!(
        err,
        AppError::Domain(DomainError::MissingResourceChangeset { .. })
    ));
    assert_eq!(h.server.apply_count(), 0);
    assert!(h.record_sources().is_empty());
    assert_eq!(h.provenance.changeset_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn adding_a_link_field_creates_the_brother_field() {
    let mut server = linked_server();
    let extra = empty_server(0).snapshot("dst3");
    server
        .datasheets
        .get_mut()
        .unwrap()
        .insert("dst3".into(), extra);
    let h = Harness::new(server);

    let outcome = h
        .service()
        .add_field(
            &app(),
            &"dst3".into(),
            FieldInput {
                name: "Projects".into(),
                kind: FieldKind::Link {
                    foreign_datasheet_id: "dst1".into(),
                    brother_field_id: None,
                },
                index: None,
            },
        )
        .await
        .unwrap();

    let resources: Vec<_> = outcome.changesets.iter().map(|cs| cs.resource_id.as_str()).collect();
    assert_eq!(resources, ["dst3", "dst1"]);
    let created = outcome.results[0].field_ids()[0].clone();
    let dst1 = h.server.snapshot("dst1");
    let brother = dst1.meta.field_by_name("Empty").unwrap();
    assert_eq!(
        brother.link_target(),
        Some((&DatasheetId::from("dst3"), Some(&created)))
    );
}

#[tokio::test]
async fn datasheet_fields_replace_placeholders_in_order() {
    let h = Harness::new(FakeServer::with(vec![snapshot(
        "dst4",
        "New",
        vec![
            field("fldP1", "Title", FieldKind::Text),
            field("fldP2", "Options", FieldKind::Text),
        ],
        vec![],
        vec![],
    )]));

    let outcomes = h
        .service()
        .add_datasheet_fields(
            &app(),
            &"dst4".into(),
            vec![
                FieldInput {
                    name: "Name".into(),
                    kind: FieldKind::Text,
                    index: None,
                },
                FieldInput {
                    name: "Score".into(),
                    kind: FieldKind::Number { precision: 0 },
                    index: None,
                },
            ],
        )
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.is_applied()));
    assert_eq!(h.server.apply_count(), 3);

    let mut names: Vec<_> = h
        .server
        .snapshot("dst4")
        .meta
        .field_map
        .values()
        .map(|f| f.name.clone())
        .collect();
    names.sort();
    assert_eq!(names, ["Name", "Score"]);
}

#[tokio::test]
async fn metadata_is_fetched_separately_when_pack_omits_it() {
    let mut server = linked_server();
    server.omit_meta = true;
    let h = Harness::new(server);

    let fields = h.service().get_fields(&app(), &"dst1".into()).await.unwrap();
    let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["Title", "Tags", "Tasks"]);
    assert!(fields[0].is_primary);
    assert_eq!(h.server.meta_fetches.load(Ordering::SeqCst), 1);

    let views = h.service().get_views(&app(), &"dst1".into()).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].name, "Grid");
}

#[tokio::test]
async fn get_records_is_cached_until_a_mutation_applies() {
    let h = Harness::new(linked_server());
    let service = h.service();
    let ids = vec![RecordId::from("rec1")];

    let first = service.get_records(&app(), &"dst1".into(), ids.clone(), None).await.unwrap();
    let fetches = h.server.fetches.load(Ordering::SeqCst);
    let second = service.get_records(&app(), &"dst1".into(), ids.clone(), None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.server.fetches.load(Ordering::SeqCst), fetches);
    assert_eq!(service.projections().len(), 1);

    service
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Title": "Gamma"})), MutationContext::default())
        .await
        .unwrap();
    assert!(service.projections().is_empty());

    let third = service.get_records(&app(), &"dst1".into(), ids, None).await.unwrap();
    assert_eq!(third.records[0].fields["Title"], CellValue::Text("Gamma".into()));
}

#[tokio::test]
async fn read_back_failure_after_apply_still_reports_applied() {
    let h = Harness::new(linked_server());
    let ports = MutationPorts {
        snapshots: Arc::new(UnavailableAfterApply(h.server.clone())),
        ..h.ports()
    };
    let service = DatasheetMutations::new(ports, h.quota.clone(), MutationConfig::default());
    let ids = vec![RecordId::from("rec1")];
    service.get_records(&app(), &"dst1".into(), ids, None).await.unwrap();
    assert_eq!(service.projections().len(), 1);

    let outcome = service
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Title": "Gamma"})), MutationContext::default())
        .await
        .unwrap();

    assert!(outcome.is_applied());
    assert!(outcome.applied.is_some());
    assert!(outcome.read_back.is_none());
    assert!(outcome.read_back_error.unwrap().contains("snapshot store unavailable"));
    assert_eq!(
        h.server.snapshot("dst1").record(&"rec1".into()).unwrap().cell(&"fldTitle".into()),
        Some(&CellValue::Text("Gamma".into()))
    );
    assert!(service.projections().is_empty());
    assert_eq!(h.broadcast.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn projections_are_dropped_before_the_broadcast() {
    let h = Harness::new(linked_server());
    let projections = Arc::new(InMemoryProjectionCache::new());
    let watcher = Arc::new(ProjectionWatcher {
        projections: projections.clone(),
        seen: Mutex::default(),
    });
    let ports = MutationPorts {
        broadcast: watcher.clone(),
        ..h.ports()
    };
    let service = DatasheetMutations::new(ports, h.quota.clone(), MutationConfig::default())
        .with_projection_cache(projections);
    let ids = vec![RecordId::from("rec1")];

    let warm = service.get_records(&app(), &"dst1".into(), ids.clone(), None).await.unwrap();
    assert_eq!(warm.records[0].fields["Title"], CellValue::Text("Alpha".into()));

    service
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Title": "Gamma"})), MutationContext::default())
        .await
        .unwrap();

    // 订阅方收到通知时旧投影已不在缓存中
    assert_eq!(*watcher.seen.lock().unwrap(), vec![None]);
    let fresh = service.get_records(&app(), &"dst1".into(), ids, None).await.unwrap();
    assert_eq!(fresh.records[0].fields["Title"], CellValue::Text("Gamma".into()));
}

#[tokio::test]
async fn linked_datasheet_is_fetched_with_its_own_record_set() {
    let h = Harness::new(FakeServer {
        honour_filter: true,
        ..linked_server()
    });

    let outcome = h
        .service()
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Tasks": null})), MutationContext::default())
        .await
        .unwrap();

    let resources: Vec<_> = outcome.changesets.iter().map(|cs| cs.resource_id.as_str()).collect();
    assert_eq!(resources, ["dst1", "dst2"]);
    assert!(h.server.snapshot("dst2").record(&"recA".into()).unwrap().cell(&"fldBack".into()).is_none());
}

#[tokio::test]
async fn linked_record_map_narrows_the_foreign_fetch() {
    let mut linked_record_map = BTreeMap::new();
    linked_record_map.insert(DatasheetId::from("dst2"), vec![RecordId::from("recA")]);
    let context = MutationContext {
        linked_record_map: Some(linked_record_map),
        ..Default::default()
    };
    let h = Harness::new(FakeServer {
        honour_filter: true,
        ..linked_server()
    });

    let outcome = h
        .service()
        .update_records(&app(), &"dst1".into(), update("rec1", json!({"Tasks": null})), context)
        .await
        .unwrap();

    assert_eq!(outcome.changesets.len(), 2);
    assert!(h.server.snapshot("dst2").record(&"recA".into()).unwrap().cell(&"fldBack".into()).is_none());
}
