use crate::context::AuthContext;
use crate::error::{AppError, AppResult};
use crate::ports::{MetaSource, SnapshotSource};
use bon::Builder;
use datasheet_domain::ids::DatasheetId;
use datasheet_domain::snapshot::{DatasheetPack, Meta, SnapshotFilter, SnapshotStore};
use std::sync::Arc;

#[derive(Builder, Debug, Clone)]
pub struct LoadRequest {
    pub target: DatasheetId,
    /// 额外加载的关联表
    #[builder(default)]
    pub linked: Vec<DatasheetId>,
    /// 自动加载目标表关联字段指向的外表
    #[builder(default)]
    pub include_links: bool,
    #[builder(default)]
    pub filter: SnapshotFilter,
    /// 已知的目标表元数据
    pub meta: Option<Meta>,
}

/// 快照加载器：获取数据包，必要时二次获取元数据，再构建快照存储
#[derive(Clone)]
pub struct StoreLoader {
    snapshots: Arc<dyn SnapshotSource>,
    metas: Arc<dyn MetaSource>,
}

impl StoreLoader {
    pub fn new(snapshots: Arc<dyn SnapshotSource>, metas: Arc<dyn MetaSource>) -> Self {
        Self { snapshots, metas }
    }

    pub async fn load(&self, request: LoadRequest, auth: &AuthContext) -> AppResult<SnapshotStore> {
        let mut target = self.fetch_pack(&request.target, auth, &request.filter).await?;
        if target.meta.is_none()
            && let Some(meta) = request.meta
        {
            target = target.with_meta(meta);
        }
        let target = self.ensure_meta(target).await?;

        let mut linked = request.linked;
        if request.include_links
            && let Some(meta) = &target.meta
        {
            for field in meta.field_map.values() {
                if let Some((foreign, _)) = field.link_target()
                    && *foreign != request.target
                    && !linked.contains(foreign)
                {
                    linked.push(foreign.clone());
                }
            }
        }

        let mut packs = Vec::with_capacity(linked.len() + 1);
        packs.push(target);
        for datasheet_id in &linked {
            // 关联表按自己的记录集合获取，不沿用主表的 record_ids
            let filter = SnapshotFilter::builder()
                .maybe_record_ids(request.filter.linked_records(datasheet_id).map(<[_]>::to_vec))
                .build();
            let pack = self.fetch_pack(datasheet_id, auth, &filter).await?;
            packs.push(self.ensure_meta(pack).await?);
        }

        tracing::debug!(
            datasheet = %request.target,
            linked = linked.len(),
            "snapshot store loaded"
        );
        Ok(SnapshotStore::build(packs, request.filter)?)
    }

    async fn fetch_pack(
        &self,
        datasheet_id: &DatasheetId,
        auth: &AuthContext,
        filter: &SnapshotFilter,
    ) -> AppResult<DatasheetPack> {
        self.snapshots
            .fetch(datasheet_id, auth, filter)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("datasheet {datasheet_id}")))
    }

    async fn ensure_meta(&self, pack: DatasheetPack) -> AppResult<DatasheetPack> {
        if pack.meta.is_some() {
            return Ok(pack);
        }
        let meta = self
            .metas
            .fetch_meta(&pack.datasheet_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("meta of datasheet {}", pack.datasheet_id)))?;
        Ok(pack.with_meta(meta))
    }
}
