use crate::ports::ReadCache;
use crate::read_back::RecordsReadBack;
use dashmap::DashMap;
use datasheet_domain::ids::{DatasheetId, RecordId, ViewId};
use std::sync::Arc;

/// 投影缓存的键：数据表 + 请求的记录集合 + 视图
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectionKey {
    pub datasheet_id: DatasheetId,
    pub record_ids: Vec<RecordId>,
    pub view_id: Option<ViewId>,
}

/// 基于 DashMap 的读投影缓存，可在并发会话间共享
#[derive(Debug, Default)]
pub struct InMemoryProjectionCache {
    entries: DashMap<ProjectionKey, RecordsReadBack>,
}

impl InMemoryProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ProjectionKey) -> Option<RecordsReadBack> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn insert(&self, key: ProjectionKey, value: RecordsReadBack) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReadCache for InMemoryProjectionCache {
    fn invalidate(&self, datasheet_id: &DatasheetId) {
        self.entries.retain(|key, _| &key.datasheet_id != datasheet_id);
    }
}

/// 按顺序失效多个读缓存，会话只持有一个端口
#[derive(Clone)]
pub struct ReadCacheChain(Vec<Arc<dyn ReadCache>>);

impl ReadCacheChain {
    pub fn new(caches: impl IntoIterator<Item = Arc<dyn ReadCache>>) -> Self {
        Self(caches.into_iter().collect())
    }
}

impl ReadCache for ReadCacheChain {
    fn invalidate(&self, datasheet_id: &DatasheetId) {
        for cache in &self.0 {
            cache.invalidate(datasheet_id);
        }
    }
}
