//! 内存版广播（InMemoryBroadcast）
//!
//! 基于 `tokio::sync::broadcast` 实现的 `BroadcastNotifier`：
//! - `notify`：克隆并广播已应用的变更；
//! - `subscribe`：返回 `'static` 生命周期的变更流，便于在 `tokio::spawn` 中消费。
//!
//! 无订阅者时发送被忽略。
//!
use crate::config::MutationConfig;
use crate::error::{AppError, AppResult};
use crate::ports::{AuthorityApplyResult, BroadcastNotifier};
use async_trait::async_trait;
use datasheet_domain::ids::DatasheetId;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// 推送给订阅者的房间变更
#[derive(Debug, Clone, PartialEq)]
pub struct RoomChange {
    pub resource_id: DatasheetId,
    pub result: AuthorityApplyResult,
}

#[derive(Clone)]
pub struct InMemoryBroadcast {
    tx: broadcast::Sender<RoomChange>,
}

impl InMemoryBroadcast {
    /// `capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn from_config(config: &MutationConfig) -> Self {
        Self::new(config.broadcast_capacity)
    }

    pub fn subscribe(&self) -> BoxStream<'static, AppResult<RoomChange>> {
        let stream = BroadcastStream::new(self.tx.subscribe())
            .map(|r| r.map_err(|e| AppError::BroadcastFailure(e.to_string())));
        Box::pin(stream)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl BroadcastNotifier for InMemoryBroadcast {
    async fn notify(&self, resource_id: &DatasheetId, result: &AuthorityApplyResult) -> AppResult<()> {
        let _ = self.tx.send(RoomChange {
            resource_id: resource_id.clone(),
            result: result.clone(),
        });
        Ok(())
    }
}
