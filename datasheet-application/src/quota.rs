use crate::config::RecordLimitConfig;
use crate::error::{AppError, AppResult};
use crate::ports::{QuotaNotifier, RecordQuotaNotice};

/// 记录数配额检查
///
/// `total` 为新增后的记录总数：接近上限时提醒（非致命），超过上限时通知并拒绝。
pub async fn check_record_quota(
    notifier: &dyn QuotaNotifier,
    limit: &RecordLimitConfig,
    notice: RecordQuotaNotice,
) -> AppResult<()> {
    let total = notice.total;
    let max = limit.max_record_count;

    if limit.should_remind(total) {
        tracing::info!(datasheet = %notice.datasheet_id, total, max, "record count close to limit");
        if let Err(err) = notifier.remind_soon_limit(&notice).await {
            tracing::warn!(datasheet = %notice.datasheet_id, "remind notification failed: {err}");
        }
    }

    if total > max {
        tracing::warn!(datasheet = %notice.datasheet_id, total, max, "record count over limit");
        if let Err(err) = notifier.notify_out_of_limit(&notice).await {
            tracing::warn!(datasheet = %notice.datasheet_id, "over-limit notification failed: {err}");
        }
        return Err(AppError::QuotaExceeded {
            datasheet_id: notice.datasheet_id.to_string(),
            total,
            max,
        });
    }

    Ok(())
}
