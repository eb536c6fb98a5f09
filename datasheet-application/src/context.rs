use bon::Builder;
use datasheet_domain::ids::{DatasheetId, FieldId, RecordId, UserId};
use datasheet_domain::snapshot::{Field, Meta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 应用层上下文（Application Context）
///
/// 承载一次应用层调用所需的横切信息：
/// - 关联追踪 `correlation_id`，写入日志；
/// - 调用方认证信息（`AuthContext`），透传给快照源与权威服务。
///
/// 典型用法：
/// ```rust
/// use datasheet_application::context::{AppContext, AuthContext};
///
/// let ctx = AppContext {
///     correlation_id: Some("cor-123".into()),
///     auth: AuthContext::user("usr1".into(), "Bearer t0k3n"),
/// };
/// assert!(!ctx.auth.is_internal());
/// ```
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub correlation_id: Option<String>,
    pub auth: AuthContext,
}

/// 调用方认证信息
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Option<UserId>,
    pub token: Option<String>,
    /// 内部调用（不携带用户凭证）
    #[serde(default)]
    pub internal: bool,
}

impl AuthContext {
    pub fn user(user_id: UserId, token: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            token: Some(token.into()),
            internal: false,
        }
    }

    pub fn internal() -> Self {
        Self {
            internal: true,
            ..Self::default()
        }
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }
}

/// 内部修复时提交给权威服务的身份覆盖
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InternalAuth {
    Anonymous,
    DesignatedUser { user_id: UserId, uuid: String },
}

/// 调用方请求的内部修复选项
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalFix {
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub fix_user: Option<FixUser>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixUser {
    pub user_id: UserId,
    pub uuid: String,
}

impl InternalFix {
    /// 匿名优先；两者都未指定时不覆盖身份
    pub fn to_internal_auth(&self) -> Option<InternalAuth> {
        if self.anonymous {
            return Some(InternalAuth::Anonymous);
        }
        self.fix_user.as_ref().map(|u| InternalAuth::DesignatedUser {
            user_id: u.user_id.clone(),
            uuid: u.uuid.clone(),
        })
    }
}

/// 请求级修饰信息，显式传入变更会话
#[derive(Builder, Clone, Debug, Default)]
pub struct MutationContext {
    /// 已获取的目标表元数据（存在时加载器不再二次获取）
    pub meta: Option<Meta>,
    /// 关联表需加载的记录
    pub linked_record_map: Option<BTreeMap<DatasheetId, Vec<RecordId>>>,
    /// 需要补全选项的单/多选字段（补全后的完整定义）
    #[builder(default)]
    pub enrich_select_fields: BTreeMap<FieldId, Field>,
    pub space_id: Option<String>,
    pub user_id: Option<UserId>,
    /// 记录来源（如表单 / 自动化 ID）
    pub source_id: Option<String>,
}
