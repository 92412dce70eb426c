//! 偏好过滤
//!
//! 对每个候选收件人依次检查：推送令牌、全局推送开关、分类开关、免打扰时段。
//! 任一检查不通过即短路返回排除原因。排除是正常结果，不是错误。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::{Clock, MINUTES_PER_DAY, minutes_since_midnight};
use crate::error::DispatchError;
use crate::models::{NotificationKind, NotificationPreferences, User, UserSettings, collections};
use crate::store::{DocumentStore, get_typed};

/// 收件人被排除的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exclusion {
    UserNotFound,
    MissingToken,
    PushDisabled,
    CategoryDisabled,
    QuietHours,
}

impl Exclusion {
    /// 指标标签
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserNotFound => "user_not_found",
            Self::MissingToken => "missing_token",
            Self::PushDisabled => "push_disabled",
            Self::CategoryDisabled => "category_disabled",
            Self::QuietHours => "quiet_hours",
        }
    }
}

impl std::fmt::Display for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 过滤结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible { token: String },
    Excluded(Exclusion),
}

/// 免打扰时段（距午夜的分钟数）
///
/// `start <= end` 时为当天区间 `[start, end)`，因此 `start == end` 永远不生效；
/// `start > end` 时跨越午夜，为 `[start, 1440) ∪ [0, end)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    start: u32,
    end: u32,
}

impl QuietHours {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// 未设置开始小时时返回 None（免打扰关闭）
    ///
    /// 小时超过 23 或分钟超过 59 视为无效设置，同样关闭免打扰。
    pub fn from_preferences(prefs: &NotificationPreferences) -> Option<Self> {
        let start_hour = prefs.quiet_start_hour?;
        let start = clock_minute(start_hour, prefs.quiet_start_minute.unwrap_or(0));
        let end = clock_minute(
            prefs.quiet_end_hour.unwrap_or(0),
            prefs.quiet_end_minute.unwrap_or(0),
        );
        match (start, end) {
            (Some(start), Some(end)) => Some(Self::new(start, end)),
            _ => {
                warn!(
                    start_hour,
                    start_minute = ?prefs.quiet_start_minute,
                    end_hour = ?prefs.quiet_end_hour,
                    end_minute = ?prefs.quiet_end_minute,
                    "免打扰时段超出范围，已忽略"
                );
                None
            }
        }
    }

    pub fn contains(&self, minute: u32) -> bool {
        let minute = minute % MINUTES_PER_DAY;
        if self.start <= self.end {
            minute >= self.start && minute < self.end
        } else {
            minute >= self.start || minute < self.end
        }
    }
}

fn clock_minute(hour: u32, minute: u32) -> Option<u32> {
    (hour < 24 && minute < 60).then(|| hour * 60 + minute)
}

/// 纯函数形式的过滤判定
///
/// `minute_of_day` 为收件人本地时间距午夜的分钟数。
pub fn evaluate(
    user: Option<&User>,
    settings: Option<&UserSettings>,
    kind: NotificationKind,
    minute_of_day: u32,
) -> Eligibility {
    let Some(user) = user else {
        return Eligibility::Excluded(Exclusion::UserNotFound);
    };
    let Some(token) = user.push_token() else {
        return Eligibility::Excluded(Exclusion::MissingToken);
    };

    let prefs = settings.map(UserSettings::preferences).unwrap_or_default();
    if !prefs.push_enabled() {
        return Eligibility::Excluded(Exclusion::PushDisabled);
    }
    if !prefs.category_enabled(kind) {
        return Eligibility::Excluded(Exclusion::CategoryDisabled);
    }
    if QuietHours::from_preferences(&prefs).is_some_and(|q| q.contains(minute_of_day)) {
        return Eligibility::Excluded(Exclusion::QuietHours);
    }

    Eligibility::Eligible {
        token: token.to_string(),
    }
}

/// 偏好过滤器，读取用户及其设置后做判定
pub struct PreferenceFilter {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl PreferenceFilter {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// 判定某个用户能否接收该类通知
    ///
    /// 用户文档读取失败或无法解析时返回错误（计为该收件人失败）；
    /// 设置文档无法解析时按默认设置处理。
    pub async fn check(
        &self,
        user_id: &str,
        kind: NotificationKind,
    ) -> Result<Eligibility, DispatchError> {
        let user: Option<User> = get_typed(self.store.as_ref(), collections::USERS, user_id).await?;

        // 无令牌时无需再读设置
        if user.as_ref().and_then(User::push_token).is_none() {
            return Ok(evaluate(user.as_ref(), None, kind, 0));
        }

        let settings = match get_typed::<UserSettings>(
            self.store.as_ref(),
            collections::USER_SETTINGS,
            user_id,
        )
        .await
        {
            Ok(settings) => settings,
            Err(e @ DispatchError::MalformedDocument { .. }) => {
                warn!(user_id, error = %e, "用户设置无法解析，按默认设置处理");
                None
            }
            Err(e) => return Err(e),
        };

        let minute = minutes_since_midnight(&self.clock.now());
        let eligibility = evaluate(user.as_ref(), settings.as_ref(), kind, minute);
        debug!(user_id, kind = %kind, ?eligibility, "偏好过滤完成");
        Ok(eligibility)
    }
}
