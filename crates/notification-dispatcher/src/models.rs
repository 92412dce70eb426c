//! 文档模型
//!
//! 分发器只读取应用写入的文档，字段名沿用应用侧的 camelCase。
//! 所有可缺省的开关都使用 `Option<bool>`：缺失即"允许"，避免把用户静默退订。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// 文档集合名称
pub mod collections {
    pub const USERS: &str = "users";
    pub const USER_SETTINGS: &str = "user_settings";
    pub const CONVERSATIONS: &str = "Conversation";
    pub const PRODUCTS: &str = "products";
    pub const SHOPS: &str = "shops";
    pub const SHOP_LIKES: &str = "shop_likes";
}

/// 通知类别，同时决定偏好设置中对应的分类开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    NewProduct,
    Promotion,
}

impl NotificationKind {
    /// 写入推送 data.type 以及指标标签的取值
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::NewProduct => "new_product",
            Self::Promotion => "promotion",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub full_name: Option<String>,
    /// 设备推送地址，缺失或为空表示无法投递
    #[serde(default)]
    pub fcm_token: Option<String>,
}

impl User {
    pub fn push_token(&self) -> Option<&str> {
        self.fcm_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.full_name.as_deref().filter(|n| !n.is_empty())
    }
}

/// 逐字段宽松解析：类型不符的值视为缺失，不影响同一文档中的其他字段
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// 用户设置（文档 id 与用户 id 相同）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default, deserialize_with = "lenient")]
    pub notification_preferences: Option<NotificationPreferences>,
}

impl UserSettings {
    pub fn preferences(&self) -> NotificationPreferences {
        self.notification_preferences.clone().unwrap_or_default()
    }
}

/// 通知偏好
///
/// 免打扰时段以 24 小时制表示；`quiet_start_hour` 缺失时免打扰关闭，
/// 其余分钟和结束时间缺失时按 0 计算。
/// 每个字段独立解析，某个字段类型错误只会让该字段回落到缺省值，显式的退订仍然生效。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    #[serde(default, deserialize_with = "lenient")]
    pub push: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub messages: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub new_products: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub shop_promotions: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub quiet_start_hour: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub quiet_start_minute: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub quiet_end_hour: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub quiet_end_minute: Option<u32>,
}

impl NotificationPreferences {
    /// 全局推送开关，只有显式 false 才算关闭
    pub fn push_enabled(&self) -> bool {
        self.push != Some(false)
    }

    /// 通知类别对应的分类开关，只有显式 false 才算关闭
    pub fn category_enabled(&self, kind: NotificationKind) -> bool {
        let flag = match kind {
            NotificationKind::Message => self.messages,
            NotificationKind::NewProduct => self.new_products,
            NotificationKind::Promotion => self.shop_promotions,
        };
        flag != Some(false)
    }
}

/// 买卖双方的会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub buyer_id: String,
    pub seller_id: String,
}

/// 会话中的一条消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: String,
    pub text: String,
}

/// 商品
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub shop_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// 店铺
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub has_promotion: Option<bool>,
    #[serde(default)]
    pub promotion_message: Option<String>,
}

/// 用户关注店铺的关系；`liked == true` 的记录构成店铺的粉丝集合
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopLike {
    pub shop_id: String,
    pub user_id: String,
    #[serde(default)]
    pub liked: bool,
}
