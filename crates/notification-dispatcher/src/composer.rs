//! 通知内容生成
//!
//! 根据事件类型生成标题、正文和附加数据。全部为纯函数，不访问存储。
//! 上下文中缺失或为空的字段使用默认文案，避免上游数据不完整导致无法发送。

use std::collections::BTreeMap;

use crate::gateway::PushMessage;
use crate::models::NotificationKind;

/// 正文最大字符数
pub const MAX_BODY_CHARS: usize = 100;
const ELLIPSIS: &str = "...";

const DEFAULT_SENDER_NAME: &str = "Someone";
const DEFAULT_SHOP_NAME: &str = "A shop you follow";
const DEFAULT_PRODUCT_BODY: &str = "Check out the latest addition!";
const DEFAULT_PROMOTION_BODY: &str = "Special offers available now!";

/// 截断正文
///
/// 超过 100 个字符时保留前 97 个并追加 `...`，总长恰为 100；按 Unicode 标量值计数。
pub fn truncate_body(text: &str) -> String {
    if text.chars().count() <= MAX_BODY_CHARS {
        return text.to_string();
    }
    let keep = MAX_BODY_CHARS - ELLIPSIS.len();
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// 生成通知所需的上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationContext {
    Message {
        conversation_id: String,
        sender_id: String,
        sender_name: Option<String>,
        text: String,
    },
    NewProduct {
        shop_id: String,
        product_id: String,
        shop_name: Option<String>,
        product_title: Option<String>,
    },
    Promotion {
        shop_id: String,
        shop_name: Option<String>,
        promotion_message: Option<String>,
    },
}

impl NotificationContext {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Message { .. } => NotificationKind::Message,
            Self::NewProduct { .. } => NotificationKind::NewProduct,
            Self::Promotion { .. } => NotificationKind::Promotion,
        }
    }
}

/// 与收件人无关的通知内容，一次事件只生成一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl NotificationPayload {
    /// 绑定收件人令牌，得到可发送的消息
    pub fn to_message(&self, token: impl Into<String>) -> PushMessage {
        PushMessage {
            token: token.into(),
            title: self.title.clone(),
            body: self.body.clone(),
            data: self.data.clone(),
        }
    }
}

fn or_default<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    value.filter(|v| !v.is_empty()).unwrap_or(default)
}

pub fn compose(context: &NotificationContext) -> NotificationPayload {
    let kind = context.kind();
    let mut data = BTreeMap::from([("type".to_string(), kind.as_str().to_string())]);

    let (title, body) = match context {
        NotificationContext::Message {
            conversation_id,
            sender_id,
            sender_name,
            text,
        } => {
            data.insert("conversationId".to_string(), conversation_id.clone());
            data.insert("senderId".to_string(), sender_id.clone());
            let name = or_default(sender_name.as_deref(), DEFAULT_SENDER_NAME);
            (format!("New message from {name}"), truncate_body(text))
        }
        NotificationContext::NewProduct {
            shop_id,
            product_id,
            shop_name,
            product_title,
        } => {
            data.insert("shopId".to_string(), shop_id.clone());
            data.insert("productId".to_string(), product_id.clone());
            let name = or_default(shop_name.as_deref(), DEFAULT_SHOP_NAME);
            let body = or_default(product_title.as_deref(), DEFAULT_PRODUCT_BODY);
            (format!("New product at {name}"), body.to_string())
        }
        NotificationContext::Promotion {
            shop_id,
            shop_name,
            promotion_message,
        } => {
            data.insert("shopId".to_string(), shop_id.clone());
            let name = or_default(shop_name.as_deref(), DEFAULT_SHOP_NAME);
            let body = or_default(promotion_message.as_deref(), DEFAULT_PROMOTION_BODY);
            (format!("{name} has a promotion!"), body.to_string())
        }
    };

    NotificationPayload { title, body, data }
}
