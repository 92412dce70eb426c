//! 收件人解析
//!
//! 消息事件只有一个收件人（会话中的另一方）；新品和促销事件的收件人
//! 是关注该店铺的全部用户。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::models::{Conversation, ShopLike, collections};
use crate::store::{DocumentStore, FieldFilter, get_typed};

/// 会话中消息的收件人：卖家发出的发给买家，其他情况发给卖家
pub fn message_recipient<'a>(conversation: &'a Conversation, sender_id: &str) -> &'a str {
    if sender_id == conversation.seller_id {
        &conversation.buyer_id
    } else {
        &conversation.seller_id
    }
}

pub struct RecipientResolver {
    store: Arc<dyn DocumentStore>,
}

impl RecipientResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// 解析消息收件人
    ///
    /// 会话不存在时返回 `NotFound`，由调用方终止整条事件。
    pub async fn message_recipient(
        &self,
        conversation_id: &str,
        sender_id: &str,
    ) -> Result<String, DispatchError> {
        let conversation: Conversation =
            get_typed(self.store.as_ref(), collections::CONVERSATIONS, conversation_id)
                .await?
                .ok_or_else(|| DispatchError::NotFound {
                    collection: collections::CONVERSATIONS.to_string(),
                    id: conversation_id.to_string(),
                })?;

        let recipient = message_recipient(&conversation, sender_id);
        debug!(conversation_id, sender_id, recipient, "消息收件人解析完成");
        Ok(recipient.to_string())
    }

    /// 查询店铺的粉丝
    ///
    /// 只取 `liked == true` 的关注记录，按 userId 去重并保持查询顺序。
    /// 无法解析的单条记录跳过，不影响其他粉丝。
    pub async fn shop_followers(&self, shop_id: &str) -> Result<Vec<String>, DispatchError> {
        let filters = [FieldFilter::eq("shopId", shop_id), FieldFilter::eq("liked", true)];
        let documents = self.store.query_eq(collections::SHOP_LIKES, &filters).await?;

        let mut seen = HashSet::new();
        let mut followers = Vec::with_capacity(documents.len());
        for document in &documents {
            let like: ShopLike = match document.decode(collections::SHOP_LIKES) {
                Ok(like) => like,
                Err(e) => {
                    warn!(shop_id, error = %e, "关注记录无法解析，已跳过");
                    continue;
                }
            };
            if like.liked && !like.user_id.is_empty() && seen.insert(like.user_id.clone()) {
                followers.push(like.user_id);
            }
        }

        debug!(shop_id, count = followers.len(), "店铺粉丝解析完成");
        Ok(followers)
    }
}
