//! 事件路由与分发
//!
//! 按文档路径模式和变更类型把事件绑定到三个处理器之一：
//!
//! - `Conversation/{conversationId}/messages/{messageId}` 创建 → 新消息通知
//! - `products/{productId}` 创建 → 新品通知
//! - `shops/{shopId}` 更新且 `hasPromotion` 由假变真 → 促销通知
//!
//! 其余事件一律忽略。处理过程中的错误只记录日志，`Dispatcher::handle` 永远正常返回。

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use souk_shared::config::DispatchConfig;
use souk_shared::observability::metrics as app_metrics;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::composer::{NotificationContext, NotificationPayload, compose};
use crate::delivery::{DeliveryExecutor, DispatchReport, RecipientOutcome, RecipientStatus};
use crate::error::DispatchError;
use crate::event::{ChangeKind, DocumentChange, PathPattern};
use crate::gateway::PushGateway;
use crate::models::{Message, NotificationKind, Product, Shop, User, collections};
use crate::preferences::{Eligibility, PreferenceFilter};
use crate::resolver::RecipientResolver;
use crate::store::{DocumentStore, get_typed};

pub const MESSAGE_PATH: PathPattern =
    PathPattern::new("Conversation/{conversationId}/messages/{messageId}");
pub const PRODUCT_PATH: PathPattern = PathPattern::new("products/{productId}");
pub const SHOP_PATH: PathPattern = PathPattern::new("shops/{shopId}");

/// 路由结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Message {
        conversation_id: String,
        message_id: String,
    },
    NewProduct {
        product_id: String,
    },
    Promotion {
        shop_id: String,
    },
}

impl Route {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Message { .. } => NotificationKind::Message,
            Self::NewProduct { .. } => NotificationKind::NewProduct,
            Self::Promotion { .. } => NotificationKind::Promotion,
        }
    }
}

fn has_promotion(snapshot: Option<&Value>) -> bool {
    snapshot
        .and_then(|s| s.get("hasPromotion"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// 促销是否刚刚开启（假或缺失 → 真）
pub fn promotion_enabled(before: Option<&Value>, after: Option<&Value>) -> bool {
    !has_promotion(before) && has_promotion(after)
}

/// 把文档变更映射到处理器，不匹配时返回 None
pub fn route(change: &DocumentChange) -> Option<Route> {
    match change.kind {
        ChangeKind::Created => {
            if let Some(params) = MESSAGE_PATH.matches(&change.path) {
                return Some(Route::Message {
                    conversation_id: params.get("conversationId")?.to_string(),
                    message_id: params.get("messageId")?.to_string(),
                });
            }
            PRODUCT_PATH.matches(&change.path).and_then(|params| {
                Some(Route::NewProduct {
                    product_id: params.get("productId")?.to_string(),
                })
            })
        }
        ChangeKind::Updated => {
            let params = SHOP_PATH.matches(&change.path)?;
            if !promotion_enabled(change.before.as_ref(), change.after.as_ref()) {
                return None;
            }
            Some(Route::Promotion {
                shop_id: params.get("shopId")?.to_string(),
            })
        }
        ChangeKind::Deleted => None,
    }
}

/// 一条事件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 没有匹配的处理器，或促销状态没有变化
    Ignored,
    /// 事件被终止（文档缺失、快照不完整、存储不可用），未发送任何通知
    Aborted { reason: String },
    Completed(DispatchReport),
}

/// 通知分发器
pub struct Dispatcher {
    store: Arc<dyn DocumentStore>,
    resolver: RecipientResolver,
    filter: PreferenceFilter,
    executor: DeliveryExecutor,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn PushGateway>,
        clock: Arc<dyn Clock>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            resolver: RecipientResolver::new(store.clone()),
            filter: PreferenceFilter::new(store.clone(), clock),
            executor: DeliveryExecutor::new(gateway, config.send_timeout(), config.max_concurrency),
            store,
        }
    }

    /// 处理一条文档变更
    #[instrument(skip(self, change), fields(event_id = %change.event_id, path = %change.path))]
    pub async fn handle(&self, change: &DocumentChange) -> DispatchOutcome {
        let Some(route) = route(change) else {
            debug!(kind = ?change.kind, "事件无需处理");
            return DispatchOutcome::Ignored;
        };

        let handler = route.kind().as_str();
        app_metrics::record_document_event(handler);
        let started = Instant::now();

        let result = match &route {
            Route::Message {
                conversation_id, ..
            } => self.handle_message(change, conversation_id).await,
            Route::NewProduct { product_id } => self.handle_new_product(change, product_id).await,
            Route::Promotion { shop_id } => self.handle_promotion(change, shop_id).await,
        };

        app_metrics::record_dispatch_duration(handler, started.elapsed().as_secs_f64());

        match result {
            Ok(report) => {
                info!(
                    handler,
                    candidates = report.candidates(),
                    delivered = report.delivered(),
                    excluded = report.excluded(),
                    failed = report.failed(),
                    "事件分发完成"
                );
                DispatchOutcome::Completed(report)
            }
            Err(e) => {
                if e.aborts_event() {
                    warn!(handler, code = e.code(), error = %e, "事件已终止");
                } else {
                    error!(handler, code = e.code(), error = %e, "事件处理失败");
                }
                DispatchOutcome::Aborted {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn handle_message(
        &self,
        change: &DocumentChange,
        conversation_id: &str,
    ) -> Result<DispatchReport, DispatchError> {
        let message: Message = decode_snapshot(change.after.as_ref(), "消息")?;
        let recipient = self
            .resolver
            .message_recipient(conversation_id, &message.sender_id)
            .await?;

        let sender_name = self.display_name(&message.sender_id).await;
        let payload = compose(&NotificationContext::Message {
            conversation_id: conversation_id.to_string(),
            sender_id: message.sender_id.clone(),
            sender_name,
            text: message.text,
        });

        let outcome = self
            .notify_recipient(recipient, NotificationKind::Message, &payload)
            .await;

        let mut report = DispatchReport::new(&change.event_id, NotificationKind::Message);
        report.outcomes.push(outcome);
        Ok(report)
    }

    async fn handle_new_product(
        &self,
        change: &DocumentChange,
        product_id: &str,
    ) -> Result<DispatchReport, DispatchError> {
        let product: Product = decode_snapshot(change.after.as_ref(), "商品")?;
        let followers = self.resolver.shop_followers(&product.shop_id).await?;
        if followers.is_empty() {
            debug!(shop_id = %product.shop_id, "店铺没有粉丝");
            return Ok(DispatchReport::new(&change.event_id, NotificationKind::NewProduct));
        }

        let shop_name = self.shop_name(&product.shop_id).await;
        let payload = compose(&NotificationContext::NewProduct {
            shop_id: product.shop_id.clone(),
            product_id: product_id.to_string(),
            shop_name,
            product_title: product.title,
        });

        self.fan_out(change, followers, NotificationKind::NewProduct, &payload)
            .await
    }

    async fn handle_promotion(
        &self,
        change: &DocumentChange,
        shop_id: &str,
    ) -> Result<DispatchReport, DispatchError> {
        let shop: Shop = decode_snapshot(change.after.as_ref(), "店铺")?;
        let followers = self.resolver.shop_followers(shop_id).await?;
        if followers.is_empty() {
            debug!(shop_id, "店铺没有粉丝");
            return Ok(DispatchReport::new(&change.event_id, NotificationKind::Promotion));
        }

        let payload = compose(&NotificationContext::Promotion {
            shop_id: shop_id.to_string(),
            shop_name: shop.name,
            promotion_message: shop.promotion_message,
        });

        self.fan_out(change, followers, NotificationKind::Promotion, &payload)
            .await
    }

    async fn fan_out(
        &self,
        change: &DocumentChange,
        followers: Vec<String>,
        kind: NotificationKind,
        payload: &NotificationPayload,
    ) -> Result<DispatchReport, DispatchError> {
        debug!(
            recipients = followers.len(),
            max_concurrency = self.executor.max_concurrency(),
            "开始扇出投递"
        );

        let tasks: Vec<_> = followers
            .into_iter()
            .map(|user_id| self.notify_recipient(user_id, kind, payload))
            .collect();

        let mut report = DispatchReport::new(&change.event_id, kind);
        report.outcomes = self.executor.run_bounded(tasks).await;
        Ok(report)
    }

    /// 单个收件人的流水线：过滤 → 绑定令牌 → 发送。任何失败都只影响该收件人
    async fn notify_recipient(
        &self,
        user_id: String,
        kind: NotificationKind,
        payload: &NotificationPayload,
    ) -> RecipientOutcome {
        let status = match self.filter.check(&user_id, kind).await {
            Ok(Eligibility::Eligible { token }) => {
                match self.executor.deliver(&payload.to_message(token)).await {
                    Ok(message_id) => {
                        app_metrics::record_notification(kind.as_str(), "delivered");
                        debug!(user_id = %user_id, message_id = %message_id, "推送已发送");
                        RecipientStatus::Delivered { message_id }
                    }
                    Err(e) => {
                        app_metrics::record_notification(kind.as_str(), "failed");
                        warn!(user_id = %user_id, code = e.code(), error = %e, "推送发送失败");
                        RecipientStatus::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Ok(Eligibility::Excluded(reason)) => {
                app_metrics::record_exclusion(kind.as_str(), reason.as_str());
                debug!(user_id = %user_id, reason = %reason, "收件人已被过滤");
                RecipientStatus::Excluded(reason)
            }
            Err(e) => {
                app_metrics::record_notification(kind.as_str(), "failed");
                warn!(user_id = %user_id, code = e.code(), error = %e, "收件人偏好读取失败");
                RecipientStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };

        RecipientOutcome { user_id, status }
    }

    /// 发送者显示名，读取失败时使用默认文案
    async fn display_name(&self, user_id: &str) -> Option<String> {
        match get_typed::<User>(self.store.as_ref(), collections::USERS, user_id).await {
            Ok(user) => user.and_then(|u| u.display_name().map(str::to_string)),
            Err(e) => {
                warn!(user_id, error = %e, "读取发送者失败，使用默认名称");
                None
            }
        }
    }

    /// 店铺名称，读取失败时使用默认文案
    async fn shop_name(&self, shop_id: &str) -> Option<String> {
        match get_typed::<Shop>(self.store.as_ref(), collections::SHOPS, shop_id).await {
            Ok(shop) => shop.and_then(|s| s.name),
            Err(e) => {
                warn!(shop_id, error = %e, "读取店铺失败，使用默认名称");
                None
            }
        }
    }
}

fn decode_snapshot<T: serde::de::DeserializeOwned>(
    snapshot: Option<&Value>,
    what: &str,
) -> Result<T, DispatchError> {
    let snapshot =
        snapshot.ok_or_else(|| DispatchError::MalformedEvent(format!("{what}快照缺失")))?;
    serde_json::from_value(snapshot.clone())
        .map_err(|e| DispatchError::MalformedEvent(format!("{what}快照无法解析: {e}")))
}
