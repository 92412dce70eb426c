//! 文档变更消费者
//!
//! 从 Kafka 消费文档变更事件，交给分发器处理。
//! 任何处理失败都只记录日志，消费循环继续处理下一条事件。

use std::sync::Arc;

use souk_shared::config::AppConfig;
use souk_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use souk_shared::observability::tracing::set_parent_from_headers;
use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span};

use crate::error::DispatchError;
use crate::event::DocumentChange;
use crate::router::{DispatchOutcome, Dispatcher};

/// 文档变更消费者
pub struct DocumentChangeConsumer {
    consumer: KafkaConsumer,
    dispatcher: Arc<Dispatcher>,
}

impl DocumentChangeConsumer {
    pub fn new(config: &AppConfig, dispatcher: Arc<Dispatcher>) -> Result<Self, DispatchError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("dispatcher"))?;
        Ok(Self {
            consumer,
            dispatcher,
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    ///
    /// 正在处理的事件会先完成，再响应关闭。
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), DispatchError> {
        self.consumer.subscribe(&[topics::DOCUMENT_CHANGES])?;

        info!(topic = topics::DOCUMENT_CHANGES, "文档变更消费者已启动");

        let dispatcher = self.dispatcher;

        self.consumer
            .start(shutdown, |msg| {
                let dispatcher = &dispatcher;
                async move {
                    if let Err(e) = handle_message(dispatcher, &msg).await {
                        error!(
                            error = %e,
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            "文档变更事件无法解析，已跳过"
                        );
                    }
                    Ok(())
                }
            })
            .await;

        info!("文档变更消费者已停止");
        Ok(())
    }
}

/// 处理单条 Kafka 消息
///
/// 拆分为独立函数，便于在测试中直接调用而无需连接 Kafka。
pub async fn handle_message(
    dispatcher: &Dispatcher,
    msg: &ConsumerMessage,
) -> Result<DispatchOutcome, DispatchError> {
    let change: DocumentChange = msg
        .deserialize_payload()
        .map_err(|e| DispatchError::MalformedEvent(e.to_string()))?;

    let span = info_span!(
        "document_change",
        topic = %msg.topic,
        partition = msg.partition,
        offset = msg.offset,
    );
    set_parent_from_headers(&span, &msg.headers);

    Ok(dispatcher.handle(&change).instrument(span).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::gateway::LogOnlyGateway;
    use crate::models::collections;
    use crate::store::InMemoryDocumentStore;
    use serde_json::json;
    use souk_shared::config::DispatchConfig;
    use std::collections::HashMap;

    fn make_message(payload: Vec<u8>) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::DOCUMENT_CHANGES.to_string(),
            partition: 0,
            offset: 7,
            key: Some("shops/s-1".to_string()),
            payload,
            timestamp: None,
            headers: HashMap::from([(
                "traceparent".to_string(),
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
            )]),
        }
    }

    fn make_dispatcher(store: Arc<InMemoryDocumentStore>) -> Dispatcher {
        Dispatcher::new(
            store,
            Arc::new(LogOnlyGateway),
            Arc::new(FixedClock::at(10, 0).unwrap()),
            &DispatchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_handle_message_dispatches_change() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert(
            collections::SHOP_LIKES,
            "l-1",
            json!({"shopId": "s-1", "userId": "u-1", "liked": true}),
        );
        store.insert(collections::USERS, "u-1", json!({"fcmToken": "tok-1"}));
        let dispatcher = make_dispatcher(store);

        let payload = serde_json::to_vec(&json!({
            "eventId": "evt-1",
            "kind": "updated",
            "path": "shops/s-1",
            "before": {"hasPromotion": false},
            "after": {"hasPromotion": true, "name": "Bab Souk"}
        }))
        .unwrap();

        let outcome = handle_message(&dispatcher, &make_message(payload))
            .await
            .unwrap();
        let DispatchOutcome::Completed(report) = outcome else {
            panic!("expected completed outcome");
        };
        assert_eq!(report.event_id, "evt-1");
        assert_eq!(report.delivered(), 1);
    }

    #[tokio::test]
    async fn test_handle_message_invalid_json() {
        let dispatcher = make_dispatcher(Arc::new(InMemoryDocumentStore::new()));
        let result = handle_message(&dispatcher, &make_message(b"not valid json".to_vec())).await;
        assert!(matches!(result, Err(DispatchError::MalformedEvent(_))));
    }

    #[tokio::test]
    async fn test_handle_message_ignores_unrouted_change() {
        let dispatcher = make_dispatcher(Arc::new(InMemoryDocumentStore::new()));
        let payload = serde_json::to_vec(&DocumentChange::created("reviews/r-1", json!({}))).unwrap();
        let outcome = handle_message(&dispatcher, &make_message(payload)).await;
        tokio_test::assert_ok!(&outcome);
        assert_eq!(outcome.unwrap(), DispatchOutcome::Ignored);
    }
}
