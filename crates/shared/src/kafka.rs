//! 文档变更流的 Kafka 接入
//!
//! 只有消费方向：分发器订阅文档变更 topic，逐条取出、转成自有所有权的
//! [`ConsumerMessage`] 后交给处理函数。提交位点由 rdkafka 自动完成。

use std::collections::HashMap;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::SharedError;

pub mod topics {
    /// 文档创建/更新快照，key 为文档路径
    pub const DOCUMENT_CHANGES: &str = "souk.document.changes";
}

/// 一条已脱离 rdkafka 缓冲区的消息
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    /// 仅保留 UTF-8 值，供 traceparent 等文本 header 使用
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let headers = msg
            .headers()
            .map(|h| {
                text_headers(
                    h.iter()
                        .map(|header| (header.key, header.value.unwrap_or_default())),
                )
            })
            .unwrap_or_default();

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg
                .key()
                .and_then(|k| std::str::from_utf8(k).ok())
                .map(String::from),
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 负载按 JSON 解析
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, SharedError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| SharedError::Kafka(format!("负载反序列化失败: {e}")))
    }
}

/// 丢弃空值和非 UTF-8 的 header
fn text_headers<'a>(raw: impl Iterator<Item = (&'a str, &'a [u8])>) -> HashMap<String, String> {
    raw.filter(|(_, value)| !value.is_empty())
        .filter_map(|(key, value)| {
            std::str::from_utf8(value)
                .ok()
                .map(|v| (key.to_string(), v.to_string()))
        })
        .collect()
}

fn group_id(config: &KafkaConfig, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
        None => config.consumer_group.clone(),
    }
}

/// 文档变更消费者的底层连接
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// `group_id_suffix` 追加在配置的消费组名之后，例如 `souk.dispatcher`
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, SharedError> {
        let group_id = group_id(config, group_id_suffix);

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| SharedError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer })
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<(), SharedError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| SharedError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 逐条处理消息，直到关闭信号置为 `true` 或消息流结束
    ///
    /// 消息串行处理，当前消息处理完才会检查关闭信号。
    /// 空负载（tombstone）直接跳过；处理函数返回的错误只记录日志。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), SharedError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                next = stream.next() => {
                    let msg = match next {
                        Some(Ok(borrowed)) => ConsumerMessage::from_borrowed(&borrowed),
                        Some(Err(e)) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                        None => {
                            warn!("Kafka 消息流意外结束");
                            break;
                        }
                    };

                    if msg.payload.is_empty() {
                        debug!(key = ?msg.key, offset = msg.offset, "空负载消息，跳过");
                        continue;
                    }

                    debug!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        bytes = msg.payload.len(),
                        "收到 Kafka 消息"
                    );
                    if let Err(e) = handler(msg).await {
                        error!(error = %e, "处理 Kafka 消息失败");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_payload(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::DOCUMENT_CHANGES.to_string(),
            partition: 0,
            offset: 7,
            key: Some("shops/s-1".to_string()),
            payload: payload.to_vec(),
            timestamp: Some(1_700_000_000_000),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_consumer_message_deserialize() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct Change {
            event_id: String,
            path: String,
        }

        let msg = message_with_payload(br#"{"eventId":"evt-1","path":"shops/s-1"}"#);
        let change: Change = msg.deserialize_payload().unwrap();
        assert_eq!(
            change,
            Change {
                event_id: "evt-1".to_string(),
                path: "shops/s-1".to_string(),
            }
        );
    }

    #[test]
    fn test_consumer_message_deserialize_invalid_json() {
        let msg = message_with_payload(b"not json");
        let result: Result<serde_json::Value, _> = msg.deserialize_payload();
        assert!(matches!(result, Err(SharedError::Kafka(_))));
    }

    #[test]
    fn test_text_headers_drops_binary_and_empty_values() {
        let raw: Vec<(&str, &[u8])> = vec![
            ("traceparent", b"00-abc-def-01"),
            ("binary", &[0xff, 0xfe]),
            ("empty", b""),
        ];
        let headers = text_headers(raw.into_iter());
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["traceparent"], "00-abc-def-01");
    }

    #[test]
    fn test_group_id_suffix() {
        let config = KafkaConfig::default();
        assert_eq!(group_id(&config, None), config.consumer_group);
        assert_eq!(
            group_id(&config, Some("dispatcher")),
            format!("{}.dispatcher", config.consumer_group)
        );
    }
}
