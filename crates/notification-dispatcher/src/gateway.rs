//! 推送网关
//!
//! 通过 `PushGateway` trait 抽象"向一个设备令牌发送一条通知"的行为。
//! 生产环境使用 FCM HTTP v1 接口，本地开发使用只记录日志的实现。
//! 网关只负责单次发送，超时和并发由 `delivery` 模块控制。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use souk_shared::config::PushConfig;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DispatchError;

/// 待发送的推送消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// 设备推送令牌
    pub token: String,
    pub title: String,
    pub body: String,
    /// 附加数据，客户端据此跳转（全部为字符串）
    pub data: BTreeMap<String, String>,
}

/// 推送网关
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// 发送一条推送，成功时返回网关分配的消息 id
    async fn send(&self, message: &PushMessage) -> Result<String, DispatchError>;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// FCM HTTP v1
// ---------------------------------------------------------------------------

/// FCM HTTP v1 推送网关
///
/// `POST {endpoint}/v1/projects/{project_id}/messages:send`，
/// 访问令牌由部署环境提供，本服务不负责刷新。
pub struct FcmGateway {
    client: reqwest::Client,
    send_url: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FcmSendResponse {
    /// 形如 `projects/{project}/messages/{id}`
    name: String,
}

impl FcmGateway {
    pub fn new(config: &PushConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DispatchError::Delivery {
                reason: format!("HTTP 客户端初始化失败: {e}"),
            })?;

        if config.access_token.is_none() {
            warn!("未配置 FCM 访问令牌，请求将被网关拒绝");
        }

        Ok(Self {
            client,
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                config.endpoint.trim_end_matches('/'),
                config.project_id
            ),
            access_token: config.access_token.clone(),
        })
    }

    pub fn send_url(&self) -> &str {
        &self.send_url
    }

    fn request_body(message: &PushMessage) -> serde_json::Value {
        json!({
            "message": {
                "token": message.token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
            }
        })
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send(&self, message: &PushMessage) -> Result<String, DispatchError> {
        let mut request = self
            .client
            .post(&self.send_url)
            .json(&Self::request_body(message));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout {
                    operation: "fcm send".to_string(),
                }
            } else {
                DispatchError::Delivery {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DispatchError::Delivery {
                reason: format!("HTTP {}: {}", status.as_u16(), detail),
            });
        }

        let body: FcmSendResponse =
            response
                .json()
                .await
                .map_err(|e| DispatchError::Delivery {
                    reason: format!("响应解析失败: {e}"),
                })?;

        debug!(message_name = %body.name, "FCM 接受推送");

        Ok(body
            .name
            .rsplit('/')
            .next()
            .unwrap_or(body.name.as_str())
            .to_string())
    }

    fn name(&self) -> &'static str {
        "fcm"
    }
}

// ---------------------------------------------------------------------------
// 日志网关
// ---------------------------------------------------------------------------

/// 只记录日志的推送网关
///
/// 不访问任何外部服务，便于在本地验证整条分发管道。
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyGateway;

#[async_trait]
impl PushGateway for LogOnlyGateway {
    async fn send(&self, message: &PushMessage) -> Result<String, DispatchError> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            gateway = "log",
            message_id = %message_id,
            notification_type = message.data.get("type").map(String::as_str).unwrap_or(""),
            title = %message.title,
            "模拟发送推送通知"
        );

        Ok(message_id)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> PushMessage {
        PushMessage {
            token: "tok-1".to_string(),
            title: "New message from Amina".to_string(),
            body: "Salam".to_string(),
            data: BTreeMap::from([
                ("type".to_string(), "message".to_string()),
                ("conversationId".to_string(), "c-1".to_string()),
            ]),
        }
    }

    #[tokio::test]
    async fn test_log_gateway_returns_message_id() {
        let gateway = LogOnlyGateway;
        let id = gateway.send(&message()).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(gateway.name(), "log");
    }

    #[test]
    fn test_fcm_send_url() {
        let config = PushConfig {
            endpoint: "https://fcm.example.test/".to_string(),
            project_id: "souk-prod".to_string(),
            ..Default::default()
        };
        let gateway = FcmGateway::new(&config).unwrap();
        assert_eq!(
            gateway.send_url(),
            "https://fcm.example.test/v1/projects/souk-prod/messages:send"
        );
        assert_eq!(gateway.name(), "fcm");
    }

    #[test]
    fn test_fcm_request_body() {
        let body = FcmGateway::request_body(&message());
        assert_eq!(body["message"]["token"], "tok-1");
        assert_eq!(body["message"]["notification"]["title"], "New message from Amina");
        assert_eq!(body["message"]["notification"]["body"], "Salam");
        assert_eq!(body["message"]["data"]["type"], "message");
        assert_eq!(body["message"]["data"]["conversationId"], "c-1");
    }

    #[tokio::test]
    async fn test_fcm_unreachable_endpoint_fails() {
        let config = PushConfig {
            provider: "fcm".to_string(),
            endpoint: "http://127.0.0.1:1".to_string(),
            request_timeout_ms: 500,
            ..Default::default()
        };
        let gateway = FcmGateway::new(&config).unwrap();
        let result = gateway.send(&message()).await;
        assert!(matches!(
            result,
            Err(DispatchError::Delivery { .. } | DispatchError::Timeout { .. })
        ));
    }
}
