//! 通知分发错误类型
//!
//! 区分"终止整条事件"（文档缺失、事件不完整）与"单个收件人失败"（投递失败、超时）两类错误。
//! 收件人被偏好设置过滤不属于错误，见 `preferences::Exclusion`。

use souk_shared::error::SharedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// 事件引用的文档不存在（如会话被删除）
    #[error("文档未找到: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// 事件快照缺少必需字段（如消息没有 text）
    #[error("事件格式错误: {0}")]
    MalformedEvent(String),

    /// 存储中的文档无法按预期结构解析
    #[error("文档格式错误: {collection}/{id}, 原因={reason}")]
    MalformedDocument {
        collection: String,
        id: String,
        reason: String,
    },

    /// 推送网关拒绝或返回错误，原因对分发器不透明
    #[error("推送投递失败: {reason}")]
    Delivery { reason: String },

    #[error("操作超时: {operation}")]
    Timeout { operation: String },

    #[error(transparent)]
    Shared(#[from] SharedError),
}

impl DispatchError {
    /// 终止整条事件的错误：记录日志后结束处理，不发送任何通知
    pub fn aborts_event(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::MalformedEvent(_) | Self::MalformedDocument { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::MalformedEvent(_) => "MALFORMED_EVENT",
            Self::MalformedDocument { .. } => "MALFORMED_DOCUMENT",
            Self::Delivery { .. } => "DELIVERY_FAILURE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Shared(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let not_found = DispatchError::NotFound {
            collection: "Conversation".to_string(),
            id: "c-1".to_string(),
        };
        assert_eq!(not_found.to_string(), "文档未找到: Conversation/c-1");

        let malformed = DispatchError::MalformedEvent("消息缺少 text 字段".to_string());
        assert_eq!(malformed.to_string(), "事件格式错误: 消息缺少 text 字段");

        let delivery = DispatchError::Delivery {
            reason: "HTTP 404".to_string(),
        };
        assert_eq!(delivery.to_string(), "推送投递失败: HTTP 404");

        let shared = DispatchError::from(SharedError::Kafka("broker 不可达".to_string()));
        assert_eq!(shared.to_string(), "Kafka 错误: broker 不可达");
    }

    #[test]
    fn test_aborts_event() {
        assert!(DispatchError::MalformedEvent("x".to_string()).aborts_event());
        assert!(
            DispatchError::NotFound {
                collection: "users".to_string(),
                id: "u-1".to_string(),
            }
            .aborts_event()
        );
        assert!(
            !DispatchError::Timeout {
                operation: "push send".to_string(),
            }
            .aborts_event()
        );
        assert_eq!(
            DispatchError::Delivery {
                reason: "x".to_string()
            }
            .code(),
            "DELIVERY_FAILURE"
        );
    }
}
