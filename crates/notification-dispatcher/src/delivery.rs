//! 投递执行
//!
//! 单次发送加超时；扇出时以信号量限制同时进行的收件人流水线数量。
//! 每个收件人的结果独立收集，失败只记录，不向上传播。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::error::DispatchError;
use crate::gateway::{PushGateway, PushMessage};
use crate::models::NotificationKind;
use crate::preferences::Exclusion;

/// 单个收件人的最终状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientStatus {
    Delivered { message_id: String },
    Excluded(Exclusion),
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub user_id: String,
    pub status: RecipientStatus,
}

/// 一次事件分发的汇总
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_id: String,
    pub kind: NotificationKind,
    pub outcomes: Vec<RecipientOutcome>,
}

impl DispatchReport {
    pub fn new(event_id: impl Into<String>, kind: NotificationKind) -> Self {
        Self {
            event_id: event_id.into(),
            kind,
            outcomes: Vec::new(),
        }
    }

    pub fn candidates(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, RecipientStatus::Delivered { .. }))
            .count()
    }

    pub fn excluded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, RecipientStatus::Excluded(_)))
            .count()
    }

    pub fn excluded_by(&self, reason: Exclusion) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == RecipientStatus::Excluded(reason))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, RecipientStatus::Failed { .. }))
            .count()
    }

    pub fn status_of(&self, user_id: &str) -> Option<&RecipientStatus> {
        self.outcomes
            .iter()
            .find(|o| o.user_id == user_id)
            .map(|o| &o.status)
    }
}

/// 投递执行器
pub struct DeliveryExecutor {
    gateway: Arc<dyn PushGateway>,
    send_timeout: Duration,
    max_concurrency: usize,
}

impl DeliveryExecutor {
    pub fn new(gateway: Arc<dyn PushGateway>, send_timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            gateway,
            send_timeout,
            // 并发上限为 0 时退化为串行
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// 发送一条推送，超时按投递失败处理，不重试
    pub async fn deliver(&self, message: &PushMessage) -> Result<String, DispatchError> {
        tokio::time::timeout(self.send_timeout, self.gateway.send(message))
            .await
            .map_err(|_| DispatchError::Timeout {
                operation: format!("{} send", self.gateway.name()),
            })?
    }

    /// 以有界并发执行一组任务，等待全部结束后按输入顺序返回结果
    pub async fn run_bounded<F, T>(&self, tasks: Vec<F>) -> Vec<T>
    where
        F: Future<Output = T>,
    {
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let guarded = tasks.into_iter().map(|task| {
            let permits = permits.clone();
            async move {
                // 信号量不会被关闭，acquire 失败时仍然执行任务
                let _permit = permits.acquire_owned().await.ok();
                task.await
            }
        });
        join_all(guarded).await
    }
}
