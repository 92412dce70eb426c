//! 分发指标
//!
//! 业务代码只调用下面的 `record_*` 函数；recorder 未安装时这些调用什么也不做，
//! 单元测试因此无需初始化指标。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 指标 HTTP 服务的后台任务
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 安装全局 recorder 并在 `metrics_port` 上提供 `/metrics` 与 `/health`
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_dispatch_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn describe_dispatch_metrics(service_name: &str) {
    metrics::describe_counter!(
        "document_events_total",
        "Total number of document change events routed to a handler"
    );
    metrics::describe_histogram!(
        "dispatch_duration_seconds",
        "Time spent handling one document change event"
    );
    metrics::describe_counter!(
        "notifications_total",
        "Total number of push delivery attempts by outcome"
    );
    metrics::describe_counter!(
        "recipients_excluded_total",
        "Total number of candidate recipients excluded before delivery"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 记录一次被路由到处理器的文档变更
#[inline]
pub fn record_document_event(handler: &str) {
    metrics::counter!("document_events_total", "handler" => handler.to_string()).increment(1);
}

/// 记录单个事件的处理耗时
#[inline]
pub fn record_dispatch_duration(handler: &str, duration_secs: f64) {
    metrics::histogram!("dispatch_duration_seconds", "handler" => handler.to_string())
        .record(duration_secs);
}

/// 记录推送投递结果（status: delivered / failed）
#[inline]
pub fn record_notification(kind: &str, status: &str) {
    metrics::counter!(
        "notifications_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录收件人被过滤的原因
#[inline]
pub fn record_exclusion(kind: &str, reason: &str) {
    metrics::counter!(
        "recipients_excluded_total",
        "kind" => kind.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未安装 recorder
        record_document_event("promotion");
        record_dispatch_duration("promotion", 0.02);
        record_notification("promotion", "delivered");
        record_exclusion("promotion", "quiet_hours");
    }
}
