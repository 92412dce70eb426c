//! 可观测性入口
//!
//! 服务启动时调用一次 [`init`]：先装好日志与 OTLP 导出，再按配置开启指标端口。
//! 返回的守卫需要活到进程退出。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// 日志、追踪和指标的开关与端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 写入 OTel resource 和 `service_starts_total` 标签的服务名
    pub service_name: String,

    /// OTLP gRPC 地址；不配置则只输出本地日志
    pub otlp_endpoint: Option<String>,

    pub metrics_port: u16,

    /// 关闭后不安装 Prometheus recorder，记录指标变成空操作
    pub metrics_enabled: bool,

    /// `RUST_LOG` 未设置时使用的过滤指令
    pub log_level: String,

    pub json_logs: bool,
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            otlp_endpoint: None,
            metrics_port: default_metrics_port(),
            metrics_enabled: true,
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// 服务名由二进制入口决定，配置文件里不写
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

/// 持有指标服务任务和 tracer provider
///
/// drop 时 tracer provider 会把缓冲的 span 推送出去。
pub struct ObservabilityGuard {
    _metrics_handle: Option<metrics::MetricsHandle>,
    _tracing_guard: tracing::TracingGuard,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 装配日志、追踪与指标
///
/// 日志必须先就绪，指标端口绑定失败时才能看到错误输出。
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    info!(
        service = %config.service_name,
        metrics_port = %config.metrics_port,
        otlp_endpoint = ?config.otlp_endpoint,
        "Observability initialized"
    );

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        None
    };

    Ok(ObservabilityGuard {
        _metrics_handle: metrics_handle,
        _tracing_guard: tracing_guard,
    })
}
