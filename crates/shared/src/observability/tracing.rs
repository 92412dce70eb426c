//! 日志与分布式追踪
//!
//! 本地日志始终开启；配置了 OTLP 端点时再叠加一层 OpenTelemetry 导出。
//! 上游写入文档变更时附带的 `traceparent` header 在这里还原成父 span。

use std::collections::HashMap;

use anyhow::Result;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// 进程退出前把缓冲中的 span 推送到收集端
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            // subscriber 此时可能已不可用
            eprintln!("Error shutting down tracer provider: {:?}", e);
        }
    }
}

/// `RUST_LOG` 优先，其次是配置里的 `log_level`，两者都无效时退回 info
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer(json: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    if json {
        // 采集端按行解析，span 结束事件带上耗时
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    }
}

pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    let provider = config
        .otlp_endpoint
        .as_deref()
        .map(|endpoint| init_tracer_provider(&config.service_name, endpoint))
        .transpose()?;
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(fmt_layer(config.json_logs))
        .with(otel_layer)
        .with(env_filter(&config.log_level))
        .try_init()?;

    Ok(TracingGuard { provider })
}

fn init_tracer_provider(service_name: &str, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

struct HeaderExtractor<'a>(&'a HashMap<String, String>);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// 按 W3C Trace Context 解析消息 header；无效或缺失时返回空上下文
pub fn extract_from_headers(headers: &HashMap<String, String>) -> opentelemetry::Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}

/// 让 `span` 挂到上游链路下；未安装 OTel 层时无效果
pub fn set_parent_from_headers(span: &tracing::Span, headers: &HashMap<String, String>) {
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let _ = span.set_parent(extract_from_headers(headers));
}
