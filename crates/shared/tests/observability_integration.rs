//! 可观测性模块集成测试
//!
//! 测试指标记录、追踪上下文提取以及配置的核心功能。

use std::collections::HashMap;

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use souk_shared::observability::metrics::{
        record_dispatch_duration, record_document_event, record_exclusion, record_notification,
    };

    #[test]
    fn test_record_document_event() {
        // 未安装 recorder 时记录指标为空操作，不应 panic
        record_document_event("message");
        record_document_event("new_product");
        record_document_event("promotion");
    }

    #[test]
    fn test_record_dispatch_duration() {
        record_dispatch_duration("message", 0.012);
        record_dispatch_duration("promotion", 1.5);
        record_dispatch_duration("new_product", 0.0);
    }

    #[test]
    fn test_record_delivery_outcomes() {
        record_notification("message", "delivered");
        record_notification("promotion", "failed");
        record_exclusion("new_product", "quiet_hours");
        record_exclusion("promotion", "category_disabled");
        record_exclusion("message", "missing_token");
    }
}

// ============================================================================
// 追踪上下文测试
// ============================================================================

mod tracing_tests {
    use super::*;
    use opentelemetry::trace::TraceContextExt;
    use souk_shared::observability::tracing::{extract_from_headers, set_parent_from_headers};

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_extract_from_valid_traceparent() {
        let headers = HashMap::from([("traceparent".to_string(), TRACEPARENT.to_string())]);
        let context = extract_from_headers(&headers);
        let span = context.span();
        let span_context = span.span_context();

        assert!(span_context.is_valid());
        assert!(span_context.is_remote());
        assert_eq!(
            span_context.trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(span_context.span_id().to_string(), "00f067aa0ba902b7");
    }

    #[test]
    fn test_extract_from_malformed_traceparent() {
        for value in ["", "garbage", "00-xyz-00f067aa0ba902b7-01"] {
            let headers = HashMap::from([("traceparent".to_string(), value.to_string())]);
            let context = extract_from_headers(&headers);
            assert!(!context.span().span_context().is_valid());
        }
    }

    #[test]
    fn test_extract_ignores_unrelated_headers() {
        let headers = HashMap::from([
            ("content-type".to_string(), "application/json".to_string()),
            ("x-source".to_string(), "souk-app".to_string()),
        ]);
        assert!(!extract_from_headers(&headers).has_active_span());
    }

    #[test]
    fn test_set_parent_from_headers() {
        let headers = HashMap::from([("traceparent".to_string(), TRACEPARENT.to_string())]);
        let span = tracing::info_span!("document_change", offset = 42);
        set_parent_from_headers(&span, &headers);
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use souk_shared::observability::ObservabilityConfig;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert!(config.metrics_enabled);
        assert_eq!(config.log_level, "info");
        assert!(config.otlp_endpoint.is_none());
        assert!(!config.json_logs);
    }

    #[test]
    fn test_with_service_name() {
        let config = ObservabilityConfig::default().with_service_name("notification-dispatcher");
        assert_eq!(config.service_name, "notification-dispatcher");
    }

    #[test]
    fn test_app_config_carries_observability_section() {
        let config = souk_shared::config::AppConfig::default();
        assert!(config.observability.metrics_enabled);
        assert!(config.observability.otlp_endpoint.is_none());
    }
}
