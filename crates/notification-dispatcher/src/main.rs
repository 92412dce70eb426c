//! 通知分发服务
//!
//! 消费文档变更事件并向用户设备发送推送通知。

use std::sync::Arc;

use anyhow::Result;
use souk_shared::{config::AppConfig, observability};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use notification_dispatcher::{
    clock::{Clock, SystemClock},
    consumer::DocumentChangeConsumer,
    gateway::{FcmGateway, LogOnlyGateway, PushGateway},
    router::Dispatcher,
    store::{DocumentStore, PgDocumentStore, TimeoutStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // 1. 加载配置
    let config = AppConfig::load("notification-dispatcher").unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 初始化可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name("notification-dispatcher");
    let _guard = observability::init(&obs_config).await?;

    info!("Starting notification-dispatcher...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 文档存储
    let pg = PgDocumentStore::connect(&config.database).await?;
    pg.health_check().await?;
    let store: Arc<dyn DocumentStore> = Arc::new(TimeoutStore::new(
        pg.clone(),
        config.dispatch.store_timeout(),
    ));
    info!("Document store connected");

    // 4. 推送网关
    let gateway: Arc<dyn PushGateway> = match config.push.provider.as_str() {
        "fcm" => Arc::new(FcmGateway::new(&config.push)?),
        "log" => Arc::new(LogOnlyGateway),
        other => {
            warn!(provider = other, "Unknown push provider, falling back to log gateway");
            Arc::new(LogOnlyGateway)
        }
    };
    info!(gateway = gateway.name(), "Push gateway initialized");
    if config.is_production() && gateway.name() == LogOnlyGateway.name() {
        warn!("Production environment is using the log-only push gateway; no notifications will reach devices");
    }

    // 5. 时钟
    let clock: Arc<dyn Clock> = match config.dispatch.utc_offset_minutes {
        Some(minutes) => match SystemClock::with_utc_offset_minutes(minutes) {
            Some(clock) => Arc::new(clock),
            None => {
                warn!(minutes, "Invalid UTC offset, using host local time");
                Arc::new(SystemClock::local())
            }
        },
        None => Arc::new(SystemClock::local()),
    };

    // 6. 分发器与消费者
    let dispatcher = Arc::new(Dispatcher::new(store, gateway, clock, &config.dispatch));
    let consumer = DocumentChangeConsumer::new(&config, dispatcher)?;
    info!(
        max_concurrency = config.dispatch.max_concurrency,
        send_timeout_ms = config.dispatch.send_timeout_ms,
        "Dispatcher initialized"
    );

    // 7. 运行消费循环；收到关闭信号后等待当前事件处理完成
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = consumer.run(shutdown_rx);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => {
            warn!("Consumer loop ended before shutdown signal");
            result
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            run.await
        }
    };
    if let Err(e) = result {
        warn!(error = %e, "Consumer exited with error");
    }

    pg.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
