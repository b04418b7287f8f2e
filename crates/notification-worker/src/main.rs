//! 通知服务入口

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use casino_shared::{
    cache::Cache,
    config::AppConfig,
    events::NotificationChannel,
    observability,
    pubsub::{RedisPublisher, RedisSubscriber},
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use notification_worker::{
    FcmPushSender, NotificationConsumer, NotificationError, NotificationSender,
    RedisDeviceTokenStore, SenderMap, SmsSender,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load("notification-worker").unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting notification-worker...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. Redis
    let cache = Arc::new(Cache::new(&config.redis)?);
    cache.health_check().await?;
    info!("Redis connection established");

    // 4. 渠道发送器，配置缺失的渠道不注册
    let mut senders: SenderMap = HashMap::new();
    let token_store = Arc::new(RedisDeviceTokenStore::new(cache.clone()));
    match FcmPushSender::new(&config.notification, token_store) {
        Ok(sender) => {
            senders.insert(NotificationChannel::Push, Arc::new(sender) as Arc<dyn NotificationSender>);
        }
        Err(e) => warn!(error = %e, "FCM push disabled"),
    }
    match SmsSender::new(&config.notification) {
        Ok(sender) => {
            senders.insert(NotificationChannel::Sms, Arc::new(sender) as Arc<dyn NotificationSender>);
        }
        Err(e) => warn!(error = %e, "SMS disabled"),
    }
    info!(channels = ?senders.keys().collect::<Vec<_>>(), "Notification senders registered");

    // 5. 消息通道
    let subscriber = RedisSubscriber::connect(&config.redis).await?;
    let dead_letters = Arc::new(RedisPublisher::new(&config.redis)?);
    let consumer = NotificationConsumer::new(
        subscriber,
        config.pubsub.notification_channel.clone(),
        senders,
        dead_letters,
    );

    // 6. 启动消费者，等待关闭信号；消费者提前退出时以错误结束进程
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            match consumer_handle.await {
                Ok(Err(e)) => error!(error = %e, "Notification consumer exited with error"),
                Err(e) => error!(error = %e, "Consumer task panicked"),
                Ok(Ok(())) => {}
            }
            Ok(())
        }
        joined = &mut consumer_handle => consumer_exit_error(joined),
    };

    info!("Service shutdown complete");
    outcome
}

/// 未收到关闭信号时消费者退出
fn consumer_exit_error(
    joined: std::result::Result<std::result::Result<(), NotificationError>, tokio::task::JoinError>,
) -> Result<()> {
    let err = match joined {
        Ok(Ok(())) => anyhow::anyhow!("notification consumer stopped unexpectedly"),
        Ok(Err(e)) => anyhow::Error::new(e).context("notification consumer failed"),
        Err(e) => anyhow::Error::new(e).context("notification consumer panicked"),
    };
    error!(error = %err, "Consumer stopped before shutdown signal, exiting");
    Err(err)
}

/// 监听 Ctrl+C 和 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown..."),
    }
}
