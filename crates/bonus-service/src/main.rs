//! 奖金活动引擎服务入口

use std::sync::Arc;

use anyhow::Result;
use casino_shared::{
    cache::Cache, config::AppConfig, database::Database, error::CasinoError, observability, pubsub::RedisPublisher,
    pubsub::RedisSubscriber, retry::RetryPolicy,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use bonus_service::{
    BonusEventConsumer, BonusEventProcessor, BonusReleaseService, BonusService, CampaignService,
    MessageHandler, ProcessorRegistry, RedisEventPublisher,
    repository::{
        BonusLedgerRepository, CampaignRepository, RedisProcessedEventStore, RedisUsageStore,
        WalletRepository,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load("bonus-service").unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting bonus-service...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 数据库与迁移
    let db = Database::connect(&config.database).await?;
    db.run_migrations(&sqlx::migrate!("./migrations")).await?;
    let pool = db.pool().clone();
    info!("Database connection established, migrations applied");

    // 4. Redis
    let cache = Arc::new(Cache::new(&config.redis)?);
    cache.health_check().await?;
    info!("Redis connection established");

    // 5. 仓储
    let campaign_repo = Arc::new(CampaignRepository::new(pool.clone()));
    let wallet_repo = Arc::new(WalletRepository::new(pool.clone()));
    let ledger_repo = Arc::new(BonusLedgerRepository::new(pool.clone()));
    let usage_store = Arc::new(RedisUsageStore::new(
        cache.clone(),
        config.engine.usage_ttl_days,
    ));
    let processed_store = Arc::new(RedisProcessedEventStore::new(
        cache.clone(),
        config.engine.processed_event_ttl_hours,
    ));
    info!("Repositories initialized");

    // 6. 服务与处理器链
    let campaign_service = Arc::new(CampaignService::new(
        campaign_repo,
        usage_store,
        config.engine.campaign_cache_ttl_seconds,
    ));
    let loaded = campaign_service.refresh().await?;
    info!(campaigns = loaded, "Campaign cache warmed up");

    let bonus_service = Arc::new(BonusService::new(ledger_repo.clone()));
    let release_service = Arc::new(BonusReleaseService::new(ledger_repo));
    let registry = ProcessorRegistry::standard(
        campaign_service.clone(),
        bonus_service,
        release_service,
    );
    info!(processors = ?registry.names(), "Rule processors registered");

    let processor = Arc::new(BonusEventProcessor::new(
        campaign_service.clone(),
        wallet_repo,
        processed_store,
        registry,
    ));

    // 7. 消息通道
    let publisher = Arc::new(RedisEventPublisher::new(
        RedisPublisher::new(&config.redis)?,
        config.pubsub.clone(),
    ));
    let subscriber = RedisSubscriber::connect(&config.redis).await?;
    let handler = MessageHandler::new(
        processor,
        campaign_service,
        publisher,
        RetryPolicy::with_max_retries(config.engine.max_retries),
        config.pubsub.clone(),
    );
    let consumer = BonusEventConsumer::new(subscriber, handler);

    // 8. 启动消费者，等待关闭信号；消费者提前退出时以错误结束进程，交给编排系统重启
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            match consumer_handle.await {
                Ok(Err(e)) => error!(error = %e, "Bonus event consumer exited with error"),
                Err(e) => error!(error = %e, "Consumer task panicked"),
                Ok(Ok(())) => {}
            }
            Ok(())
        }
        joined = &mut consumer_handle => consumer_exit_error(joined),
    };

    db.close().await;
    info!("Service shutdown complete");
    outcome
}

/// 未收到关闭信号时消费者退出
fn consumer_exit_error(
    joined: std::result::Result<std::result::Result<(), CasinoError>, tokio::task::JoinError>,
) -> Result<()> {
    let err = match joined {
        Ok(Ok(())) => anyhow::anyhow!("bonus event consumer stopped unexpectedly"),
        Ok(Err(e)) => anyhow::Error::new(e).context("bonus event consumer failed"),
        Err(e) => anyhow::Error::new(e).context("bonus event consumer panicked"),
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
