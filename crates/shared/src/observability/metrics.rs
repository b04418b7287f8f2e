//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动独立的 HTTP 服务器，暴露 `/metrics` 与 `/health`。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "casino_events_processed_total",
        "Total number of domain events processed"
    );
    metrics::describe_histogram!(
        "casino_event_processing_duration_seconds",
        "Domain event processing duration in seconds"
    );
    metrics::describe_counter!("bonus_movements_total", "Total number of bonus ledger movements");
    metrics::describe_histogram!("bonus_movement_amount", "Amount moved per bonus ledger entry");
    metrics::describe_counter!(
        "campaign_rule_evaluations_total",
        "Total number of campaign rule set evaluations"
    );
    metrics::describe_counter!("notifications_sent_total", "Total number of notification sends");
    metrics::describe_counter!(
        "wallet_transactions_total",
        "Total number of wallet transactions"
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

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 业务指标记录函数
// ============================================================================

/// 记录事件处理
#[inline]
pub fn record_event_processed(event_type: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "casino_events_processed_total",
        "event_type" => event_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "casino_event_processing_duration_seconds",
        "event_type" => event_type.to_string()
    )
    .record(duration_secs);
}

/// 记录奖金变动
///
/// 金额按 f64 记录，仅用于分布统计
#[inline]
pub fn record_bonus_movement(kind: &str, amount: f64) {
    metrics::counter!("bonus_movements_total", "kind" => kind.to_string()).increment(1);
    metrics::histogram!("bonus_movement_amount", "kind" => kind.to_string()).record(amount);
}

#[inline]
pub fn record_rule_evaluation(purpose: &str, matched: bool) {
    metrics::counter!(
        "campaign_rule_evaluations_total",
        "purpose" => purpose.to_string(),
        "matched" => matched.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_notification_sent(channel: &str, success: bool) {
    metrics::counter!(
        "notifications_sent_total",
        "channel" => channel.to_string(),
        "status" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

#[inline]
pub fn record_wallet_transaction(tx_type: &str, status: &str) {
    metrics::counter!(
        "wallet_transactions_total",
        "tx_type" => tx_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
