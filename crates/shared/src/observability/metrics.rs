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

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    // 保存到全局，供其他地方获取指标快照
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册规则引擎指标的描述
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中。
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("rule_set_triggers_total", "Total number of rule set triggers");
    metrics::describe_histogram!(
        "rule_set_trigger_duration_seconds",
        "Rule set trigger duration in seconds"
    );
    metrics::describe_counter!(
        "rule_block_evaluations_total",
        "Total number of rule block evaluations"
    );
    metrics::describe_counter!("rule_actions_total", "Total number of executed actions");

    metrics::describe_counter!("event_dispatches_total", "Total number of dispatched events");
    metrics::describe_histogram!(
        "event_dispatch_duration_seconds",
        "Event dispatch duration in seconds"
    );
    metrics::describe_counter!("rules_reloads_total", "Total number of rules file reloads");
    metrics::describe_gauge!("rules_loaded", "Number of rule sets in the dispatch table");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
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

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录事件分发
#[inline]
pub fn record_dispatch(signal: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "event_dispatches_total",
        "signal" => signal.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "event_dispatch_duration_seconds",
        "signal" => signal.to_string()
    )
    .record(duration_secs);
}

/// 记录规则重新加载
#[inline]
pub fn record_rules_reload(status: &str, rule_sets: usize) {
    metrics::counter!("rules_reloads_total", "status" => status.to_string()).increment(1);
    metrics::gauge!("rules_loaded").set(rule_sets as f64);
}
