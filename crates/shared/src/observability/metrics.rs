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

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    // 保存到全局，供其他地方获取指标快照
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_pipeline_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册管道指标的描述，出现在 /metrics 的 HELP 注释中
fn register_pipeline_metrics(service_name: &str) {
    metrics::describe_counter!(
        "cdc_messages_received_total",
        "Total number of change-log entries received"
    );
    metrics::describe_counter!(
        "cdc_messages_processed_total",
        "Total number of entries persisted to both sinks and committed"
    );
    metrics::describe_counter!(
        "cdc_messages_skipped_total",
        "Total number of entries skipped and committed without writes"
    );
    metrics::describe_counter!(
        "cdc_write_failures_total",
        "Total number of persist attempts that failed, by sink step"
    );
    metrics::describe_counter!(
        "cdc_poll_errors_total",
        "Total number of transport errors returned by poll"
    );
    metrics::describe_counter!(
        "cdc_partition_rewinds_total",
        "Total number of partition rewinds after an unrecoverable write failure"
    );
    metrics::describe_histogram!(
        "cdc_persist_duration_seconds",
        "Dual-sink persist duration in seconds"
    );

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

#[inline]
pub fn record_message_received(partition: i32) {
    metrics::counter!(
        "cdc_messages_received_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_message_processed(partition: i32, duration_secs: f64) {
    metrics::counter!(
        "cdc_messages_processed_total",
        "partition" => partition.to_string()
    )
    .increment(1);

    metrics::histogram!("cdc_persist_duration_seconds").record(duration_secs);
}

/// 记录跳过的消息，reason 取值如 malformed / missing_order_id / ignored
#[inline]
pub fn record_message_skipped(reason: &'static str) {
    metrics::counter!("cdc_messages_skipped_total", "reason" => reason).increment(1);
}

/// 记录写入失败，step 取值如 relational / cache_point / cache_recent
#[inline]
pub fn record_write_failure(step: &'static str) {
    metrics::counter!("cdc_write_failures_total", "step" => step).increment(1);
}

#[inline]
pub fn record_poll_error() {
    metrics::counter!("cdc_poll_errors_total").increment(1);
}

#[inline]
pub fn record_partition_rewind(partition: i32) {
    metrics::counter!(
        "cdc_partition_rewinds_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_message_received(0);
        record_message_processed(0, 0.01);
        record_message_skipped("malformed");
        record_write_failure("cache_point");
        record_poll_error();
        record_partition_rewind(3);
    }
}
