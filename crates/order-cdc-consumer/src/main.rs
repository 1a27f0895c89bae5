//! 订单 CDC 物化服务
//!
//! 消费订单表变更，写入结果表与 Redis 缓存。

use std::sync::Arc;

use anyhow::{Context, Result};
use cdc_shared::{
    cache::Cache,
    config::AppConfig,
    database::Database,
    kafka::{KafkaConsumer, KafkaProducer},
    observability,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use order_cdc_consumer::{
    coordinator::{CoordinatorSettings, StreamCoordinator},
    dead_letter::{DeadLetterPublisher, KafkaDeadLetter},
    error::ConsumerError,
    sink::PgResultStore,
    upsert::UpsertPolicy,
    writer::DualSinkWriter,
};

const SERVICE_NAME: &str = "order-cdc-consumer";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载并校验配置
    let config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;
    config.validate()?;

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        workers = config.consumer.workers,
        "Starting order-cdc-consumer..."
    );

    // 3. 等待上游 Kafka / 连接器就绪
    let delay = config.startup_delay();
    if !delay.is_zero() {
        info!(delay_secs = delay.as_secs(), "等待依赖服务就绪");
        tokio::time::sleep(delay).await;
    }

    // 4. 初始化数据库
    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }
    info!("Database connection established");

    // 5. 初始化 Redis，不可达时照常启动，写入失败会暂停提交直到恢复
    let cache = Cache::new(&config.redis)?;
    match cache.health_check().await {
        Ok(()) => info!("Redis connection established"),
        Err(e) => warn!(error = %e, "Redis 暂不可达，缓存写入将在恢复前失败"),
    }

    // 6. 组装写入器
    let relational = Arc::new(PgResultStore::new(
        db.pool().clone(),
        &UpsertPolicy::first_write_wins(),
    ));
    let writer = DualSinkWriter::new(relational, Arc::new(cache))
        .with_recent_capacity(config.consumer.recent_list_capacity);

    let dead_letter: Option<Arc<dyn DeadLetterPublisher>> = match &config.kafka.dead_letter_topic {
        Some(topic) if !topic.trim().is_empty() => {
            let producer = KafkaProducer::new(&config.kafka)?;
            Some(Arc::new(KafkaDeadLetter::new(producer, topic.clone())))
        }
        _ => None,
    };

    // 7. 启动 worker，同一消费组内由 broker 分配互不重叠的分区
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let settings = CoordinatorSettings::from_config(&config);
    info!(
        max_retries = settings.retry.max_retries,
        worst_case_backoff_ms = settings.retry.worst_case_backoff().as_millis() as u64,
        halt_backoff_ms = settings.halt_backoff.as_millis() as u64,
        "写入重试策略"
    );

    let mut workers = Vec::with_capacity(config.consumer.workers);
    for index in 0..config.consumer.workers {
        let suffix = index.to_string();
        let consumer = KafkaConsumer::new(&config.kafka, Some(&suffix))?;

        let mut coordinator = StreamCoordinator::new(consumer, writer.clone(), settings.clone());
        if let Some(dead_letter) = &dead_letter {
            coordinator = coordinator.with_dead_letter(dead_letter.clone());
        }

        workers.push(tokio::spawn(coordinator.run(shutdown_rx.clone())));
    }
    drop(shutdown_rx);

    info!(group_id = %config.kafka.consumer_group, "Consumers running");

    // 8. 等待关闭信号后通知所有 worker
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    let mut failed = false;
    for result in futures::future::join_all(workers).await {
        let outcome = result
            .map_err(|e| ConsumerError::WorkerFailed(e.to_string()))
            .and_then(|r| r);
        if let Err(e) = outcome {
            error!(error = %e, "消费 worker 异常退出");
            failed = true;
        }
    }

    db.close().await;
    info!("Service shutdown complete");

    if failed {
        anyhow::bail!("存在异常退出的消费 worker");
    }
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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
