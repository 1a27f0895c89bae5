//! 流协调器
//!
//! 单条记录的生命周期：拉取 -> 解码 -> 转换 -> 双写 -> 提交 offset。
//! 解码失败的记录直接提交跳过；双写失败的记录不提交。
//!
//! 双写失败先按退避策略原地重试，仍失败时把分区读取位置回退到失败的 offset，
//! 并暂停一段时间后再拉取。Kafka 的 offset 提交是累积的，所以在失败记录成功之前，
//! 同一分区的后续记录即使被拉到也不会处理和提交，而是再次回退。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdc_shared::config::AppConfig;
use cdc_shared::kafka::{ConsumerMessage, PollOutcome};
use cdc_shared::observability::metrics;
use cdc_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dead_letter::{DeadLetterPublisher, DeadLetterRecord};
use crate::decoder::decode;
use crate::error::{ConsumerError, DecodeError, WriteError};
use crate::source::ChangeLog;
use crate::transformer::transform;
use crate::writer::DualSinkWriter;

/// 协调器运行参数
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub topic: String,
    pub poll_timeout: Duration,
    pub retry: RetryPolicy,
    /// 重试耗尽后暂停拉取的时长
    pub halt_backoff: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let retry = config.consumer.retry.to_policy();
        Self {
            topic: config.kafka.topic.clone(),
            poll_timeout: config.kafka.poll_timeout(),
            halt_backoff: retry.max_delay,
            retry,
        }
    }
}

/// 一次拉取周期的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// 等待超时，没有新记录
    Idle,
    EndOfPartition { partition: i32 },
    TransportError,
    /// 写入两个存储并已提交
    Committed { partition: i32, offset: i64 },
    /// 解码失败，未写入任何存储但已提交
    Skipped {
        partition: i32,
        offset: i64,
        reason: &'static str,
    },
    /// 重试耗尽，未提交，分区已回退到该 offset
    Withheld { partition: i32, offset: i64 },
    /// 分区中有更早的失败记录，本条未处理，分区再次回退
    Deferred { partition: i32, offset: i64 },
    /// 处理完成但提交失败，重启后会重新投递
    CommitFailed { partition: i32, offset: i64 },
}

/// 单个分区分配上的顺序处理循环
///
/// 本地的 `withheld` 记录在分区被重新分配后可能过期，
/// 推迟后续记录前会先对照消费组的已提交位置。
pub struct StreamCoordinator<L> {
    log: L,
    writer: DualSinkWriter,
    dead_letter: Option<Arc<dyn DeadLetterPublisher>>,
    settings: CoordinatorSettings,
    /// 分区 -> 尚未成功的最早 offset
    withheld: HashMap<i32, i64>,
}

impl<L: ChangeLog> StreamCoordinator<L> {
    pub fn new(log: L, writer: DualSinkWriter, settings: CoordinatorSettings) -> Self {
        Self {
            log,
            writer,
            dead_letter: None,
            settings,
            withheld: HashMap::new(),
        }
    }

    pub fn with_dead_letter(mut self, dead_letter: Arc<dyn DeadLetterPublisher>) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    /// 被暂停推进的分区及其失败 offset
    pub fn withheld(&self) -> &HashMap<i32, i64> {
        &self.withheld
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// 订阅并循环处理，直到关闭信号为 true 或发送端被丢弃
    ///
    /// 关闭信号只在拉取和暂停等待时响应，正在进行的双写总会执行完。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        self.log.subscribe(&[self.settings.topic.as_str()])?;
        info!(topic = %self.settings.topic, "变更流协调器已启动");

        loop {
            if *shutdown.borrow() {
                info!("收到关闭信号，协调器退出");
                break;
            }

            let outcome = tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，协调器退出");
                        break;
                    }
                    continue;
                }

                outcome = self.log.poll(self.settings.poll_timeout) => outcome,
            };

            if let Cycle::Withheld { partition, offset } = self.dispatch(outcome).await {
                warn!(
                    partition,
                    offset,
                    backoff_ms = self.settings.halt_backoff.as_millis() as u64,
                    "分区暂停推进，等待后重新投递"
                );

                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("暂停等待期间收到关闭信号，协调器退出");
                            break;
                        }
                    }

                    _ = tokio::time::sleep(self.settings.halt_backoff) => {}
                }
            }
        }

        self.log.close();
        info!("变更流协调器已停止");
        Ok(())
    }

    /// 拉取并处理一条记录，不做暂停等待
    pub async fn poll_once(&mut self) -> Cycle {
        let outcome = self.log.poll(self.settings.poll_timeout).await;
        self.dispatch(outcome).await
    }

    /// 处理一次拉取结果
    pub async fn dispatch(&mut self, outcome: PollOutcome) -> Cycle {
        match outcome {
            PollOutcome::Empty => Cycle::Idle,
            PollOutcome::PartitionEof { partition } => {
                info!(partition, "已读到分区末尾");
                Cycle::EndOfPartition { partition }
            }
            PollOutcome::TransportError(e) => {
                metrics::record_poll_error();
                error!(error = %e, "拉取变更日志失败");
                Cycle::TransportError
            }
            PollOutcome::Entry(msg) => self.handle_entry(msg).await,
        }
    }

    async fn handle_entry(&mut self, msg: ConsumerMessage) -> Cycle {
        metrics::record_message_received(msg.partition);
        debug!(
            partition = msg.partition,
            offset = msg.offset,
            "收到变更记录"
        );

        if let Some(&failed) = self.withheld.get(&msg.partition)
            && msg.offset > failed
        {
            if !self.superseded(&msg.topic, msg.partition, failed) {
                return self.defer(&msg, failed);
            }
            self.withheld.remove(&msg.partition);
        }

        let event = match decode(&msg.payload) {
            Ok(event) => event,
            Err(e) => return self.skip(&msg, e).await,
        };

        let record = transform(event);
        let started = Instant::now();
        let writer = &self.writer;
        let result = retry_with_policy(&self.settings.retry, "persist", WriteError::is_retryable, || {
            let record = &record;
            async move {
                let result = writer.persist(record).await;
                if let Err(e) = &result {
                    metrics::record_write_failure(e.step());
                }
                result
            }
        })
        .await;

        match result {
            Ok(()) => {
                metrics::record_message_processed(msg.partition, started.elapsed().as_secs_f64());
                debug!(
                    order_id = %record.order_id,
                    partition = msg.partition,
                    offset = msg.offset,
                    "订单结果已写入"
                );
                self.commit(&msg, Cycle::Committed {
                    partition: msg.partition,
                    offset: msg.offset,
                })
            }
            Err(e) => self.withhold(&msg, &record.order_id, e),
        }
    }

    async fn skip(&mut self, msg: &ConsumerMessage, err: DecodeError) -> Cycle {
        match &err {
            DecodeError::Ignored { reason } => {
                debug!(partition = msg.partition, offset = msg.offset, reason, "忽略变更记录");
            }
            _ => {
                warn!(
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %err,
                    "变更记录无法解码，跳过"
                );
            }
        }

        if err.is_malformed()
            && let Some(dead_letter) = &self.dead_letter
        {
            let record = DeadLetterRecord::from_message(msg, err.to_string());
            if let Err(e) = dead_letter.publish(&record).await {
                error!(
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %e,
                    "转发死信失败"
                );
            }
        }

        metrics::record_message_skipped(err.reason());
        self.commit(msg, Cycle::Skipped {
            partition: msg.partition,
            offset: msg.offset,
            reason: err.reason(),
        })
    }

    fn withhold(&mut self, msg: &ConsumerMessage, order_id: &str, err: WriteError) -> Cycle {
        error!(
            order_id,
            partition = msg.partition,
            offset = msg.offset,
            step = err.step(),
            partial = err.is_partial(),
            error = %err,
            "双写失败，不提交 offset"
        );

        self.withheld
            .entry(msg.partition)
            .and_modify(|failed| *failed = (*failed).min(msg.offset))
            .or_insert(msg.offset);
        self.rewind(msg.partition, msg.offset);

        Cycle::Withheld {
            partition: msg.partition,
            offset: msg.offset,
        }
    }

    fn defer(&mut self, msg: &ConsumerMessage, failed: i64) -> Cycle {
        debug!(
            partition = msg.partition,
            offset = msg.offset,
            failed_offset = failed,
            "分区存在未成功的记录，回退后重新投递"
        );
        self.rewind(msg.partition, failed);

        Cycle::Deferred {
            partition: msg.partition,
            offset: msg.offset,
        }
    }

    /// 分区曾被分配给组内其他消费者，并已越过本地记录的失败 offset
    fn superseded(&self, topic: &str, partition: i32, failed: i64) -> bool {
        match self.log.committed(topic, partition) {
            Ok(Some(position)) if position > failed => {
                info!(
                    partition,
                    failed_offset = failed,
                    committed = position,
                    "失败记录已由组内其他消费者处理，分区恢复推进"
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(partition, error = %e, "查询已提交位置失败，保持分区暂停");
                false
            }
        }
    }

    fn rewind(&self, partition: i32, offset: i64) {
        metrics::record_partition_rewind(partition);
        if let Err(e) = self.log.rewind(&self.settings.topic, partition, offset) {
            // 回退失败时，后续记录仍会因 withheld 被拒绝处理
            error!(partition, offset, error = %e, "回退分区读取位置失败");
        }
    }

    fn commit(&mut self, msg: &ConsumerMessage, done: Cycle) -> Cycle {
        if let Err(e) = self.log.commit(&msg.topic, msg.partition, msg.offset) {
            error!(
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "提交 offset 失败，重启后该记录会被重新投递"
            );
            return Cycle::CommitFailed {
                partition: msg.partition,
                offset: msg.offset,
            };
        }

        if let Some(&failed) = self.withheld.get(&msg.partition)
            && msg.offset >= failed
        {
            info!(partition = msg.partition, offset = msg.offset, "分区恢复推进");
            self.withheld.remove(&msg.partition);
        }

        done
    }
}
