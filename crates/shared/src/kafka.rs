//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息所有权转换、错误映射和手动提交语义。
//!
//! 消费者关闭了自动提交：offset 只在调用方显式 `commit` 后才推进，
//! 这是"先落库再提交"顺序保证的基础。

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::CdcError;

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// 消息时间戳（毫秒），broker 未提供时为空
    pub timestamp: Option<i64>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        // 墓碑消息（删除后的压缩标记）没有负载，统一表示为空字节
        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
        }
    }
}

// ---------------------------------------------------------------------------
// PollOutcome
// ---------------------------------------------------------------------------

/// 单次拉取的结果
///
/// 将 rdkafka 的错误码归类为消费循环关心的几种情况：
/// 分区读到末尾只是提示信息，其他传输错误由循环记录后继续。
#[derive(Debug)]
pub enum PollOutcome {
    Entry(ConsumerMessage),
    /// 等待超时，没有新消息
    Empty,
    PartitionEof { partition: i32 },
    TransportError(String),
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer`，内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
/// 本服务只用它把无法解析的原始消息转发到死信 topic。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `message.timeout.ms` 设为 5 秒，超时后由调用方决定如何处理。
    pub fn new(config: &KafkaConfig) -> Result<Self, CdcError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| CdcError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息，key 可为空
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(i32, i64), CdcError> {
        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| CdcError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 手动提交 offset 的 Kafka 消费者
///
/// 首次启动（消费组没有已提交 offset）时按 `auto_offset_reset` 从最早位置开始，
/// 之后总是从最后一次提交的位置恢复。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `client_suffix` 只影响 client.id，同一进程内的多个 worker 共用消费组，
    /// 由 broker 为它们分配互不重叠的分区。
    pub fn new(config: &KafkaConfig, client_suffix: Option<&str>) -> Result<Self, CdcError> {
        let client_id = match client_suffix {
            Some(suffix) => format!("{}-{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("client.id", &client_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "true")
            .create()
            .map_err(|e| CdcError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            client_id,
            "Kafka 消费者已初始化"
        );
        Ok(Self {
            consumer,
            group_id: config.consumer_group.clone(),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), CdcError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| CdcError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 在给定时间内拉取一条消息
    pub async fn poll(&self, timeout: Duration) -> PollOutcome {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => PollOutcome::Empty,
            Ok(Ok(msg)) => PollOutcome::Entry(ConsumerMessage::from_borrowed(&msg)),
            Ok(Err(KafkaError::PartitionEOF(partition))) => PollOutcome::PartitionEof { partition },
            Ok(Err(e)) => PollOutcome::TransportError(e.to_string()),
        }
    }

    /// 同步提交：记录该消息之后的位置（offset + 1）
    pub fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), CdcError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| CdcError::Kafka(format!("构造提交列表失败: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| CdcError::Kafka(format!("提交 offset 失败: {e}")))?;

        debug!(topic, partition, offset, "offset 已提交");
        Ok(())
    }

    /// 查询消费组在该分区上已提交的位置（下一条待处理的 offset）
    ///
    /// 分区从未提交过时返回 `None`。
    pub fn committed_position(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, CdcError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);

        let committed = self
            .consumer
            .committed_offsets(tpl, Duration::from_secs(5))
            .map_err(|e| CdcError::Kafka(format!("查询已提交 offset 失败: {e}")))?;

        Ok(committed
            .find_partition(topic, partition)
            .and_then(|elem| match elem.offset() {
                Offset::Offset(offset) => Some(offset),
                _ => None,
            }))
    }

    /// 将分区的读取位置移回指定 offset，下一次拉取会重新投递该消息
    pub fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<(), CdcError> {
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), Duration::from_secs(5))
            .map_err(|e| CdcError::Kafka(format!("重置分区位置失败: {e}")))?;

        warn!(topic, partition, offset, "分区读取位置已回退");
        Ok(())
    }

    /// 退出消费组，触发分区再均衡
    pub fn close(&self) {
        self.consumer.unsubscribe();
        info!(group_id = %self.group_id, "Kafka 消费者已退出订阅");
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
