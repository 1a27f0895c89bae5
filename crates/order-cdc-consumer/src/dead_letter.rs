//! 死信转发
//!
//! 无法解析的原始变更记录在提交前转发到死信 topic，保留来源位置与失败原因，
//! 便于排查上游数据问题。转发失败只记录日志，不阻塞 offset 提交。

use async_trait::async_trait;
use cdc_shared::error::{CdcError, Result};
use cdc_shared::kafka::{ConsumerMessage, KafkaProducer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// 死信消息信封
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    /// 原消息的时间戳（毫秒）
    pub source_timestamp: Option<i64>,
    /// 原始负载，非 UTF-8 字节按替换字符保存
    pub payload: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn from_message(msg: &ConsumerMessage, error: impl Into<String>) -> Self {
        Self {
            source_topic: msg.topic.clone(),
            partition: msg.partition,
            offset: msg.offset,
            key: msg.key.clone(),
            source_timestamp: msg.timestamp,
            payload: String::from_utf8_lossy(&msg.payload).into_owned(),
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<()>;
}

/// 发送到 Kafka 死信 topic，key 沿用原消息的 key
pub struct KafkaDeadLetter {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaDeadLetter {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        info!(topic = %topic, "死信转发已启用");
        Self { producer, topic }
    }
}

#[async_trait]
impl DeadLetterPublisher for KafkaDeadLetter {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<()> {
        let body =
            serde_json::to_vec(record).map_err(|e| CdcError::Serialization(e.to_string()))?;
        self.producer
            .send(&self.topic, record.key.as_deref(), &body)
            .await?;
        Ok(())
    }
}
