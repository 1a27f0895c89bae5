//! 变更日志来源
//!
//! 协调器只通过 `ChangeLog` 读取与提交，生产环境由 Kafka 消费者实现，
//! 测试使用 `ScriptedChangeLog` 按脚本回放分区内容。

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdc_shared::error::Result;
use cdc_shared::kafka::{ConsumerMessage, KafkaConsumer, PollOutcome};
use parking_lot::Mutex;

/// 可提交、可回退的分区日志
#[async_trait]
pub trait ChangeLog: Send + Sync {
    fn subscribe(&self, topics: &[&str]) -> Result<()>;

    /// 在给定时间内拉取下一条记录
    async fn poll(&self, timeout: Duration) -> PollOutcome;

    /// 提交该 offset 已处理完成，恢复时从下一条开始
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    /// 消费组在该分区上已提交的位置，即下一条待处理的 offset
    fn committed(&self, topic: &str, partition: i32) -> Result<Option<i64>>;

    /// 将分区读取位置移回 offset，下一次拉取重新投递该条记录
    fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    fn close(&self);
}

#[async_trait]
impl ChangeLog for KafkaConsumer {
    fn subscribe(&self, topics: &[&str]) -> Result<()> {
        KafkaConsumer::subscribe(self, topics)
    }

    async fn poll(&self, timeout: Duration) -> PollOutcome {
        KafkaConsumer::poll(self, timeout).await
    }

    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        KafkaConsumer::commit(self, topic, partition, offset)
    }

    fn committed(&self, topic: &str, partition: i32) -> Result<Option<i64>> {
        self.committed_position(topic, partition)
    }

    fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        self.seek(topic, partition, offset)
    }

    fn close(&self) {
        KafkaConsumer::close(self)
    }
}

// ---------------------------------------------------------------------------
// ScriptedChangeLog
// ---------------------------------------------------------------------------

struct ScriptedEntry {
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct ScriptState {
    partitions: BTreeMap<i32, Vec<ScriptedEntry>>,
    /// 下一条要投递的 offset
    positions: HashMap<i32, i64>,
    /// 已提交的位置（下一条待处理的 offset）
    committed: HashMap<i32, i64>,
    commit_history: Vec<(i32, i64)>,
    eof_reported: HashSet<i32>,
    transport_errors: VecDeque<String>,
    /// 轮询起点，使各分区交替投递
    next_partition: usize,
    subscribed: Vec<String>,
    closed: bool,
}

impl ScriptState {
    fn next_outcome(&mut self, topic: &str) -> Option<PollOutcome> {
        if let Some(error) = self.transport_errors.pop_front() {
            return Some(PollOutcome::TransportError(error));
        }

        let ids: Vec<i32> = self.partitions.keys().copied().collect();
        if ids.is_empty() {
            return None;
        }

        for step in 0..ids.len() {
            let partition = ids[(self.next_partition + step) % ids.len()];
            let position = self.positions.get(&partition).copied().unwrap_or(0);
            let entries = &self.partitions[&partition];

            if let Some(entry) = usize::try_from(position).ok().and_then(|i| entries.get(i)) {
                let message = ConsumerMessage {
                    topic: topic.to_string(),
                    partition,
                    offset: position,
                    key: entry.key.clone(),
                    payload: entry.payload.clone(),
                    timestamp: None,
                };
                self.positions.insert(partition, position + 1);
                self.next_partition = (self.next_partition + step + 1) % ids.len();
                return Some(PollOutcome::Entry(message));
            }

            if self.eof_reported.insert(partition) {
                self.next_partition = (self.next_partition + step + 1) % ids.len();
                return Some(PollOutcome::PartitionEof { partition });
            }
        }

        None
    }
}

/// 按脚本回放的内存变更日志
///
/// 克隆出的句柄共享同一份状态，测试在协调器运行期间也能追加记录、
/// 注入传输错误或检查提交位置。`restart` 把读取位置重置为已提交位置，
/// 模拟进程崩溃后由消费组恢复。
#[derive(Clone)]
pub struct ScriptedChangeLog {
    topic: String,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedChangeLog {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    /// 向分区追加一条记录，返回其 offset
    pub fn append(&self, partition: i32, key: Option<&str>, payload: impl Into<Vec<u8>>) -> i64 {
        let mut state = self.state.lock();
        let entries = state.partitions.entry(partition).or_default();
        entries.push(ScriptedEntry {
            key: key.map(String::from),
            payload: payload.into(),
        });
        let offset = entries.len() as i64 - 1;
        state.eof_reported.remove(&partition);
        offset
    }

    /// 下一次拉取返回一条传输错误
    pub fn inject_transport_error(&self, error: impl Into<String>) {
        self.state.lock().transport_errors.push_back(error.into());
    }

    /// 丢弃未提交的读取进度
    pub fn restart(&self) {
        let mut state = self.state.lock();
        state.positions = state.committed.clone();
        state.eof_reported.clear();
        state.closed = false;
    }

    pub fn committed_offset(&self, partition: i32) -> Option<i64> {
        self.state.lock().committed.get(&partition).copied()
    }

    pub fn commit_history(&self) -> Vec<(i32, i64)> {
        self.state.lock().commit_history.clone()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.state.lock().subscribed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl ChangeLog for ScriptedChangeLog {
    fn subscribe(&self, topics: &[&str]) -> Result<()> {
        let mut state = self.state.lock();
        state.subscribed = topics.iter().map(|t| t.to_string()).collect();
        state.closed = false;
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> PollOutcome {
        let outcome = self.state.lock().next_outcome(&self.topic);
        match outcome {
            Some(outcome) => outcome,
            None => {
                tokio::time::sleep(timeout).await;
                PollOutcome::Empty
            }
        }
    }

    fn commit(&self, _topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut state = self.state.lock();
        state.committed.insert(partition, offset + 1);
        state.commit_history.push((partition, offset));
        Ok(())
    }

    fn committed(&self, _topic: &str, partition: i32) -> Result<Option<i64>> {
        Ok(self.committed_offset(partition))
    }

    fn rewind(&self, _topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut state = self.state.lock();
        state.positions.insert(partition, offset);
        state.eof_reported.remove(&partition);
        Ok(())
    }

    fn close(&self) {
        self.state.lock().closed = true;
    }
}
