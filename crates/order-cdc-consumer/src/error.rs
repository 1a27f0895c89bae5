//! 管道错误类型
//!
//! 在共享库 CdcError 基础上区分两类处理失败：
//! - `DecodeError`: 消息本身有问题，重试无法修复，跳过并提交 offset
//! - `WriteError`: 下游写入失败，不提交 offset，等待重新投递

use cdc_shared::error::CdcError;

/// 解码失败
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// 非 JSON、非对象、字段类型错误或数值非法
    #[error("消息格式错误: {0}")]
    Malformed(String),

    /// 缺少订单 ID 的事件无法处理，直接丢弃
    #[error("消息缺少订单 ID")]
    MissingOrderId,

    /// 墓碑消息、删除事件等本管道不处理的合法消息
    #[error("消息已忽略: {reason}")]
    Ignored { reason: &'static str },
}

impl DecodeError {
    /// 指标标签
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingOrderId => "missing_order_id",
            Self::Ignored { .. } => "ignored",
        }
    }

    /// 只有格式错误的原始消息需要转发到死信 topic 供排查
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// 双写失败，变体标明失败发生在哪一步
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// 第一步失败，两个存储都未被修改
    #[error("关系库写入失败: {0}")]
    Relational(#[source] CdcError),

    /// 关系库已写入，缓存订单哈希失败
    #[error("订单哈希写入失败（关系库已写入）: {0}")]
    CachePoint(#[source] CdcError),

    /// 关系库与订单哈希已写入，最近订单列表失败
    #[error("最近订单列表写入失败（关系库与订单哈希已写入）: {0}")]
    CacheRecent(#[source] CdcError),

    #[error("结果序列化失败: {0}")]
    Serialization(String),
}

impl WriteError {
    /// 指标标签
    pub fn step(&self) -> &'static str {
        match self {
            Self::Relational(_) => "relational",
            Self::CachePoint(_) => "cache_point",
            Self::CacheRecent(_) => "cache_recent",
            Self::Serialization(_) => "serialization",
        }
    }

    /// 两个存储是否处于不一致状态
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::CachePoint(_) | Self::CacheRecent(_))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Relational(e) | Self::CachePoint(e) | Self::CacheRecent(e) => e.is_retryable(),
            Self::Serialization(_) => false,
        }
    }
}

/// 消费者运行错误
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("消费 worker 异常退出: {0}")]
    WorkerFailed(String),

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] CdcError),
}
