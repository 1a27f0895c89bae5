//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 管道自身的解码/写入错误定义在消费者 crate 中，并通过 `#[from]` 透传本类型。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum CdcError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // ==================== 缓存错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 序列化错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(String),

    // ==================== 配置错误 ====================
    #[error("配置无效: {0}")]
    Config(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, CdcError>;

impl CdcError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 连接类故障视为瞬时故障；数据库约束冲突等确定性错误重试也不会成功。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => !matches!(
                e,
                sqlx::Error::Database(_)
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::TypeNotFound { .. }
            ),
            Self::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
            }
            Self::Kafka(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for CdcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = CdcError::Kafka("broker 不可达".to_string());
        assert_eq!(err.code(), "KAFKA_ERROR");

        let err = CdcError::Config("kafka.brokers 不能为空".to_string());
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_is_retryable() {
        let db_err = CdcError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let closed = CdcError::Database(sqlx::Error::PoolClosed);
        assert!(closed.is_retryable());

        let missing_column = CdcError::Database(sqlx::Error::ColumnNotFound("total".to_string()));
        assert!(!missing_column.is_retryable());

        let io = CdcError::Redis(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )));
        assert!(io.is_retryable());

        assert!(!CdcError::Serialization("bad".to_string()).is_retryable());
        assert!(!CdcError::Internal("bug".to_string()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: CdcError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.code(), "SERIALIZATION_ERROR");
    }
}
