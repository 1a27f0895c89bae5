//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::CdcError;
use crate::retry::RetryPolicy;

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    /// 启动时执行 migrations/ 下的建表脚本
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "orders".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 30,
            idle_timeout_seconds: 600,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    /// 组装 PostgreSQL 连接串
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub consumer_group: String,
    /// Debezium 连接器按 `{server}.{schema}.{table}` 命名的变更 topic
    pub topic: String,
    pub auto_offset_reset: String,
    pub poll_timeout_ms: u64,
    /// 配置后，无法解析的消息会连同失败原因转发到该 topic
    pub dead_letter_topic: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            consumer_group: "order-processing-group".to_string(),
            topic: "postgres.public.orders".to_string(),
            auto_offset_reset: "earliest".to_string(),
            poll_timeout_ms: 1000,
            dead_letter_topic: None,
        }
    }
}

impl KafkaConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// 写入失败时的重试配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

/// 消费管道配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// 同一消费组内并行的消费者数量，Kafka 会为每个消费者分配互不重叠的分区
    pub workers: usize,
    /// 订阅前的等待时间，给依赖服务留出启动窗口
    pub startup_delay_seconds: u64,
    pub recent_list_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            startup_delay_seconds: 10,
            recent_list_capacity: 100,
            retry: RetryConfig::default(),
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub consumer: ConsumerConfig,
    pub observability: ObservabilityConfig,
}

/// 原部署使用的扁平环境变量到配置路径的映射
const LEGACY_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("KAFKA_BOOTSTRAP_SERVERS", "kafka.brokers"),
    ("REDIS_HOST", "redis.host"),
    ("REDIS_PORT", "redis.port"),
    ("POSTGRES_HOST", "database.host"),
    ("POSTGRES_PORT", "database.port"),
    ("POSTGRES_USER", "database.user"),
    ("POSTGRES_PASSWORD", "database.password"),
    ("POSTGRES_DB", "database.database"),
];

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（ORDER_CDC_ 前缀，如 ORDER_CDC_KAFKA__BROKERS -> kafka.brokers）
    /// 5. 原部署的扁平环境变量（KAFKA_BOOTSTRAP_SERVERS、POSTGRES_HOST 等）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        // .env 文件缺失是正常情况
        let _ = dotenvy::dotenv();

        let env = std::env::var("ORDER_CDC_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let mut builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("ORDER_CDC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        for (path, value) in Self::legacy_overrides(|name| std::env::var(name).ok()) {
            builder = builder.set_override(path, value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// 收集已设置的扁平环境变量，返回 (配置路径, 值)
    ///
    /// 读取函数作为参数传入，测试时无需修改进程环境变量。
    fn legacy_overrides(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Vec<(&'static str, String)> {
        LEGACY_ENV_OVERRIDES
            .iter()
            .filter_map(|(name, path)| {
                lookup(name)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (*path, v))
            })
            .collect()
    }

    /// 启动前校验，管道不能带着无效配置运行
    pub fn validate(&self) -> Result<(), CdcError> {
        let required = [
            ("kafka.brokers", self.kafka.brokers.as_str()),
            ("kafka.consumer_group", self.kafka.consumer_group.as_str()),
            ("kafka.topic", self.kafka.topic.as_str()),
            ("redis.host", self.redis.host.as_str()),
            ("database.host", self.database.host.as_str()),
            ("database.database", self.database.database.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(CdcError::Config(format!("{name} 不能为空")));
            }
        }

        if self.consumer.workers == 0 {
            return Err(CdcError::Config("consumer.workers 必须大于 0".to_string()));
        }
        if self.consumer.recent_list_capacity == 0 {
            return Err(CdcError::Config(
                "consumer.recent_list_capacity 必须大于 0".to_string(),
            ));
        }
        if self.kafka.poll_timeout_ms == 0 {
            return Err(CdcError::Config("kafka.poll_timeout_ms 必须大于 0".to_string()));
        }

        Ok(())
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.consumer.startup_delay_seconds)
    }
}
