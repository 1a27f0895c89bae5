//! 订单变更数据物化管道
//!
//! 从 Kafka 消费订单表的行变更，计算订单总额后同时写入 PostgreSQL 结果表
//! 与 Redis 缓存，写入成功后才提交 offset（至少一次）。
//!
//! - `decoder`: 原始负载 -> `ChangeEvent`
//! - `transformer`: `ChangeEvent` -> `ResultRecord`
//! - `upsert`: 结果表的列级冲突合并策略
//! - `sink` / `writer`: 关系库与缓存的双写
//! - `source`: 可提交、可回退的变更日志
//! - `coordinator`: 拉取 -> 处理 -> 提交循环
//! - `dead_letter`: 无法解析记录的死信转发

pub mod coordinator;
pub mod dead_letter;
pub mod decoder;
pub mod error;
pub mod models;
pub mod sink;
pub mod source;
pub mod transformer;
pub mod upsert;
pub mod writer;
