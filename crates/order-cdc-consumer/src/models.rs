//! 管道数据模型
//!
//! - `ChangeEvent`: 从一条变更日志解码出的订单行，只在单次处理中存在
//! - `ResultRecord`: 派生结果，同时写入关系库与缓存

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 订单状态缺省值
pub const DEFAULT_STATUS: &str = "PENDING";

/// 订单表的一次行变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub order_id: String,
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub status: String,
}

/// 处理结果
///
/// 每次处理都会完整重算 `total`，不沿用旧版本的派生值；
/// `processed_at` 是处理时刻而非原始变更时刻。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ResultRecord {
    pub order_id: String,
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub total: Decimal,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

impl ResultRecord {
    /// 最近订单列表中的序列化形式
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 订单哈希的字段列表
    ///
    /// Redis 哈希只能保存字符串，缺失的客户/商品 ID 写为空串，
    /// 保证每次覆盖后字段集合固定。
    pub fn to_hash_fields(&self) -> Vec<(String, String)> {
        vec![
            ("order_id".to_string(), self.order_id.clone()),
            (
                "customer_id".to_string(),
                self.customer_id.clone().unwrap_or_default(),
            ),
            (
                "product_id".to_string(),
                self.product_id.clone().unwrap_or_default(),
            ),
            ("quantity".to_string(), self.quantity.to_string()),
            ("price".to_string(), self.price.to_string()),
            ("total".to_string(), self.total.to_string()),
            ("status".to_string(), self.status.clone()),
            (
                "processed_at".to_string(),
                self.processed_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
        ]
    }
}
