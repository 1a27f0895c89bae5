//! 变更记录解码
//!
//! 接受 Debezium 产生的三种形态：
//! 1. 展开后的行对象 `{"id": ..., "quantity": ...}`
//! 2. 变更信封 `{"before": .., "after": {..}, "op": "c"}`
//! 3. 带 schema 的 JSON converter 输出 `{"schema": .., "payload": <信封或行>}`
//!
//! 墓碑消息与删除事件解码为 `DecodeError::Ignored`，本管道不执行删除。

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::models::{ChangeEvent, DEFAULT_STATUS};

/// Debezium 删除操作码
const OP_DELETE: &str = "d";

/// 行中的 ID 字段可能是文本列也可能是整数列
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Integer(i64),
}

impl RawId {
    /// 统一转换为字符串，空白字符串视为缺失
    fn into_key(self) -> Option<String> {
        match self {
            Self::Text(s) if s.trim().is_empty() => None,
            Self::Text(s) => Some(s),
            Self::Integer(n) => Some(n.to_string()),
        }
    }
}

/// 行对象中本管道关心的列，其余字段忽略
#[derive(Debug, Deserialize)]
struct RawOrderRow {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    order_id: Option<RawId>,
    #[serde(default)]
    customer_id: Option<RawId>,
    #[serde(default)]
    product_id: Option<RawId>,
    #[serde(default)]
    quantity: Option<i64>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    status: Option<String>,
}

/// 将一条日志的原始负载解码为变更事件
pub fn decode(raw: &[u8]) -> Result<ChangeEvent, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Ignored { reason: "tombstone" });
    }

    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let row = extract_row(value)?;
    let row: RawOrderRow = serde_json::from_value(Value::Object(row))
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    into_event(row)
}

/// 剥去 schema 包装与变更信封，得到行对象
fn extract_row(value: Value) -> Result<Map<String, Value>, DecodeError> {
    let Value::Object(mut obj) = value else {
        return Err(DecodeError::Malformed("负载不是 JSON 对象".to_string()));
    };

    if obj.contains_key("schema") && obj.contains_key("payload") {
        match obj.remove("payload") {
            Some(Value::Object(inner)) => obj = inner,
            // 带 schema 的墓碑：payload 为 null
            Some(Value::Null) => return Err(DecodeError::Ignored { reason: "tombstone" }),
            _ => return Err(DecodeError::Malformed("payload 不是 JSON 对象".to_string())),
        }
    }

    if !is_envelope(&obj) {
        return Ok(obj);
    }

    if obj.get("op").and_then(Value::as_str) == Some(OP_DELETE) {
        return Err(DecodeError::Ignored { reason: "delete" });
    }

    match obj.remove("after") {
        Some(Value::Object(after)) => Ok(after),
        Some(Value::Null) | None => Err(DecodeError::Ignored { reason: "no_after_image" }),
        Some(_) => Err(DecodeError::Malformed("after 不是 JSON 对象".to_string())),
    }
}

/// 信封同时带有字符串类型的 op 和 after 字段
fn is_envelope(obj: &Map<String, Value>) -> bool {
    obj.get("op").is_some_and(Value::is_string) && obj.contains_key("after")
}

fn into_event(row: RawOrderRow) -> Result<ChangeEvent, DecodeError> {
    let order_id = row
        .id
        .or(row.order_id)
        .and_then(RawId::into_key)
        .ok_or(DecodeError::MissingOrderId)?;

    let quantity = match row.quantity {
        None => 0,
        Some(q) if q < 0 => {
            return Err(DecodeError::Malformed(format!("quantity 不能为负数: {q}")));
        }
        Some(q) => i32::try_from(q)
            .map_err(|_| DecodeError::Malformed(format!("quantity 超出范围: {q}")))?,
    };

    let price = row.price.unwrap_or(Decimal::ZERO);
    if price.is_sign_negative() && !price.is_zero() {
        return Err(DecodeError::Malformed(format!("price 不能为负数: {price}")));
    }
    if Decimal::from(quantity).checked_mul(price).is_none() {
        return Err(DecodeError::Malformed(format!(
            "total 溢出: quantity={quantity}, price={price}"
        )));
    }

    Ok(ChangeEvent {
        order_id,
        customer_id: row.customer_id.and_then(RawId::into_key),
        product_id: row.product_id.and_then(RawId::into_key),
        quantity,
        price,
        status: row.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
    })
}
