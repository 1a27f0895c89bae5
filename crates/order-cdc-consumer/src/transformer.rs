//! 订单转换
//!
//! 纯函数，不做任何 I/O。同一事件重复处理时 `total`/`status` 不变，
//! 只有 `processed_at` 不同，下游按覆盖写处理即可。

use chrono::{DateTime, Utc};

use crate::models::{ChangeEvent, ResultRecord};

/// 以当前时间作为处理时刻
pub fn transform(event: ChangeEvent) -> ResultRecord {
    transform_at(event, Utc::now())
}

/// 以指定时间作为处理时刻
pub fn transform_at(event: ChangeEvent, processed_at: DateTime<Utc>) -> ResultRecord {
    // 解码阶段已拒绝会溢出的组合，这里饱和乘法只为保证函数对任意输入都有定义
    let total = rust_decimal::Decimal::from(event.quantity).saturating_mul(event.price);

    ResultRecord {
        order_id: event.order_id,
        customer_id: event.customer_id,
        product_id: event.product_id,
        quantity: event.quantity,
        price: event.price,
        total,
        status: event.status,
        processed_at,
    }
}
