//! PostgreSQL 结果表实现

use async_trait::async_trait;
use cdc_shared::error::Result;
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::RelationalStore;
use crate::models::ResultRecord;
use crate::upsert::{RESULTS_TABLE, UpsertPolicy};

/// 结果表仓储
///
/// upsert 语句在构造时由合并策略生成一次，之后每次写入复用。
pub struct PgResultStore {
    pool: PgPool,
    upsert_sql: String,
}

impl PgResultStore {
    pub fn new(pool: PgPool, policy: &UpsertPolicy) -> Self {
        Self {
            pool,
            upsert_sql: policy.upsert_sql(RESULTS_TABLE),
        }
    }

    /// 按订单 ID 查询当前行
    pub async fn find(&self, order_id: &str) -> Result<Option<ResultRecord>> {
        let row = sqlx::query_as::<_, ResultRecord>(
            r#"
            SELECT order_id, customer_id, product_id, quantity, price, total,
                   status, processed_at
            FROM results
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

#[async_trait]
impl RelationalStore for PgResultStore {
    #[instrument(skip(self, record), fields(order_id = %record.order_id))]
    async fn upsert(&self, record: &ResultRecord) -> Result<()> {
        // 绑定顺序必须与 Column::ALL 一致
        let result = sqlx::query(&self.upsert_sql)
            .bind(&record.order_id)
            .bind(&record.customer_id)
            .bind(&record.product_id)
            .bind(record.quantity)
            .bind(record.price)
            .bind(record.total)
            .bind(&record.status)
            .bind(record.processed_at)
            .execute(&self.pool)
            .await?;

        debug!(rows_affected = result.rows_affected(), "结果表 upsert 完成");
        Ok(())
    }
}
