//! 关系库冲突合并策略
//!
//! 以列为粒度声明"主键冲突时保留旧值还是采用新值"，
//! 同一份声明既驱动内存合并函数，也生成 `ON CONFLICT` 子句，两者不会不一致。

use crate::models::ResultRecord;

/// 结果表名
pub const RESULTS_TABLE: &str = "results";

/// 结果表的列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    OrderId,
    CustomerId,
    ProductId,
    Quantity,
    Price,
    Total,
    Status,
    ProcessedAt,
}

impl Column {
    /// 按建表顺序排列，INSERT 的列与占位符顺序以此为准
    pub const ALL: [Column; 8] = [
        Column::OrderId,
        Column::CustomerId,
        Column::ProductId,
        Column::Quantity,
        Column::Price,
        Column::Total,
        Column::Status,
        Column::ProcessedAt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::OrderId => "order_id",
            Self::CustomerId => "customer_id",
            Self::ProductId => "product_id",
            Self::Quantity => "quantity",
            Self::Price => "price",
            Self::Total => "total",
            Self::Status => "status",
            Self::ProcessedAt => "processed_at",
        }
    }
}

/// 主键冲突时单列的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    KeepExisting,
    TakeIncoming,
}

/// 列级合并策略
#[derive(Debug, Clone)]
pub struct UpsertPolicy {
    take_incoming: Vec<Column>,
}

impl UpsertPolicy {
    /// 数量、价格、总额等首写为准，状态与处理时间以最后一次为准
    pub fn first_write_wins() -> Self {
        Self::taking_incoming(&[Column::Status, Column::ProcessedAt])
    }

    /// 除主键外所有列都采用新值
    pub fn last_write_wins() -> Self {
        Self::taking_incoming(&Column::ALL)
    }

    /// 指定冲突时采用新值的列，主键列总是被忽略
    pub fn taking_incoming(columns: &[Column]) -> Self {
        let mut take_incoming = Vec::new();
        for column in Column::ALL {
            if column != Column::OrderId && columns.contains(&column) {
                take_incoming.push(column);
            }
        }
        Self { take_incoming }
    }

    pub fn action(&self, column: Column) -> ConflictAction {
        if self.take_incoming.contains(&column) {
            ConflictAction::TakeIncoming
        } else {
            ConflictAction::KeepExisting
        }
    }

    /// 合并已有行与新记录，得到写入后的行
    pub fn merge(&self, existing: Option<&ResultRecord>, incoming: &ResultRecord) -> ResultRecord {
        let Some(existing) = existing else {
            return incoming.clone();
        };

        let mut merged = existing.clone();
        for column in &self.take_incoming {
            match column {
                Column::OrderId => {}
                Column::CustomerId => merged.customer_id = incoming.customer_id.clone(),
                Column::ProductId => merged.product_id = incoming.product_id.clone(),
                Column::Quantity => merged.quantity = incoming.quantity,
                Column::Price => merged.price = incoming.price,
                Column::Total => merged.total = incoming.total,
                Column::Status => merged.status = incoming.status.clone(),
                Column::ProcessedAt => merged.processed_at = incoming.processed_at,
            }
        }
        merged
    }

    /// 生成冲突处理子句
    pub fn on_conflict_clause(&self) -> String {
        if self.take_incoming.is_empty() {
            return format!("ON CONFLICT ({}) DO NOTHING", Column::OrderId.name());
        }

        let assignments: Vec<String> = self
            .take_incoming
            .iter()
            .map(|c| format!("{0} = EXCLUDED.{0}", c.name()))
            .collect();

        format!(
            "ON CONFLICT ({}) DO UPDATE SET {}",
            Column::OrderId.name(),
            assignments.join(", ")
        )
    }

    /// 生成完整的 upsert 语句，占位符顺序与 `Column::ALL` 一致
    pub fn upsert_sql(&self, table: &str) -> String {
        let columns: Vec<&str> = Column::ALL.iter().map(|c| c.name()).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({}) {}",
            table,
            columns.join(", "),
            placeholders.join(", "),
            self.on_conflict_clause()
        )
    }
}

impl Default for UpsertPolicy {
    fn default() -> Self {
        Self::first_write_wins()
    }
}
