//! PostgreSQL 连接池与结果表迁移

use crate::config::DatabaseConfig;
use crate::error::{CdcError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// 数据库连接池包装
///
/// `PgPool` 按需分配连接，多个 worker 并发写不同订单时各自持有独立连接。
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 按配置创建连接池，连接参数与池大小都来自 `DatabaseConfig`
    #[instrument(skip(config), fields(host = %config.host, database = %config.database))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        Self::connect_with(options, &config.url()).await
    }

    /// 使用默认池参数直连，测试中用环境变量给出的连接串
    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect_with(PgPoolOptions::new().max_connections(2), url).await
    }

    async fn connect_with(options: PgPoolOptions, url: &str) -> Result<Self> {
        let pool = options.connect(url).await?;
        info!("Database connection pool created");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(CdcError::from)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }

    /// 执行仓库根目录 migrations/ 下的建表脚本，已执行过的版本会跳过
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}
