//! 管道级测试
//!
//! 使用内存存储与脚本化变更日志驱动完整的 拉取 -> 解码 -> 转换 -> 双写 -> 提交 流程。

use std::sync::Arc;
use std::time::Duration;

use cdc_shared::cache::CacheKey;
use cdc_shared::retry::RetryPolicy;
use order_cdc_consumer::coordinator::{CoordinatorSettings, Cycle, StreamCoordinator};
use order_cdc_consumer::models::ResultRecord;
use order_cdc_consumer::sink::{InMemoryCacheStore, InMemoryRelationalStore};
use order_cdc_consumer::source::ScriptedChangeLog;
use order_cdc_consumer::writer::DualSinkWriter;
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio::sync::watch;

const TOPIC: &str = "postgres.public.orders";

// ==================== 测试夹具 ====================

struct Pipeline {
    log: ScriptedChangeLog,
    relational: Arc<InMemoryRelationalStore>,
    cache: Arc<InMemoryCacheStore>,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            log: ScriptedChangeLog::new(TOPIC),
            relational: Arc::new(InMemoryRelationalStore::default()),
            cache: Arc::new(InMemoryCacheStore::new()),
        }
    }

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            topic: TOPIC.to_string(),
            poll_timeout: Duration::from_millis(5),
            retry: RetryPolicy {
                max_retries: 1,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                multiplier: 2.0,
            },
            halt_backoff: Duration::from_millis(10),
        }
    }

    /// 每次调用相当于一个新启动的进程，共享同一份日志与存储
    fn coordinator(&self) -> StreamCoordinator<ScriptedChangeLog> {
        let writer = DualSinkWriter::new(self.relational.clone(), self.cache.clone());
        StreamCoordinator::new(self.log.clone(), writer, Self::settings())
    }

    fn recent(&self) -> Vec<ResultRecord> {
        self.cache
            .list(CacheKey::RECENT_ORDERS)
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }
}

fn order_payload(id: &str, status: &str) -> Vec<u8> {
    format!(
        r#"{{"id":"{id}","customer_id":"C1","product_id":"P1","quantity":3,"price":9.99,"status":"{status}"}}"#
    )
    .into_bytes()
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ==================== 场景测试 ====================

#[tokio::test]
async fn test_insert_writes_both_stores() {
    let p = Pipeline::new();
    p.log.append(0, Some("O1"), order_payload("O1", "PENDING"));
    let mut coordinator = p.coordinator();

    assert_eq!(
        coordinator.poll_once().await,
        Cycle::Committed {
            partition: 0,
            offset: 0
        }
    );

    let row = p.relational.get("O1").unwrap();
    assert_eq!(row.customer_id.as_deref(), Some("C1"));
    assert_eq!(row.product_id.as_deref(), Some("P1"));
    assert_eq!(row.quantity, 3);
    assert_eq!(row.price, dec("9.99"));
    assert_eq!(row.total, dec("29.97"));
    assert_eq!(row.status, "PENDING");

    let hash = p.cache.hash("order:O1").unwrap();
    let expected: std::collections::HashMap<String, String> =
        row.to_hash_fields().into_iter().collect();
    assert_eq!(hash, expected);
    assert_eq!(hash["total"], "29.97");

    let recent = p.recent();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0], row);

    assert_eq!(p.log.committed_offset(0), Some(1));
}

#[tokio::test]
async fn test_redelivery_updates_status_only() {
    let p = Pipeline::new();
    p.log.append(0, None, order_payload("O1", "PENDING"));
    p.log.append(0, None, order_payload("O1", "SHIPPED"));
    let mut coordinator = p.coordinator();

    coordinator.poll_once().await;
    let first = p.relational.get("O1").unwrap();
    coordinator.poll_once().await;
    let second = p.relational.get("O1").unwrap();

    assert_eq!(second.status, "SHIPPED");
    assert_eq!(second.quantity, first.quantity);
    assert_eq!(second.price, first.price);
    assert_eq!(second.total, dec("29.97"));
    assert_eq!(second.customer_id, first.customer_id);
    assert!(second.processed_at >= first.processed_at);
    assert_eq!(p.relational.row_count(), 1);

    // 列表追加新条目而不是合并
    let recent = p.recent();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].status, "SHIPPED");
    assert_eq!(recent[1].status, "PENDING");

    assert_eq!(p.cache.hash("order:O1").unwrap()["status"], "SHIPPED");
}

#[tokio::test]
async fn test_null_id_is_skipped() {
    let p = Pipeline::new();
    p.log.append(
        0,
        None,
        br#"{"id":null,"customer_id":"C1","quantity":3,"price":9.99}"#.to_vec(),
    );
    let mut coordinator = p.coordinator();

    assert!(matches!(
        coordinator.poll_once().await,
        Cycle::Skipped {
            reason: "missing_order_id",
            ..
        }
    ));
    assert_eq!(p.log.committed_offset(0), Some(1));
    assert_eq!(p.relational.upsert_calls(), 0);
    assert_eq!(p.cache.hash_count(), 0);
    assert!(p.recent().is_empty());
}

#[tokio::test]
async fn test_cache_outage_withholds_commit_until_redelivery() {
    let p = Pipeline::new();
    p.log.append(0, None, order_payload("O1", "PENDING"));
    p.cache.set_unavailable(true);

    let mut coordinator = p.coordinator();
    assert_eq!(
        coordinator.poll_once().await,
        Cycle::Withheld {
            partition: 0,
            offset: 0
        }
    );
    assert_eq!(p.log.committed_offset(0), None);
    assert!(p.relational.get("O1").is_some());
    assert!(p.cache.hash("order:O1").is_none());

    // 进程崩溃后重启，从最后提交的位置恢复
    drop(coordinator);
    p.log.restart();
    p.cache.set_unavailable(false);

    let mut coordinator = p.coordinator();
    assert_eq!(
        coordinator.poll_once().await,
        Cycle::Committed {
            partition: 0,
            offset: 0
        }
    );
    assert_eq!(p.relational.row_count(), 1);
    assert!(p.cache.hash("order:O1").is_some());
    assert_eq!(p.recent().len(), 1);
    assert_eq!(p.log.committed_offset(0), Some(1));
}

#[tokio::test]
async fn test_recent_list_is_capped_newest_first() {
    let p = Pipeline::new();
    for i in 0..150 {
        p.log.append(0, None, order_payload(&format!("O{i}"), "PENDING"));
    }
    let mut coordinator = p.coordinator();

    for _ in 0..150 {
        assert!(matches!(
            coordinator.poll_once().await,
            Cycle::Committed { .. }
        ));
    }

    let recent = p.recent();
    assert_eq!(recent.len(), 100);
    assert_eq!(recent[0].order_id, "O149");
    assert_eq!(recent[99].order_id, "O50");
    assert_eq!(p.relational.row_count(), 150);
}

#[tokio::test]
async fn test_malformed_entries_never_block() {
    let p = Pipeline::new();
    p.log.append(0, None, order_payload("O1", "PENDING"));
    p.log.append(0, None, b"{\"id\": \"O2\", \"quantity\": ".to_vec());
    p.log.append(0, None, b"\xff\xfe".to_vec());
    p.log.append(0, None, order_payload("O3", "PENDING"));
    let mut coordinator = p.coordinator();

    let mut cycles = Vec::new();
    for _ in 0..4 {
        cycles.push(coordinator.poll_once().await);
    }

    assert!(matches!(cycles[1], Cycle::Skipped { reason: "malformed", .. }));
    assert!(matches!(cycles[2], Cycle::Skipped { reason: "malformed", .. }));
    assert_eq!(
        cycles[3],
        Cycle::Committed {
            partition: 0,
            offset: 3
        }
    );
    assert_eq!(p.log.committed_offset(0), Some(4));
    assert!(p.relational.get("O3").is_some());
    assert!(p.relational.get("O2").is_none());
}

#[tokio::test]
async fn test_debezium_envelope_flows_through() {
    let p = Pipeline::new();
    p.log.append(
        0,
        None,
        br#"{"schema":{"type":"struct"},"payload":{"before":null,"after":{"id":7,"quantity":2,"price":"0.10","status":"PAID"},"op":"c"}}"#.to_vec(),
    );
    p.log.append(
        0,
        None,
        br#"{"before":{"id":7},"after":null,"op":"d"}"#.to_vec(),
    );
    let mut coordinator = p.coordinator();

    coordinator.poll_once().await;
    assert!(matches!(
        coordinator.poll_once().await,
        Cycle::Skipped {
            reason: "ignored",
            ..
        }
    ));

    let row = p.relational.get("7").unwrap();
    assert_eq!(row.total, dec("0.20"));
    assert_eq!(row.status, "PAID");
    assert_eq!(p.log.committed_offset(0), Some(2));
}

#[tokio::test]
async fn test_run_recovers_after_outage() {
    let p = Pipeline::new();
    p.log.append(0, None, order_payload("O1", "PENDING"));
    p.log.append(0, None, order_payload("O2", "PENDING"));
    p.relational.set_unavailable(true);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(p.coordinator().run(rx));

    // 等待至少一轮失败
    for _ in 0..200 {
        if p.relational.upsert_calls() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(p.log.committed_offset(0), None);

    p.relational.set_unavailable(false);
    for _ in 0..400 {
        if p.log.committed_offset(0) == Some(2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(p.log.committed_offset(0), Some(2));
    assert_eq!(p.log.commit_history(), vec![(0, 0), (0, 1)]);
    assert_eq!(p.recent().len(), 2);
    assert!(p.log.is_closed());
}
