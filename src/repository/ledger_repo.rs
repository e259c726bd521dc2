// ==========================================
// 纺织生产流转引擎 - 批次物料台账仓储
// ==========================================
// 对齐: lot_ledger 表
// 红线: 只追加, 不提供 UPDATE / DELETE
// 并发: 领用/退回在 IMMEDIATE 事务内"复核余额 + 追加 + 更新领用方投入量"
// ==========================================

use crate::domain::ledger::{LotLedgerEntry, SourceBalance};
use crate::domain::types::{LedgerEntryKind, QuantityUnit};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::enum_col;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row, TransactionBehavior};
use std::sync::{Arc, Mutex};

const LEDGER_COLUMNS: &str = r#"
    entry_id, lot_number, source_stage_instance_id, consuming_stage_instance_id,
    kind, quantity, quantity_unit, reference_entry_id, created_at
"#;

/// 领用事务结果
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationOutcome {
    /// 已追加领用记录
    Committed(LotLedgerEntry),
    /// 余额不足, 未写入任何数据
    Insufficient(SourceBalance),
}

// ==========================================
// LotLedgerRepository - 台账仓储
// ==========================================
pub struct LotLedgerRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LotLedgerRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 追加一条台账记录 (独立事务)
    pub fn append(&self, entry: &LotLedgerEntry) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_in_tx(&conn, entry)
    }

    /// 在调用方事务内追加台账记录
    pub(crate) fn insert_in_tx(conn: &Connection, entry: &LotLedgerEntry) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO lot_ledger ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                LEDGER_COLUMNS
            ),
            params![
                entry.entry_id,
                entry.lot_number,
                entry.source_stage_instance_id,
                entry.consuming_stage_instance_id,
                entry.kind.to_db_str(),
                entry.quantity,
                entry.quantity_unit.to_db_str(),
                entry.reference_entry_id,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    /// 原子领用
    ///
    /// 同一事务内:
    /// 1. 复核产出方余额, 不足则回滚并返回 `Insufficient`
    /// 2. 追加 allocated 记录
    /// 3. 领用方 input_quantity 增加, revision 校验并 +1
    ///
    /// # 参数
    /// - `entry`: 待追加的 allocated 记录
    /// - `consumer_revision`: 读取领用方时的 revision
    /// - `epsilon`: 浮点舍入容差 (上限见 `config::MAX_QUANTITY_EPSILON`)
    pub fn allocate_atomically(
        &self,
        entry: &LotLedgerEntry,
        consumer_revision: i64,
        epsilon: f64,
    ) -> RepositoryResult<AllocationOutcome> {
        let consumer_id = entry
            .consuming_stage_instance_id
            .as_deref()
            .ok_or_else(|| RepositoryError::FieldValueError {
                field: "consuming_stage_instance_id".to_string(),
                message: "领用记录必须指定领用方".to_string(),
            })?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let balance = Self::balance_with(&tx, &entry.lot_number, &entry.source_stage_instance_id)?;
        if !balance.can_cover(entry.quantity, epsilon) {
            // 未写入, 直接丢弃事务
            return Ok(AllocationOutcome::Insufficient(balance));
        }

        Self::insert_in_tx(&tx, entry)?;
        Self::adjust_consumer_input(&tx, consumer_id, entry.quantity, consumer_revision, entry)?;

        tx.commit()?;
        Ok(AllocationOutcome::Committed(entry.clone()))
    }

    /// 原子退回
    ///
    /// 同一事务内追加 released 记录并扣减领用方 input_quantity;
    /// 重复退回由唯一索引拦截 (UniqueConstraintViolation)
    pub fn release_atomically(
        &self,
        entry: &LotLedgerEntry,
        consumer_revision: i64,
    ) -> RepositoryResult<()> {
        let consumer_id = entry
            .consuming_stage_instance_id
            .as_deref()
            .ok_or_else(|| RepositoryError::FieldValueError {
                field: "consuming_stage_instance_id".to_string(),
                message: "退回记录必须指定领用方".to_string(),
            })?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        Self::insert_in_tx(&tx, entry)?;
        Self::adjust_consumer_input(&tx, consumer_id, -entry.quantity, consumer_revision, entry)?;

        tx.commit()?;
        Ok(())
    }

    fn adjust_consumer_input(
        conn: &Connection,
        consumer_id: &str,
        delta: f64,
        expected_revision: i64,
        entry: &LotLedgerEntry,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"UPDATE stage_instance
               SET input_quantity = MAX(0, input_quantity + ?1),
                   updated_at = ?2, revision = revision + 1
               WHERE stage_instance_id = ?3 AND revision = ?4"#,
            params![delta, entry.created_at, consumer_id, expected_revision],
        )?;
        if affected == 0 {
            let actual: Option<i64> = conn
                .query_row(
                    "SELECT revision FROM stage_instance WHERE stage_instance_id = ?1",
                    params![consumer_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match actual {
                Some(actual) => RepositoryError::OptimisticLockFailure {
                    stage_instance_id: consumer_id.to_string(),
                    expected: expected_revision,
                    actual,
                },
                None => RepositoryError::not_found("StageInstance", consumer_id),
            });
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 产出方余额
    pub fn source_balance(
        &self,
        lot_number: &str,
        source_stage_instance_id: &str,
    ) -> RepositoryResult<SourceBalance> {
        let conn = self.get_conn()?;
        Self::balance_with(&conn, lot_number, source_stage_instance_id)
    }

    fn balance_with(
        conn: &Connection,
        lot_number: &str,
        source_stage_instance_id: &str,
    ) -> RepositoryResult<SourceBalance> {
        let mut balance = SourceBalance::empty(lot_number, source_stage_instance_id);

        let mut stmt = conn.prepare(
            r#"SELECT kind, COALESCE(SUM(quantity), 0), MIN(quantity_unit)
               FROM lot_ledger
               WHERE lot_number = ?1 AND source_stage_instance_id = ?2
               GROUP BY kind"#,
        )?;
        let rows = stmt.query_map(params![lot_number, source_stage_instance_id], |row| {
            Ok((
                enum_col(row, 0, "kind", LedgerEntryKind::from_str)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        for row in rows {
            let (kind, sum, unit) = row?;
            match kind {
                LedgerEntryKind::Produced => {
                    balance.produced = sum;
                    balance.quantity_unit = unit.as_deref().and_then(QuantityUnit::from_str);
                }
                LedgerEntryKind::Allocated => balance.allocated = sum,
                LedgerEntryKind::Released => balance.released = sum,
            }
        }
        Ok(balance)
    }

    /// 批次下全部产出方余额 (按首次产出顺序)
    pub fn lot_balances(&self, lot_number: &str) -> RepositoryResult<Vec<SourceBalance>> {
        let conn = self.get_conn()?;
        let sources: Vec<String> = {
            let mut stmt = conn.prepare(
                r#"SELECT source_stage_instance_id
                   FROM lot_ledger
                   WHERE lot_number = ?1
                   GROUP BY source_stage_instance_id
                   ORDER BY MIN(ledger_seq)"#,
            )?;
            let ids = stmt
                .query_map(params![lot_number], |row| row.get(0))?
                .collect::<SqliteResult<Vec<_>>>()?;
            ids
        };

        sources
            .iter()
            .map(|source| Self::balance_with(&conn, lot_number, source))
            .collect()
    }

    /// 按记录 ID 查询
    pub fn find_by_id(&self, entry_id: &str) -> RepositoryResult<Option<LotLedgerEntry>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM lot_ledger WHERE entry_id = ?1", LEDGER_COLUMNS);
        let entry = conn
            .query_row(&sql, params![entry_id], Self::map_row)
            .optional()?;
        Ok(entry)
    }

    /// 产出方的产出记录 (每个产出方至多一条)
    pub fn find_production(
        &self,
        source_stage_instance_id: &str,
    ) -> RepositoryResult<Option<LotLedgerEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM lot_ledger WHERE kind = 'produced' AND source_stage_instance_id = ?1",
            LEDGER_COLUMNS
        );
        let entry = conn
            .query_row(&sql, params![source_stage_instance_id], Self::map_row)
            .optional()?;
        Ok(entry)
    }

    /// 领用记录是否已退回
    pub fn is_released(&self, allocation_entry_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM lot_ledger WHERE kind = 'released' AND reference_entry_id = ?1",
            params![allocation_entry_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 批次台账流水 (最早在前)
    pub fn find_by_lot(&self, lot_number: &str) -> RepositoryResult<Vec<LotLedgerEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM lot_ledger WHERE lot_number = ?1 ORDER BY ledger_seq",
            LEDGER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![lot_number], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    /// 领用方尚未退回的领用记录
    pub fn outstanding_allocations_for_consumer(
        &self,
        consuming_stage_instance_id: &str,
    ) -> RepositoryResult<Vec<LotLedgerEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"SELECT {} FROM lot_ledger a
               WHERE a.kind = 'allocated'
                 AND a.consuming_stage_instance_id = ?1
                 AND NOT EXISTS (
                     SELECT 1 FROM lot_ledger r
                     WHERE r.kind = 'released' AND r.reference_entry_id = a.entry_id
                 )
               ORDER BY a.ledger_seq"#,
            LEDGER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![consuming_stage_instance_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<LotLedgerEntry> {
        Ok(LotLedgerEntry {
            entry_id: row.get(0)?,
            lot_number: row.get(1)?,
            source_stage_instance_id: row.get(2)?,
            consuming_stage_instance_id: row.get(3)?,
            kind: enum_col(row, 4, "kind", LedgerEntryKind::from_str)?,
            quantity: row.get(5)?,
            quantity_unit: enum_col(row, 6, "quantity_unit", QuantityUnit::from_str)?,
            reference_entry_id: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stage::StageInstance;
    use crate::domain::types::{ProcessType, StageStatus};
    use crate::repository::stage_repo::StageInstanceRepository;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn setup() -> (LotLedgerRepository, StageInstanceRepository) {
        let conn = Arc::new(Mutex::new(crate::db::open_in_memory().unwrap()));
        let stage_repo = StageInstanceRepository::new(conn.clone());
        for id in ["SRC", "DST"] {
            stage_repo
                .insert(&StageInstance {
                    stage_instance_id: id.to_string(),
                    lot_number: "LOT-1".to_string(),
                    production_order_id: None,
                    process_type: ProcessType::Dyeing,
                    stage_number: 1,
                    status: StageStatus::Pending,
                    planned_start_time: None,
                    planned_end_time: None,
                    actual_start_time: None,
                    actual_end_time: None,
                    quantity_unit: QuantityUnit::Meter,
                    input_quantity: 0.0,
                    produced_quantity: None,
                    defect_quantity: None,
                    loss_quantity: None,
                    quality_grade: None,
                    quality_notes: None,
                    created_at: ts(),
                    updated_at: ts(),
                    revision: 0,
                })
                .unwrap();
        }
        (LotLedgerRepository::new(conn), stage_repo)
    }

    fn entry(id: &str, kind: LedgerEntryKind, quantity: f64, reference: Option<&str>) -> LotLedgerEntry {
        LotLedgerEntry {
            entry_id: id.to_string(),
            lot_number: "LOT-1".to_string(),
            source_stage_instance_id: "SRC".to_string(),
            consuming_stage_instance_id: match kind {
                LedgerEntryKind::Produced => None,
                _ => Some("DST".to_string()),
            },
            kind,
            quantity,
            quantity_unit: QuantityUnit::Meter,
            reference_entry_id: reference.map(str::to_string),
            created_at: ts(),
        }
    }

    #[test]
    fn test_allocate_atomically_checks_balance() {
        let (repo, stage_repo) = setup();
        repo.append(&entry("P1", LedgerEntryKind::Produced, 45.0, None)).unwrap();

        let outcome = repo
            .allocate_atomically(&entry("A1", LedgerEntryKind::Allocated, 30.0, None), 0, 1e-9)
            .unwrap();
        assert!(matches!(outcome, AllocationOutcome::Committed(_)));

        let outcome = repo
            .allocate_atomically(&entry("A2", LedgerEntryKind::Allocated, 20.0, None), 1, 1e-9)
            .unwrap();
        match outcome {
            AllocationOutcome::Insufficient(balance) => {
                assert!((balance.available() - 15.0).abs() < 1e-9)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert!(repo.find_by_id("A2").unwrap().is_none());
        let consumer = stage_repo.find_by_id("DST").unwrap().unwrap();
        assert_eq!(consumer.input_quantity, 30.0);
        assert_eq!(consumer.revision, 1);
    }

    #[test]
    fn test_allocate_atomically_exact_boundary() {
        let (repo, _stage_repo) = setup();
        repo.append(&entry("P1", LedgerEntryKind::Produced, 45.0, None)).unwrap();

        // 超出 1e-7 即拒绝
        let outcome = repo
            .allocate_atomically(&entry("A1", LedgerEntryKind::Allocated, 45.0 + 1e-7, None), 0, 1e-9)
            .unwrap();
        assert!(matches!(outcome, AllocationOutcome::Insufficient(_)));

        // 恰好领完
        let outcome = repo
            .allocate_atomically(&entry("A2", LedgerEntryKind::Allocated, 45.0, None), 0, 1e-9)
            .unwrap();
        assert!(matches!(outcome, AllocationOutcome::Committed(_)));
        assert_eq!(repo.source_balance("LOT-1", "SRC").unwrap().available(), 0.0);
    }

    #[test]
    fn test_single_production_per_source() {
        let (repo, _stage_repo) = setup();
        repo.append(&entry("P1", LedgerEntryKind::Produced, 45.0, None)).unwrap();

        let err = repo
            .append(&entry("P2", LedgerEntryKind::Produced, 5.0, None))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));
        assert_eq!(repo.find_production("SRC").unwrap().unwrap().entry_id, "P1");
        assert!(repo.find_production("DST").unwrap().is_none());
    }

    #[test]
    fn test_allocate_atomically_rolls_back_on_stale_consumer() {
        let (repo, _stage_repo) = setup();
        repo.append(&entry("P1", LedgerEntryKind::Produced, 45.0, None)).unwrap();

        let err = repo
            .allocate_atomically(&entry("A1", LedgerEntryKind::Allocated, 10.0, None), 7, 1e-9)
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::OptimisticLockFailure { expected: 7, actual: 0, .. }
        ));
        assert!(repo.find_by_id("A1").unwrap().is_none());
        assert_eq!(repo.source_balance("LOT-1", "SRC").unwrap().allocated, 0.0);
    }

    #[test]
    fn test_release_only_once() {
        let (repo, _stage_repo) = setup();
        repo.append(&entry("P1", LedgerEntryKind::Produced, 45.0, None)).unwrap();
        repo.allocate_atomically(&entry("A1", LedgerEntryKind::Allocated, 30.0, None), 0, 1e-9)
            .unwrap();

        repo.release_atomically(&entry("R1", LedgerEntryKind::Released, 30.0, Some("A1")), 1)
            .unwrap();
        assert!(repo.is_released("A1").unwrap());
        assert!(repo.outstanding_allocations_for_consumer("DST").unwrap().is_empty());

        let err = repo
            .release_atomically(&entry("R2", LedgerEntryKind::Released, 30.0, Some("A1")), 2)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));

        let balance = repo.source_balance("LOT-1", "SRC").unwrap();
        assert_eq!(balance.outstanding(), 0.0);
        assert_eq!(balance.available(), 45.0);
        assert_eq!(repo.find_by_lot("LOT-1").unwrap().len(), 3);
    }
}
