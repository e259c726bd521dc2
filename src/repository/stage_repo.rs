// ==========================================
// 纺织生产流转引擎 - 工序实例数据仓储
// ==========================================
// 对齐: stage_instance 表
// 红线: Repository 不做业务逻辑,只做数据映射
// 并发: revision 乐观锁, 迁移提交与审计/台账写入同一事务
// ==========================================

use crate::domain::audit::AuditRecord;
use crate::domain::ledger::LotLedgerEntry;
use crate::domain::stage::StageInstance;
use crate::domain::types::{ProcessType, QualityGrade, QuantityUnit, StageStatus};
use crate::repository::audit_repo::StageAuditRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::ledger_repo::LotLedgerRepository;
use crate::repository::row_utils::{enum_col, opt_enum_col};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row, TransactionBehavior};
use std::sync::{Arc, Mutex};

const STAGE_COLUMNS: &str = r#"
    stage_instance_id, lot_number, production_order_id, process_type, stage_number,
    status, planned_start_time, planned_end_time, actual_start_time, actual_end_time,
    quantity_unit, input_quantity, produced_quantity, defect_quantity, loss_quantity,
    quality_grade, quality_notes, created_at, updated_at, revision
"#;

// ==========================================
// StageInstanceRepository - 工序实例仓储
// ==========================================
pub struct StageInstanceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StageInstanceRepository {
    /// 从已有连接创建仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 登记工序实例 (只用于新建, 状态应为 pending)
    pub fn insert(&self, stage: &StageInstance) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO stage_instance ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                STAGE_COLUMNS
            ),
            params![
                stage.stage_instance_id,
                stage.lot_number,
                stage.production_order_id,
                stage.process_type.to_db_str(),
                stage.stage_number,
                stage.status.to_db_str(),
                stage.planned_start_time,
                stage.planned_end_time,
                stage.actual_start_time,
                stage.actual_end_time,
                stage.quantity_unit.to_db_str(),
                stage.input_quantity,
                stage.produced_quantity,
                stage.defect_quantity,
                stage.loss_quantity,
                stage.quality_grade.map(|g| g.to_db_str()),
                stage.quality_notes,
                stage.created_at,
                stage.updated_at,
                stage.revision,
            ],
        )?;
        Ok(())
    }

    /// 提交一次状态迁移
    ///
    /// 同一事务内完成:
    /// 1. 带 revision 检查的实例更新 (revision + 1)
    /// 2. 审计记录追加
    /// 3. 迁移附带的台账记录追加 (完工产出 / 取消退回)
    ///
    /// # 参数
    /// - `stage`: 迁移后的实例, `revision` 为读取时的版本号
    ///
    /// # 返回
    /// - `Ok(StageInstance)`: 已提交的实例 (revision 已递增)
    /// - `Err(OptimisticLockFailure)`: revision 不匹配, 事务回滚
    pub fn commit_transition(
        &self,
        stage: &StageInstance,
        audit: &AuditRecord,
        ledger_entries: &[LotLedgerEntry],
    ) -> RepositoryResult<StageInstance> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let affected = tx.execute(
            r#"UPDATE stage_instance
               SET status = ?1, actual_start_time = ?2, actual_end_time = ?3,
                   input_quantity = ?4, produced_quantity = ?5, defect_quantity = ?6,
                   loss_quantity = ?7, quality_grade = ?8, quality_notes = ?9,
                   updated_at = ?10, revision = revision + 1
               WHERE stage_instance_id = ?11 AND revision = ?12"#,
            params![
                stage.status.to_db_str(),
                stage.actual_start_time,
                stage.actual_end_time,
                stage.input_quantity,
                stage.produced_quantity,
                stage.defect_quantity,
                stage.loss_quantity,
                stage.quality_grade.map(|g| g.to_db_str()),
                stage.quality_notes,
                stage.updated_at,
                stage.stage_instance_id,
                stage.revision,
            ],
        )?;

        if affected == 0 {
            // 判断是记录不存在还是revision冲突
            let actual: Option<i64> = tx
                .query_row(
                    "SELECT revision FROM stage_instance WHERE stage_instance_id = ?1",
                    params![stage.stage_instance_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match actual {
                Some(actual) => RepositoryError::OptimisticLockFailure {
                    stage_instance_id: stage.stage_instance_id.clone(),
                    expected: stage.revision,
                    actual,
                },
                None => RepositoryError::not_found("StageInstance", &stage.stage_instance_id),
            });
        }

        StageAuditRepository::insert_in_tx(&tx, audit)?;
        for entry in ledger_entries {
            LotLedgerRepository::insert_in_tx(&tx, entry)?;
        }

        tx.commit()?;

        let mut committed = stage.clone();
        committed.revision += 1;
        Ok(committed)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 ID 查询
    pub fn find_by_id(&self, stage_instance_id: &str) -> RepositoryResult<Option<StageInstance>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, stage_instance_id)
    }

    /// 在给定连接/事务上按 ID 查询
    pub(crate) fn find_by_id_with(
        conn: &Connection,
        stage_instance_id: &str,
    ) -> RepositoryResult<Option<StageInstance>> {
        let sql = format!(
            "SELECT {} FROM stage_instance WHERE stage_instance_id = ?1",
            STAGE_COLUMNS
        );
        let stage = conn
            .query_row(&sql, params![stage_instance_id], Self::map_row)
            .optional()?;
        Ok(stage)
    }

    /// 查询批次下的全部工序 (按工序序号)
    pub fn find_by_lot(&self, lot_number: &str) -> RepositoryResult<Vec<StageInstance>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM stage_instance WHERE lot_number = ?1 ORDER BY stage_number, created_at",
            STAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let stages = stmt
            .query_map(params![lot_number], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(stages)
    }

    /// 查询订单下的全部工序 (按工序序号)
    pub fn find_by_order(&self, production_order_id: &str) -> RepositoryResult<Vec<StageInstance>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM stage_instance WHERE production_order_id = ?1 ORDER BY stage_number, created_at",
            STAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let stages = stmt
            .query_map(params![production_order_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(stages)
    }

    /// 批量按 ID 查询, 保持入参顺序; 任一缺失返回 NotFound
    pub fn find_many(&self, ids: &[String]) -> RepositoryResult<Vec<StageInstance>> {
        let conn = self.get_conn()?;
        let mut stages = Vec::with_capacity(ids.len());
        for id in ids {
            let stage = Self::find_by_id_with(&conn, id)?
                .ok_or_else(|| RepositoryError::not_found("StageInstance", id))?;
            stages.push(stage);
        }
        Ok(stages)
    }

    // ==========================================
    // 行映射
    // ==========================================

    fn map_row(row: &Row<'_>) -> SqliteResult<StageInstance> {
        Ok(StageInstance {
            stage_instance_id: row.get(0)?,
            lot_number: row.get(1)?,
            production_order_id: row.get(2)?,
            process_type: enum_col(row, 3, "process_type", ProcessType::from_str)?,
            stage_number: row.get(4)?,
            status: enum_col(row, 5, "status", StageStatus::from_str)?,
            planned_start_time: row.get(6)?,
            planned_end_time: row.get(7)?,
            actual_start_time: row.get(8)?,
            actual_end_time: row.get(9)?,
            quantity_unit: enum_col(row, 10, "quantity_unit", QuantityUnit::from_str)?,
            input_quantity: row.get(11)?,
            produced_quantity: row.get(12)?,
            defect_quantity: row.get(13)?,
            loss_quantity: row.get(14)?,
            quality_grade: opt_enum_col(row, 15, "quality_grade", QualityGrade::from_str)?,
            quality_notes: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
            revision: row.get(19)?,
        })
    }
}
