use crate::domain::audit::AuditRecord;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// StageAuditRepository - 状态变更审计仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct StageAuditRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StageAuditRepository {
    /// 创建新的审计仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 在调用方事务内插入审计记录
    ///
    /// 审计只随迁移提交写入; 同一实例 seq_no 重复时返回 UniqueConstraintViolation
    pub(crate) fn insert_in_tx(conn: &Connection, record: &AuditRecord) -> RepositoryResult<()> {
        let process_data_json = if record.process_data.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.process_data)?)
        };

        conn.execute(
            r#"
            INSERT INTO stage_audit_log (
                audit_id, stage_instance_id, seq_no, from_status, to_status,
                actor_id, notes, process_data_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                record.audit_id,
                record.stage_instance_id,
                record.seq_no,
                record.from_status.to_db_str(),
                record.to_status.to_db_str(),
                record.actor_id,
                record.notes,
                process_data_json,
                record.created_at,
            ],
        )?;
        Ok(())
    }
}
