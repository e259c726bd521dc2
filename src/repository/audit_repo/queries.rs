use super::core::StageAuditRepository;
use crate::domain::audit::{AuditRecord, ProcessData};
use crate::domain::types::StageStatus;
use crate::repository::error::RepositoryResult;
use crate::repository::row_utils::enum_col;
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Result as SqliteResult, Row};

const AUDIT_COLUMNS: &str = r#"
    audit_id, stage_instance_id, seq_no, from_status, to_status,
    actor_id, notes, process_data_json, created_at
"#;

impl StageAuditRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 audit_id 查询单条记录
    pub fn find_by_id(&self, audit_id: &str) -> RepositoryResult<Option<AuditRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stage_audit_log WHERE audit_id = ?",
            AUDIT_COLUMNS
        ))?;

        match stmt.query_row(params![audit_id], |row| self.map_row(row)) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 实例的完整状态历史 (最早在前)
    pub fn find_by_stage(&self, stage_instance_id: &str) -> RepositoryResult<Vec<AuditRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stage_audit_log WHERE stage_instance_id = ? ORDER BY seq_no ASC",
            AUDIT_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![stage_instance_id], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    /// 查询指定操作人的最近记录
    pub fn find_by_actor(&self, actor_id: &str, limit: i32) -> RepositoryResult<Vec<AuditRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stage_audit_log WHERE actor_id = ? ORDER BY created_at DESC, seq_no DESC LIMIT ?",
            AUDIT_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![actor_id, limit], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    /// 查询指定时间范围的记录 (最早在前)
    pub fn find_by_time_range(
        &self,
        start_time: NaiveDateTime,
        end_time: NaiveDateTime,
    ) -> RepositoryResult<Vec<AuditRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stage_audit_log WHERE created_at BETWEEN ? AND ? ORDER BY created_at ASC, seq_no ASC",
            AUDIT_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![start_time, end_time], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    /// 映射数据库行到 AuditRecord
    fn map_row(&self, row: &Row) -> SqliteResult<AuditRecord> {
        let process_data_str: Option<String> = row.get(7)?;
        let process_data = match process_data_str {
            Some(s) => serde_json::from_str::<ProcessData>(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e))
            })?,
            None => ProcessData::new(),
        };

        Ok(AuditRecord {
            audit_id: row.get(0)?,
            stage_instance_id: row.get(1)?,
            seq_no: row.get(2)?,
            from_status: enum_col(row, 3, "from_status", StageStatus::from_str)?,
            to_status: enum_col(row, 4, "to_status", StageStatus::from_str)?,
            actor_id: row.get(5)?,
            notes: row.get(6)?,
            process_data,
            created_at: row.get(8)?,
        })
    }
}
