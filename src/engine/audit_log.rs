// ==========================================
// 纺织生产流转引擎 - 状态变更审计日志
// ==========================================
// 红线: 只追加; 不存在修改/删除操作
// "撤销"必须建模为新的正向迁移, 不能编辑日志
// ==========================================

use crate::domain::audit::{AuditRecord, ProcessData};
use crate::domain::stage::StageInstance;
use crate::domain::types::StageStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::StageAuditRepository;
use chrono::NaiveDateTime;
use std::sync::Arc;
use uuid::Uuid;

pub struct StatusChangeAuditLog {
    audit_repo: Arc<StageAuditRepository>,
}

impl StatusChangeAuditLog {
    pub fn new(audit_repo: Arc<StageAuditRepository>) -> Self {
        Self { audit_repo }
    }

    /// 为一次迁移构造审计记录 (由迁移提交事务写入)
    ///
    /// seq_no 取迁移后的 revision, 保证实例内严格递增
    pub fn prepare(
        &self,
        before: &StageInstance,
        to_status: StageStatus,
        actor_id: &str,
        notes: Option<String>,
        process_data: ProcessData,
        at: NaiveDateTime,
    ) -> AuditRecord {
        AuditRecord {
            audit_id: Uuid::new_v4().to_string(),
            stage_instance_id: before.stage_instance_id.clone(),
            seq_no: before.revision + 1,
            from_status: before.status,
            to_status,
            actor_id: actor_id.to_string(),
            notes,
            process_data,
            created_at: at,
        }
    }

    /// 实例的完整状态历史, 最早在前; 每次调用重新读取
    pub fn history(&self, stage_instance_id: &str) -> EngineResult<Vec<AuditRecord>> {
        self.audit_repo
            .find_by_stage(stage_instance_id)
            .map_err(EngineError::from_repository)
    }

    /// 操作人最近的记录
    pub fn by_actor(&self, actor_id: &str, limit: i32) -> EngineResult<Vec<AuditRecord>> {
        self.audit_repo
            .find_by_actor(actor_id, limit)
            .map_err(EngineError::from_repository)
    }

    /// 时间范围内的记录
    pub fn between(
        &self,
        start_time: NaiveDateTime,
        end_time: NaiveDateTime,
    ) -> EngineResult<Vec<AuditRecord>> {
        if end_time < start_time {
            return Err(EngineError::InvalidInput(
                "结束时间不能早于开始时间".to_string(),
            ));
        }
        self.audit_repo
            .find_by_time_range(start_time, end_time)
            .map_err(EngineError::from_repository)
    }
}
