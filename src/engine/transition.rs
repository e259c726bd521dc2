// ==========================================
// 纺织生产流转引擎 - 状态迁移校验器
// ==========================================
// 职责: 查目录判定迁移是否合法, 校验原因说明/完工数量,
//       推导时间戳, 并与审计/台账记录同事务提交
// 红线: 任何失败路径都不留下部分状态
// 并发: 同一实例的两次迁移不能从同一起始状态同时成功 (revision 乐观锁)
// ==========================================

use crate::config::EngineConfig;
use crate::domain::audit::ProcessData;
use crate::domain::ledger::LotLedgerEntry;
use crate::domain::stage::{CompletionReport, NewStage, StageInstance};
use crate::domain::types::StageStatus;
use crate::engine::audit_log::StatusChangeAuditLog;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::LotMaterialLedger;
use crate::engine::workflow_catalog::StageWorkflowCatalog;
use crate::repository::{RepositoryError, StageInstanceRepository};
use chrono::{NaiveDateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ==========================================
// TransitionRequest - 迁移请求
// ==========================================
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub stage_instance_id: String,
    pub to_status: StageStatus,
    pub actor_id: String,
    pub notes: Option<String>,
    pub process_data: ProcessData,
    pub completion: Option<CompletionReport>, // 仅 to_status = completed 时使用
}

impl TransitionRequest {
    pub fn new(
        stage_instance_id: impl Into<String>,
        to_status: StageStatus,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            stage_instance_id: stage_instance_id.into(),
            to_status,
            actor_id: actor_id.into(),
            notes: None,
            process_data: ProcessData::new(),
            completion: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_process_data(mut self, process_data: ProcessData) -> Self {
        self.process_data = process_data;
        self
    }

    pub fn with_completion(mut self, completion: CompletionReport) -> Self {
        self.completion = Some(completion);
        self
    }
}

// ==========================================
// StageTransitionValidator - 状态迁移校验器
// ==========================================
pub struct StageTransitionValidator {
    catalog: Arc<StageWorkflowCatalog>,
    stage_repo: Arc<StageInstanceRepository>,
    ledger: Arc<LotMaterialLedger>,
    audit_log: Arc<StatusChangeAuditLog>,
    config: EngineConfig,
}

impl StageTransitionValidator {
    pub fn new(
        catalog: Arc<StageWorkflowCatalog>,
        stage_repo: Arc<StageInstanceRepository>,
        ledger: Arc<LotMaterialLedger>,
        audit_log: Arc<StatusChangeAuditLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            stage_repo,
            ledger,
            audit_log,
            config,
        }
    }

    // ==========================================
    // 登记工序
    // ==========================================

    /// 登记新的工序实例 (状态 pending, revision 0)
    pub fn register_stage(&self, new_stage: NewStage) -> EngineResult<StageInstance> {
        if new_stage.lot_number.trim().is_empty() {
            return Err(EngineError::InvalidInput("批次号不能为空".to_string()));
        }
        if !new_stage.input_quantity.is_finite() || new_stage.input_quantity < 0.0 {
            return Err(EngineError::InvalidQuantity {
                field: "input_quantity".to_string(),
                value: new_stage.input_quantity,
            });
        }
        if let (Some(start), Some(end)) = (new_stage.planned_start_time, new_stage.planned_end_time) {
            if end < start {
                return Err(EngineError::InvalidInput(
                    "计划结束时间不能早于计划开始时间".to_string(),
                ));
            }
        }

        let now = now();
        let stage = StageInstance {
            stage_instance_id: Uuid::new_v4().to_string(),
            lot_number: new_stage.lot_number.trim().to_string(),
            production_order_id: new_stage.production_order_id,
            process_type: new_stage.process_type,
            stage_number: new_stage.stage_number,
            status: StageStatus::Pending,
            planned_start_time: new_stage.planned_start_time,
            planned_end_time: new_stage.planned_end_time,
            actual_start_time: None,
            actual_end_time: None,
            quantity_unit: new_stage
                .quantity_unit
                .unwrap_or(self.config.default_quantity_unit),
            input_quantity: new_stage.input_quantity,
            produced_quantity: None,
            defect_quantity: None,
            loss_quantity: None,
            quality_grade: None,
            quality_notes: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        self.stage_repo
            .insert(&stage)
            .map_err(EngineError::from_repository)?;

        info!(
            stage_instance_id = %stage.stage_instance_id,
            lot_number = %stage.lot_number,
            process_type = %stage.process_type,
            stage_number = stage.stage_number,
            "工序登记完成"
        );
        Ok(stage)
    }

    // ==========================================
    // 状态迁移
    // ==========================================

    /// 请求一次状态迁移
    ///
    /// # 返回
    /// - `Ok(StageInstance)`: 已提交的实例 (含新 revision 与时间戳)
    /// - `Err(InvalidTransition)`: 目标不可达, 或并发写入后已不可达
    /// - `Err(ConcurrencyConflict)`: 并发写入但仍可达, 重新读取后重试即可
    pub fn request_transition(&self, request: TransitionRequest) -> EngineResult<StageInstance> {
        let result = self.try_transition(&request);
        if let Err(err) = &result {
            warn!(
                stage_instance_id = %request.stage_instance_id,
                to = %request.to_status,
                actor_id = %request.actor_id,
                error = %err,
                "状态迁移被拒绝"
            );
        }
        result
    }

    fn try_transition(&self, request: &TransitionRequest) -> EngineResult<StageInstance> {
        if request.actor_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("actor_id 不能为空".to_string()));
        }

        let before = self.load_stage(&request.stage_instance_id)?;
        let from = before.status;
        let to = request.to_status;

        // 1. 合法性 (to == from 永不在后继集合内)
        if !self.catalog.is_allowed(before.process_type, from, to) {
            return Err(invalid_transition(&before, to));
        }

        // 2. 原因说明
        let notes = normalize_notes(request.notes.as_deref());
        if notes.is_none() && self.requires_justification(from, to) {
            return Err(EngineError::MissingJustification { from, to });
        }

        if request.completion.is_some() && to != StageStatus::Completed {
            return Err(EngineError::InvalidInput(format!(
                "只有迁移到 completed 时才能提交完工数量 (目标: {})",
                to
            )));
        }

        let now = now();
        let mut after = before.clone();
        after.status = to;
        after.updated_at = now;
        apply_timing(&mut after, now);

        let mut ledger_entries: Vec<LotLedgerEntry> = Vec::new();

        // 3. 完工: 数量校验 + 守恒 + 产出记录
        if to == StageStatus::Completed {
            let report = request
                .completion
                .as_ref()
                .ok_or_else(|| EngineError::MissingCompletionQuantities(before.stage_instance_id.clone()))?;
            self.apply_completion(&mut after, report)?;
            let produced = after.produced_quantity.unwrap_or(0.0);
            ledger_entries.push(self.ledger.production_entry(&after, produced, now)?);
        }

        // 4. 取消: 退回未退回的领用
        if to == StageStatus::Cancelled && self.config.auto_release_on_cancel {
            let outstanding = self.ledger.outstanding_allocations(&before.stage_instance_id)?;
            let returned: f64 = outstanding.iter().map(|a| a.quantity).sum();
            for allocation in &outstanding {
                ledger_entries.push(self.ledger.release_entry(allocation, now));
            }
            after.input_quantity = (after.input_quantity - returned).max(0.0);
            if !outstanding.is_empty() {
                debug!(
                    stage_instance_id = %before.stage_instance_id,
                    released = outstanding.len(),
                    quantity = returned,
                    "取消工序, 退回领用"
                );
            }
        }

        // 5. 审计记录与提交
        let audit = self.audit_log.prepare(
            &before,
            to,
            request.actor_id.trim(),
            notes,
            request.process_data.clone(),
            now,
        );

        let committed = match self.stage_repo.commit_transition(&after, &audit, &ledger_entries) {
            Ok(stage) => stage,
            Err(RepositoryError::OptimisticLockFailure { .. }) => {
                return Err(self.resolve_stale_write(&before, to));
            }
            Err(e) => return Err(EngineError::from_repository(e)),
        };

        info!(
            stage_instance_id = %committed.stage_instance_id,
            lot_number = %committed.lot_number,
            process_type = %committed.process_type,
            from = %from,
            to = %to,
            actor_id = %audit.actor_id,
            revision = committed.revision,
            ledger_entries = ledger_entries.len(),
            "状态迁移已提交"
        );
        Ok(committed)
    }

    /// 当前状态的合法后继
    pub fn allowed_actions(&self, stage_instance_id: &str) -> EngineResult<BTreeSet<StageStatus>> {
        let stage = self.load_stage(stage_instance_id)?;
        Ok(self
            .catalog
            .allowed_next_statuses(stage.process_type, stage.status))
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    fn requires_justification(&self, from: StageStatus, to: StageStatus) -> bool {
        if from == StageStatus::Pending && to == StageStatus::InProgress {
            return false;
        }
        self.config.strict_justification || to.is_rejection_class()
    }

    /// 完工数量校验: 必填 → 非负有限 → 守恒
    fn apply_completion(&self, stage: &mut StageInstance, report: &CompletionReport) -> EngineResult<()> {
        let (Some(produced), Some(defect)) = (report.produced_quantity, report.defect_quantity) else {
            return Err(EngineError::MissingCompletionQuantities(
                stage.stage_instance_id.clone(),
            ));
        };
        let loss = report.loss_quantity.unwrap_or(0.0);

        for (field, value) in [
            ("produced_quantity", produced),
            ("defect_quantity", defect),
            ("loss_quantity", loss),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidQuantity {
                    field: field.to_string(),
                    value,
                });
            }
        }

        if produced + defect + loss > stage.input_quantity + self.config.quantity_epsilon {
            return Err(EngineError::ConservationViolation {
                produced,
                defect,
                loss,
                input: stage.input_quantity,
            });
        }

        stage.produced_quantity = Some(produced);
        stage.defect_quantity = Some(defect);
        stage.loss_quantity = report.loss_quantity;
        stage.quality_grade = report.quality_grade;
        stage.quality_notes = normalize_notes(report.quality_notes.as_deref());
        Ok(())
    }

    /// 乐观锁失败后重新读取: 已不可达 → InvalidTransition, 否则 ConcurrencyConflict
    fn resolve_stale_write(&self, before: &StageInstance, to: StageStatus) -> EngineError {
        match self.stage_repo.find_by_id(&before.stage_instance_id) {
            Ok(Some(current)) if !self.catalog.is_allowed(current.process_type, current.status, to) => {
                invalid_transition(&current, to)
            }
            Ok(Some(current)) => EngineError::ConcurrencyConflict(format!(
                "工序 {} 已被并发修改 (revision {} → {})",
                current.stage_instance_id, before.revision, current.revision
            )),
            Ok(None) => EngineError::not_found("StageInstance", &before.stage_instance_id),
            Err(e) => EngineError::from_repository(e),
        }
    }

    fn load_stage(&self, stage_instance_id: &str) -> EngineResult<StageInstance> {
        self.stage_repo
            .find_by_id(stage_instance_id)
            .map_err(EngineError::from_repository)?
            .ok_or_else(|| EngineError::not_found("StageInstance", stage_instance_id))
    }
}

/// 时间戳推导
///
/// - 进入 in_progress: 未开始则记开始时间, 清除上一次的结束时间
/// - 进入结束类状态: 未结束则记结束时间
fn apply_timing(stage: &mut StageInstance, now: NaiveDateTime) {
    if stage.status == StageStatus::InProgress {
        if stage.actual_start_time.is_none() {
            stage.actual_start_time = Some(now);
        }
        stage.actual_end_time = None;
    }
    if stage.status.is_end_class() && stage.actual_end_time.is_none() {
        stage.actual_end_time = Some(now);
    }
}

fn normalize_notes(notes: Option<&str>) -> Option<String> {
    notes
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

fn invalid_transition(stage: &StageInstance, to: StageStatus) -> EngineError {
    EngineError::InvalidTransition {
        stage_instance_id: stage.stage_instance_id.clone(),
        process_type: stage.process_type,
        from: stage.status,
        to,
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
