// ==========================================
// 纺织生产流转引擎 - 工序流转 API
// ==========================================
// 职责: 调用方唯一入口; 在边界校验载荷 (ID/状态/工艺数据),
//       委托引擎执行, 并把引擎错误转换为 ApiError
// ==========================================

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::audit::{AuditRecord, ProcessData, ProcessValue};
use crate::domain::ledger::{LotLedgerEntry, SourceBalance};
use crate::domain::production_order::ProductionProgress;
use crate::domain::stage::{CompletionReport, NewStage, StageInstance};
use crate::domain::types::StageStatus;
use crate::engine::{
    LotMaterialLedger, ProductionOrderProgressAggregator, StageTransitionValidator,
    StatusChangeAuditLog, TransitionRequest,
};
use crate::repository::StageInstanceRepository;

/// 单次按操作人查询审计的上限
const MAX_AUDIT_QUERY_LIMIT: i32 = 1_000;

// ==========================================
// StageFlowApi - 工序流转 API
// ==========================================

/// 工序流转API
///
/// 职责：
/// 1. 工序登记与状态迁移 (含开工/完工/暂停/恢复/取消快捷操作)
/// 2. 批次物料领用/退回与余额查询
/// 3. 审计历史与订单进度查询
pub struct StageFlowApi {
    validator: Arc<StageTransitionValidator>,
    ledger: Arc<LotMaterialLedger>,
    audit_log: Arc<StatusChangeAuditLog>,
    progress_aggregator: Arc<ProductionOrderProgressAggregator>,
    stage_repo: Arc<StageInstanceRepository>,
}

impl StageFlowApi {
    pub fn new(
        validator: Arc<StageTransitionValidator>,
        ledger: Arc<LotMaterialLedger>,
        audit_log: Arc<StatusChangeAuditLog>,
        progress_aggregator: Arc<ProductionOrderProgressAggregator>,
        stage_repo: Arc<StageInstanceRepository>,
    ) -> Self {
        Self {
            validator,
            ledger,
            audit_log,
            progress_aggregator,
            stage_repo,
        }
    }

    // ==========================================
    // 工序登记与状态迁移
    // ==========================================

    /// 登记工序实例
    pub fn register_stage(&self, new_stage: NewStage) -> ApiResult<StageInstance> {
        debug!(lot_number = %new_stage.lot_number, process_type = %new_stage.process_type, "登记工序");
        if let Some(order_id) = &new_stage.production_order_id {
            ensure_id("production_order_id", order_id)?;
        }
        Ok(self.validator.register_stage(new_stage)?)
    }

    /// 请求状态迁移
    ///
    /// # 参数
    /// - stage_instance_id: 工序实例ID
    /// - to_status: 目标状态 (snake_case, 如 "on_hold")
    /// - actor_id: 操作人
    /// - notes: 原因说明
    /// - process_data: 工艺数据 (JSON 对象, 值只允许布尔/数字/字符串)
    pub fn request_transition(
        &self,
        stage_instance_id: &str,
        to_status: &str,
        actor_id: &str,
        notes: Option<String>,
        process_data: Option<&Value>,
    ) -> ApiResult<StageInstance> {
        let to_status = parse_status(to_status)?;
        self.transition(stage_instance_id, to_status, actor_id, notes, process_data, None)
    }

    /// 开工
    pub fn start(
        &self,
        stage_instance_id: &str,
        actor_id: &str,
        process_data: Option<&Value>,
    ) -> ApiResult<StageInstance> {
        self.transition(stage_instance_id, StageStatus::InProgress, actor_id, None, process_data, None)
    }

    /// 完工报工
    pub fn complete(
        &self,
        stage_instance_id: &str,
        actor_id: &str,
        notes: Option<String>,
        report: CompletionReport,
        process_data: Option<&Value>,
    ) -> ApiResult<StageInstance> {
        self.transition(
            stage_instance_id,
            StageStatus::Completed,
            actor_id,
            notes,
            process_data,
            Some(report),
        )
    }

    /// 暂停 (on_hold)
    pub fn hold(&self, stage_instance_id: &str, actor_id: &str, reason: &str) -> ApiResult<StageInstance> {
        self.transition(
            stage_instance_id,
            StageStatus::OnHold,
            actor_id,
            Some(reason.to_string()),
            None,
            None,
        )
    }

    /// 从停滞状态恢复加工
    pub fn resume(&self, stage_instance_id: &str, actor_id: &str, notes: Option<String>) -> ApiResult<StageInstance> {
        self.transition(stage_instance_id, StageStatus::InProgress, actor_id, notes, None, None)
    }

    /// 取消
    pub fn cancel(&self, stage_instance_id: &str, actor_id: &str, reason: &str) -> ApiResult<StageInstance> {
        self.transition(
            stage_instance_id,
            StageStatus::Cancelled,
            actor_id,
            Some(reason.to_string()),
            None,
            None,
        )
    }

    /// 当前可执行的目标状态
    pub fn allowed_actions(&self, stage_instance_id: &str) -> ApiResult<BTreeSet<StageStatus>> {
        ensure_id("stage_instance_id", stage_instance_id)?;
        Ok(self.validator.allowed_actions(stage_instance_id)?)
    }

    fn transition(
        &self,
        stage_instance_id: &str,
        to_status: StageStatus,
        actor_id: &str,
        notes: Option<String>,
        process_data: Option<&Value>,
        completion: Option<CompletionReport>,
    ) -> ApiResult<StageInstance> {
        ensure_id("stage_instance_id", stage_instance_id)?;
        ensure_id("actor_id", actor_id)?;
        let process_data = parse_process_data(process_data)?;

        let mut request = TransitionRequest::new(stage_instance_id, to_status, actor_id)
            .with_process_data(process_data);
        request.notes = notes;
        request.completion = completion;

        Ok(self.validator.request_transition(request)?)
    }

    // ==========================================
    // 批次物料台账
    // ==========================================

    /// 领用
    pub fn allocate(
        &self,
        lot_number: &str,
        source_stage_instance_id: &str,
        consuming_stage_instance_id: &str,
        quantity: f64,
    ) -> ApiResult<LotLedgerEntry> {
        ensure_id("lot_number", lot_number)?;
        ensure_id("source_stage_instance_id", source_stage_instance_id)?;
        ensure_id("consuming_stage_instance_id", consuming_stage_instance_id)?;

        self.ledger
            .allocate(lot_number, source_stage_instance_id, consuming_stage_instance_id, quantity)
            .map_err(ApiError::from)
    }

    /// 退回领用
    pub fn release(&self, allocation_entry_id: &str) -> ApiResult<LotLedgerEntry> {
        ensure_id("allocation_entry_id", allocation_entry_id)?;
        Ok(self.ledger.release(allocation_entry_id)?)
    }

    /// 产出方可用余额
    pub fn available_balance(&self, lot_number: &str, source_stage_instance_id: &str) -> ApiResult<f64> {
        ensure_id("lot_number", lot_number)?;
        ensure_id("source_stage_instance_id", source_stage_instance_id)?;
        Ok(self.ledger.available_balance(lot_number, source_stage_instance_id)?)
    }

    /// 批次可用量一览
    pub fn lot_availability(&self, lot_number: &str) -> ApiResult<Vec<SourceBalance>> {
        ensure_id("lot_number", lot_number)?;
        Ok(self.ledger.lot_availability(lot_number)?)
    }

    /// 批次台账流水
    pub fn ledger_entries(&self, lot_number: &str) -> ApiResult<Vec<LotLedgerEntry>> {
        ensure_id("lot_number", lot_number)?;
        Ok(self.ledger.entries(lot_number)?)
    }

    // ==========================================
    // 查询接口
    // ==========================================

    /// 订单进度
    pub fn progress(&self, production_order_id: &str) -> ApiResult<ProductionProgress> {
        ensure_id("production_order_id", production_order_id)?;
        Ok(self.progress_aggregator.progress(production_order_id)?)
    }

    /// 工序状态历史 (最早在前)
    pub fn history(&self, stage_instance_id: &str) -> ApiResult<Vec<AuditRecord>> {
        ensure_id("stage_instance_id", stage_instance_id)?;
        Ok(self.audit_log.history(stage_instance_id)?)
    }

    /// 操作人最近的审计记录
    pub fn audit_by_actor(&self, actor_id: &str, limit: i32) -> ApiResult<Vec<AuditRecord>> {
        ensure_id("actor_id", actor_id)?;
        if limit <= 0 || limit > MAX_AUDIT_QUERY_LIMIT {
            return Err(ApiError::InvalidInput(format!(
                "limit 必须在 1..={} 之间",
                MAX_AUDIT_QUERY_LIMIT
            )));
        }
        Ok(self.audit_log.by_actor(actor_id, limit)?)
    }

    /// 时间范围内的审计记录
    pub fn audit_between(&self, start_time: NaiveDateTime, end_time: NaiveDateTime) -> ApiResult<Vec<AuditRecord>> {
        Ok(self.audit_log.between(start_time, end_time)?)
    }

    /// 查询单个工序
    pub fn get_stage(&self, stage_instance_id: &str) -> ApiResult<StageInstance> {
        ensure_id("stage_instance_id", stage_instance_id)?;
        self.stage_repo
            .find_by_id(stage_instance_id)?
            .ok_or_else(|| ApiError::NotFound(format!("StageInstance(id={})不存在", stage_instance_id)))
    }

    /// 批次下的全部工序
    pub fn stages_by_lot(&self, lot_number: &str) -> ApiResult<Vec<StageInstance>> {
        ensure_id("lot_number", lot_number)?;
        Ok(self.stage_repo.find_by_lot(lot_number)?)
    }

    /// 订单下的全部工序
    pub fn stages_by_order(&self, production_order_id: &str) -> ApiResult<Vec<StageInstance>> {
        ensure_id("production_order_id", production_order_id)?;
        Ok(self.stage_repo.find_by_order(production_order_id)?)
    }
}

// ==========================================
// 边界校验
// ==========================================

fn ensure_id(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{} 不能为空", field)));
    }
    Ok(())
}

fn parse_status(raw: &str) -> ApiResult<StageStatus> {
    StageStatus::from_str(raw.trim())
        .ok_or_else(|| ApiError::InvalidInput(format!("未知的工序状态: {}", raw)))
}

/// 工艺数据校验: 必须是 JSON 对象, 值只允许布尔/数字/字符串
pub fn parse_process_data(value: Option<&Value>) -> ApiResult<ProcessData> {
    let object = match value {
        None | Some(Value::Null) => return Ok(ProcessData::new()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(ApiError::InvalidInput(format!(
                "process_data 必须是 JSON 对象, 实际为: {}",
                other
            )))
        }
    };

    let mut data = ProcessData::new();
    for (key, raw) in object {
        let key = key.trim();
        if key.is_empty() {
            return Err(ApiError::InvalidInput("process_data 键不能为空".to_string()));
        }
        let value = match raw {
            Value::Bool(b) => ProcessValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ProcessValue::Integer(i),
                None => match n.as_f64() {
                    Some(f) => ProcessValue::Number(f),
                    None => {
                        return Err(ApiError::InvalidInput(format!(
                            "process_data.{} 数值超出范围",
                            key
                        )))
                    }
                },
            },
            Value::String(s) => ProcessValue::Text(s.clone()),
            Value::Null | Value::Array(_) | Value::Object(_) => {
                warn!(key, "process_data 包含非基本类型的值");
                return Err(ApiError::InvalidInput(format!(
                    "process_data.{} 只允许布尔/数字/字符串",
                    key
                )));
            }
        };
        data.insert(key.to_string(), value);
    }
    Ok(data)
}
