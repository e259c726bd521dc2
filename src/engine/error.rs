// ==========================================
// 纺织生产流转引擎 - 引擎层错误类型
// ==========================================
// 除 CatalogError 外均为"操作被拒绝", 不会导致进程退出,
// 且失败路径不留下任何部分状态
// ==========================================

use crate::domain::types::{ProcessType, QuantityUnit, StageStatus};
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 迁移规则 =====
    #[error("无效的状态转换: stage={stage_instance_id}, process_type={process_type}, from={from} to={to}")]
    InvalidTransition {
        stage_instance_id: String,
        process_type: ProcessType,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("缺少原因说明: 迁移 {from} → {to} 必须填写备注")]
    MissingJustification { from: StageStatus, to: StageStatus },

    #[error("完工必须提供产出数量与次品数量: stage={0}")]
    MissingCompletionQuantities(String),

    // ===== 数量守恒 =====
    #[error("数量守恒违反: produced={produced} + defect={defect} + loss={loss} > input={input}")]
    ConservationViolation {
        produced: f64,
        defect: f64,
        loss: f64,
        input: f64,
    },

    #[error("数量非法 ({field}): {value}")]
    InvalidQuantity { field: String, value: f64 },

    // ===== 台账 =====
    #[error("余额不足: lot={lot_number}, source={source_stage_instance_id}, requested={requested}, available={available}")]
    InsufficientBalance {
        lot_number: String,
        source_stage_instance_id: String,
        requested: f64,
        available: f64,
    },

    #[error("计量单位不一致: source={source_unit}, consumer={consumer_unit}")]
    UnitMismatch {
        source_unit: QuantityUnit,
        consumer_unit: QuantityUnit,
    },

    #[error("领用记录已退回: {0}")]
    AllocationAlreadyReleased(String),

    #[error("领用方已完工, 物料不可退回: allocation={allocation_entry_id}, consumer_status={consumer_status}")]
    AllocationLocked {
        allocation_entry_id: String,
        consumer_status: StageStatus,
    },

    // ===== 通用 =====
    #[error("资源未找到: {entity}(id={id})")]
    NotFound { entity: String, id: String },

    #[error("并发冲突, 请重新读取后重试: {0}")]
    ConcurrencyConflict(String),

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 调用方可"重新读取后重试"的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict(_))
    }

    /// 仓储错误归一: 乐观锁/唯一约束 → 并发冲突, 记录缺失 → NotFound
    pub(crate) fn from_repository(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure { .. }
            | RepositoryError::UniqueConstraintViolation(_) => {
                EngineError::ConcurrencyConflict(err.to_string())
            }
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Repository(other),
        }
    }
}

/// 引擎 Result 别名
pub type EngineResult<T> = Result<T, EngineError>;

/// 状态迁移表自检错误 (启动期致命)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("工序 {process_type} 的迁移表缺少 pending 起始状态")]
    MissingPendingKey { process_type: ProcessType },

    #[error("工序 {process_type} 的迁移表中 {from} → {to} 的目标状态未作为键出现")]
    UnknownTargetStatus {
        process_type: ProcessType,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("工序 {process_type} 的迁移表包含自迁移: {status} → {status}")]
    SelfTransition {
        process_type: ProcessType,
        status: StageStatus,
    },

    #[error("工序 {process_type} 没有迁移表")]
    MissingProcessType { process_type: ProcessType },
}
