// ==========================================
// 纺织生产流转引擎 - API层错误类型
// ==========================================
// 职责: 将引擎/仓储错误转换为调用方可读的错误, 每条都带显式原因
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("缺少原因说明: {0}")]
    MissingJustification(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 数量与台账错误 (调用方按类型采取不同动作)
    // ==========================================
    #[error("完工必须提供产出数量与次品数量: stage={0}")]
    MissingCompletionQuantities(String),

    #[error("数量守恒违反: produced={produced} + defect={defect} + loss={loss} > input={input}")]
    ConservationViolation {
        produced: f64,
        defect: f64,
        loss: f64,
        input: f64,
    },

    #[error("余额不足: lot={lot_number}, source={source_stage_instance_id}, requested={requested}, available={available}")]
    InsufficientBalance {
        lot_number: String,
        source_stage_instance_id: String,
        requested: f64,
        available: f64,
    },

    #[error("计量单位不一致: source={source_unit}, consumer={consumer_unit}")]
    UnitMismatch {
        source_unit: String,
        consumer_unit: String,
    },

    #[error("领用记录已退回: {0}")]
    AllocationAlreadyReleased(String),

    #[error("领用方已完工, 物料不可退回: allocation={allocation_entry_id}, consumer_status={consumer_status}")]
    AllocationLocked {
        allocation_entry_id: String,
        consumer_status: String,
    },

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("乐观锁冲突: {0}")]
    OptimisticLockFailure(String),

    #[error("并发冲突, 请重新读取后重试: {0}")]
    ConcurrencyConflict(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 调用方重新读取后可直接重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::OptimisticLockFailure(_) | ApiError::ConcurrencyConflict(_)
        )
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                stage_instance_id,
                expected,
                actual,
            } => ApiError::OptimisticLockFailure(format!(
                "工序{}已被其他用户修改（期望revision={}，实际revision={}）",
                stage_instance_id, expected, actual
            )),
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::SerializationError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidTransition { from, to, .. } => ApiError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            EngineError::MissingJustification { .. } => {
                ApiError::MissingJustification(err.to_string())
            }
            EngineError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            EngineError::ConcurrencyConflict(msg) => ApiError::ConcurrencyConflict(msg),
            EngineError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            EngineError::InvalidQuantity { .. } => ApiError::InvalidInput(err.to_string()),
            EngineError::MissingCompletionQuantities(stage_instance_id) => {
                ApiError::MissingCompletionQuantities(stage_instance_id)
            }
            EngineError::ConservationViolation {
                produced,
                defect,
                loss,
                input,
            } => ApiError::ConservationViolation {
                produced,
                defect,
                loss,
                input,
            },
            EngineError::InsufficientBalance {
                lot_number,
                source_stage_instance_id,
                requested,
                available,
            } => ApiError::InsufficientBalance {
                lot_number,
                source_stage_instance_id,
                requested,
                available,
            },
            EngineError::UnitMismatch {
                source_unit,
                consumer_unit,
            } => ApiError::UnitMismatch {
                source_unit: source_unit.to_string(),
                consumer_unit: consumer_unit.to_string(),
            },
            EngineError::AllocationAlreadyReleased(id) => ApiError::AllocationAlreadyReleased(id),
            EngineError::AllocationLocked {
                allocation_entry_id,
                consumer_status,
            } => ApiError::AllocationLocked {
                allocation_entry_id,
                consumer_status: consumer_status.to_string(),
            },
            EngineError::Repository(e) => e.into(),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ProcessType, StageStatus};

    #[test]
    fn test_repository_error_conversion() {
        let api_err: ApiError = RepositoryError::not_found("StageInstance", "S001").into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("StageInstance"));
                assert!(msg.contains("S001"));
            }
            _ => panic!("Expected NotFound"),
        }

        let api_err: ApiError = RepositoryError::OptimisticLockFailure {
            stage_instance_id: "S001".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(api_err.is_retryable());
        assert!(api_err.to_string().contains("已被其他用户修改"));
    }

    #[test]
    fn test_engine_error_conversion() {
        let api_err: ApiError = EngineError::InvalidTransition {
            stage_instance_id: "S001".to_string(),
            process_type: ProcessType::Dyeing,
            from: StageStatus::Completed,
            to: StageStatus::InProgress,
        }
        .into();
        match api_err {
            ApiError::InvalidStateTransition { from, to } => {
                assert_eq!(from, "completed");
                assert_eq!(to, "in_progress");
            }
            _ => panic!("Expected InvalidStateTransition"),
        }

        let api_err: ApiError = EngineError::InsufficientBalance {
            lot_number: "LOT-1".to_string(),
            source_stage_instance_id: "S001".to_string(),
            requested: 20.0,
            available: 15.0,
        }
        .into();
        match &api_err {
            ApiError::InsufficientBalance {
                requested,
                available,
                ..
            } => {
                assert_eq!(*requested, 20.0);
                assert_eq!(*available, 15.0);
            }
            _ => panic!("Expected InsufficientBalance"),
        }
        assert!(!api_err.is_retryable());

        let api_err: ApiError = EngineError::ConservationViolation {
            produced: 50.0,
            defect: 4.0,
            loss: 0.0,
            input: 50.0,
        }
        .into();
        assert!(matches!(
            api_err,
            ApiError::ConservationViolation { produced, input, .. } if produced == 50.0 && input == 50.0
        ));

        let api_err: ApiError = EngineError::AllocationLocked {
            allocation_entry_id: "A1".to_string(),
            consumer_status: StageStatus::Completed,
        }
        .into();
        match api_err {
            ApiError::AllocationLocked { consumer_status, .. } => {
                assert_eq!(consumer_status, "completed");
            }
            _ => panic!("Expected AllocationLocked"),
        }

        let api_err: ApiError = EngineError::ConcurrencyConflict("S001".to_string()).into();
        assert!(matches!(api_err, ApiError::ConcurrencyConflict(_)));
        assert!(api_err.is_retryable());
    }
}
