// ==========================================
// 纺织生产流转引擎 - 引擎层
// ==========================================
// 职责: 迁移规则 / 物料台账 / 审计 / 进度汇总
// 红线: Engine 不拼 SQL, 所有拒绝都返回带原因的错误
// ==========================================

pub mod audit_log;
pub mod error;
pub mod ledger;
pub mod progress;
pub mod transition;
pub mod workflow_catalog;

// 重导出核心引擎
pub use audit_log::StatusChangeAuditLog;
pub use error::{CatalogError, EngineError, EngineResult};
pub use ledger::LotMaterialLedger;
pub use progress::{compute_progress, ProductionOrderProgressAggregator};
pub use transition::{StageTransitionValidator, TransitionRequest};
pub use workflow_catalog::{StageWorkflowCatalog, StatusTransitions, TransitionTable};
