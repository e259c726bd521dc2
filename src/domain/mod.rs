// ==========================================
// 纺织生产流转引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod audit;
pub mod ledger;
pub mod production_order;
pub mod stage;
pub mod types;

// 重导出核心类型
pub use audit::{AuditRecord, ProcessData, ProcessValue};
pub use ledger::{LotLedgerEntry, SourceBalance};
pub use production_order::{CurrentStage, ProductionOrder, ProductionProgress};
pub use stage::{CompletionReport, NewStage, StageInstance};
pub use types::{LedgerEntryKind, ProcessType, QualityGrade, QuantityUnit, StageStatus};
