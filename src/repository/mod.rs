// ==========================================
// 纺织生产流转引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod audit_repo;
pub mod error;
pub mod ledger_repo;
pub mod production_order_repo;
mod row_utils;
pub mod stage_repo;

// 重导出核心仓储
pub use audit_repo::StageAuditRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use ledger_repo::{AllocationOutcome, LotLedgerRepository};
pub use production_order_repo::ProductionOrderRepository;
pub use stage_repo::StageInstanceRepository;
