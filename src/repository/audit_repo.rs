// ==========================================
// 纺织生产流转引擎 - 状态变更审计仓储
// ==========================================
// 对齐: stage_audit_log 表
// 红线: 只追加; 不提供 UPDATE / DELETE
// ==========================================

mod core;
mod queries;


pub use core::StageAuditRepository;
