// ==========================================
// 纺织生产流转引擎 - 核心库
// ==========================================
// 职责: 工序状态机 / 批次物料台账 / 状态变更审计 / 订单进度
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 引擎配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 调用方入口
pub mod api;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{LedgerEntryKind, ProcessType, QualityGrade, QuantityUnit, StageStatus};

// 领域实体
pub use domain::{
    AuditRecord, CompletionReport, LotLedgerEntry, NewStage, ProcessData, ProcessValue,
    ProductionOrder, ProductionProgress, SourceBalance, StageInstance,
};

// 引擎
pub use engine::{
    EngineError, EngineResult, LotMaterialLedger, ProductionOrderProgressAggregator,
    StageTransitionValidator, StageWorkflowCatalog, StatusChangeAuditLog, TransitionRequest,
};

// API
pub use api::{ApiError, ApiResult, ConfigApi, StageFlowApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "纺织生产流转引擎";
