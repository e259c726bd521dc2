// ==========================================
// 纺织生产流转引擎 - API 层
// ==========================================
// 职责: 调用方入口, 边界校验 + 错误转换
// ==========================================

pub mod config_api;
pub mod error;
pub mod stage_flow_api;

// 重导出核心类型
pub use config_api::ConfigApi;
pub use error::{ApiError, ApiResult};
pub use stage_flow_api::{parse_process_data, StageFlowApi};
