// ==========================================
// 纺织生产流转引擎 - 配置层
// ==========================================
// 职责: 引擎配置读取, 启动时生成不可变 EngineConfig
// 存储: config_kv 表 (scope_id = 'global')
// ==========================================

pub mod config_manager;

// 重导出核心配置管理器
pub use config_manager::{
    config_keys, is_valid_quantity_epsilon, ConfigManager, EngineConfig, MAX_QUANTITY_EPSILON,
};
