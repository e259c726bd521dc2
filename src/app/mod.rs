// ==========================================
// 纺织生产流转引擎 - 应用层
// ==========================================
// 职责: 装配各层, 提供默认数据库路径
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
