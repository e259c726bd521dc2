// ==========================================
// 纺织生产流转引擎 - 应用状态
// ==========================================
// 职责: 从数据库路径装配仓储/引擎/API, 作为进程级共享状态
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{ConfigApi, StageFlowApi};
use crate::config::{ConfigManager, EngineConfig};
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::{
    LotMaterialLedger, ProductionOrderProgressAggregator, StageTransitionValidator,
    StageWorkflowCatalog, StatusChangeAuditLog,
};
use crate::repository::{
    LotLedgerRepository, ProductionOrderRepository, StageAuditRepository,
    StageInstanceRepository,
};

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 工序流转API
    pub stage_flow_api: Arc<StageFlowApi>,

    /// 配置管理API
    pub config_api: Arc<ConfigApi>,

    /// 启动时加载的引擎配置 (只读)
    pub engine_config: EngineConfig,

    /// 状态迁移目录 (只读)
    pub catalog: Arc<StageWorkflowCatalog>,

    /// 生产订单仓储 (供订单所属方同步数据)
    pub production_order_repo: Arc<ProductionOrderRepository>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 数据库无法打开, 或迁移目录自检失败
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库初始化失败: {}", e))?;

        Self::from_connection(db_path, Arc::new(Mutex::new(conn)))
    }

    /// 从已初始化的连接装配
    pub fn from_connection(db_path: String, conn: Arc<Mutex<Connection>>) -> Result<Self, String> {
        // ==========================================
        // 配置与迁移目录
        // ==========================================
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let engine_config = config_manager
            .load_engine_config()
            .map_err(|e| format!("无法加载引擎配置: {}", e))?;
        tracing::info!(?engine_config, "引擎配置已加载");

        let catalog = Arc::new(
            StageWorkflowCatalog::standard()
                .map_err(|e| format!("状态迁移目录自检失败: {}", e))?,
        );

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let stage_repo = Arc::new(StageInstanceRepository::new(conn.clone()));
        let ledger_repo = Arc::new(LotLedgerRepository::new(conn.clone()));
        let audit_repo = Arc::new(StageAuditRepository::new(conn.clone()));
        let production_order_repo = Arc::new(ProductionOrderRepository::new(conn));

        // ==========================================
        // 初始化Engine层
        // ==========================================
        let ledger = Arc::new(LotMaterialLedger::new(
            ledger_repo,
            stage_repo.clone(),
            engine_config.clone(),
        ));
        let audit_log = Arc::new(StatusChangeAuditLog::new(audit_repo));
        let validator = Arc::new(StageTransitionValidator::new(
            catalog.clone(),
            stage_repo.clone(),
            ledger.clone(),
            audit_log.clone(),
            engine_config.clone(),
        ));
        let progress_aggregator = Arc::new(ProductionOrderProgressAggregator::new(
            production_order_repo.clone(),
            stage_repo.clone(),
        ));

        // ==========================================
        // 初始化API层
        // ==========================================
        let stage_flow_api = Arc::new(StageFlowApi::new(
            validator,
            ledger,
            audit_log,
            progress_aggregator,
            stage_repo,
        ));
        let config_api = Arc::new(ConfigApi::new(config_manager));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            stage_flow_api,
            config_api,
            engine_config,
            catalog,
            production_order_repo,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 TEXTILE_FLOW_DB_PATH → 用户数据目录 → 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("TEXTILE_FLOW_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./textile_flow.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发环境使用独立目录，避免污染生产数据
        #[cfg(debug_assertions)]
        let dir = data_dir.join("textile-flow-dev");

        #[cfg(not(debug_assertions))]
        let dir = data_dir.join("textile-flow");

        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("textile_flow.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_from_in_memory_connection() {
        let conn = crate::db::open_in_memory().unwrap();
        let state = AppState::from_connection(":memory:".to_string(), Arc::new(Mutex::new(conn))).unwrap();
        assert_eq!(state.engine_config, EngineConfig::default());
        assert!(state.stage_flow_api.stages_by_lot("LOT-404").unwrap().is_empty());
    }
}
