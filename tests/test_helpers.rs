// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、引擎装配、常用工序操作
// ==========================================
#![allow(dead_code)]

use std::error::Error;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tempfile::NamedTempFile;

use textile_flow::config::{ConfigManager, EngineConfig};
use textile_flow::db::{init_schema, open_sqlite_connection};
use textile_flow::domain::stage::{CompletionReport, NewStage, StageInstance};
use textile_flow::domain::types::{ProcessType, StageStatus};
use textile_flow::engine::{
    LotMaterialLedger, ProductionOrderProgressAggregator, StageTransitionValidator,
    StageWorkflowCatalog, StatusChangeAuditLog, TransitionRequest,
};
use textile_flow::repository::{
    LotLedgerRepository, ProductionOrderRepository, StageAuditRepository,
    StageInstanceRepository,
};

pub const ACTOR: &str = "operator_01";

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是合法 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

// ==========================================
// TestEngine - 引擎层装配
// ==========================================

pub struct TestEngine {
    pub conn: Arc<Mutex<Connection>>,
    pub config: EngineConfig,
    pub stage_repo: Arc<StageInstanceRepository>,
    pub order_repo: Arc<ProductionOrderRepository>,
    pub validator: Arc<StageTransitionValidator>,
    pub ledger: Arc<LotMaterialLedger>,
    pub audit_log: Arc<StatusChangeAuditLog>,
    pub progress: Arc<ProductionOrderProgressAggregator>,
}

/// 默认配置的引擎 (临时文件数据库)
pub fn setup_engine() -> (NamedTempFile, TestEngine) {
    setup_engine_with(|_| {})
}

/// 先写入配置再装配引擎
pub fn setup_engine_with(configure: impl FnOnce(&ConfigManager)) -> (NamedTempFile, TestEngine) {
    let (temp_file, db_path) = create_test_db().unwrap();
    let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path).unwrap()));

    let config_manager = ConfigManager::from_connection(conn.clone());
    configure(&config_manager);
    let config = config_manager.load_engine_config().unwrap();

    let catalog = Arc::new(StageWorkflowCatalog::standard().unwrap());
    let stage_repo = Arc::new(StageInstanceRepository::new(conn.clone()));
    let order_repo = Arc::new(ProductionOrderRepository::new(conn.clone()));
    let ledger = Arc::new(LotMaterialLedger::new(
        Arc::new(LotLedgerRepository::new(conn.clone())),
        stage_repo.clone(),
        config.clone(),
    ));
    let audit_log = Arc::new(StatusChangeAuditLog::new(Arc::new(StageAuditRepository::new(
        conn.clone(),
    ))));
    let validator = Arc::new(StageTransitionValidator::new(
        catalog,
        stage_repo.clone(),
        ledger.clone(),
        audit_log.clone(),
        config.clone(),
    ));
    let progress = Arc::new(ProductionOrderProgressAggregator::new(
        order_repo.clone(),
        stage_repo.clone(),
    ));

    (
        temp_file,
        TestEngine {
            conn,
            config,
            stage_repo,
            order_repo,
            validator,
            ledger,
            audit_log,
            progress,
        },
    )
}

impl TestEngine {
    /// 登记工序
    pub fn register(&self, lot: &str, process_type: ProcessType, stage_number: i32, input: f64) -> StageInstance {
        self.validator
            .register_stage(NewStage::new(lot, process_type, stage_number).with_input(input))
            .unwrap()
    }

    /// 迁移 (带备注)
    pub fn move_to(&self, stage_id: &str, to: StageStatus, notes: &str) -> StageInstance {
        self.validator
            .request_transition(TransitionRequest::new(stage_id, to, ACTOR).with_notes(notes))
            .unwrap()
    }

    /// 开工
    pub fn start(&self, stage_id: &str) -> StageInstance {
        self.validator
            .request_transition(TransitionRequest::new(stage_id, StageStatus::InProgress, ACTOR))
            .unwrap()
    }

    /// 完工报工
    pub fn complete(&self, stage_id: &str, produced: f64, defect: f64) -> StageInstance {
        self.validator
            .request_transition(
                TransitionRequest::new(stage_id, StageStatus::Completed, ACTOR)
                    .with_notes("完工")
                    .with_completion(CompletionReport::new(produced, defect)),
            )
            .unwrap()
    }

    /// 登记 → 开工 → 完工
    pub fn produced_stage(
        &self,
        lot: &str,
        process_type: ProcessType,
        stage_number: i32,
        input: f64,
        produced: f64,
        defect: f64,
    ) -> StageInstance {
        let stage = self.register(lot, process_type, stage_number, input);
        self.start(&stage.stage_instance_id);
        self.complete(&stage.stage_instance_id, produced, defect)
    }

    pub fn reload(&self, stage_id: &str) -> StageInstance {
        self.stage_repo.find_by_id(stage_id).unwrap().unwrap()
    }
}
