// ==========================================
// 纺织生产流转引擎 - 主入口
// ==========================================
// 启动流程: 日志 (TEXTILE_FLOW_LOG_FORMAT=json 输出 JSON 行) → 数据库 → 配置 → 迁移目录自检
// 自检失败或数据库无法打开时以非零码退出
// ==========================================

use std::process::ExitCode;

use textile_flow::app::{get_default_db_path, AppState};
use textile_flow::domain::types::ProcessType;

fn main() -> ExitCode {
    textile_flow::logging::init_from_env();

    tracing::info!("==================================================");
    tracing::info!("{}", textile_flow::APP_NAME);
    tracing::info!("系统版本: {}", textile_flow::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let app_state = match AppState::new(db_path) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("启动失败: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for process_type in ProcessType::ALL {
        let statuses = app_state.catalog.statuses(process_type);
        let terminal: Vec<String> = statuses
            .iter()
            .filter(|s| app_state.catalog.is_terminal(process_type, **s))
            .map(|s| s.to_string())
            .collect();
        tracing::info!(
            process_type = %process_type,
            statuses = statuses.len(),
            terminal = %terminal.join(","),
            "工序状态表"
        );
    }

    tracing::info!(
        strict_justification = app_state.engine_config.strict_justification,
        auto_release_on_cancel = app_state.engine_config.auto_release_on_cancel,
        "引擎就绪"
    );
    ExitCode::SUCCESS
}
