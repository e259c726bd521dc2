// ==========================================
// 纺织生产流转引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键/busy_timeout)
// - 幂等建表, 记录 schema_version
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存库并建表（测试/嵌入式场景）
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 幂等建表
///
/// 说明：
/// - stage_instance.revision 用于乐观锁
/// - lot_ledger 只追加; 部分唯一索引保证同一领用记录至多退回一次
/// - stage_audit_log 对 stage_instance 是弱引用，不加外键
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS stage_instance (
            stage_instance_id TEXT PRIMARY KEY,
            lot_number TEXT NOT NULL,
            production_order_id TEXT,
            process_type TEXT NOT NULL,
            stage_number INTEGER NOT NULL,
            status TEXT NOT NULL,
            planned_start_time TEXT,
            planned_end_time TEXT,
            actual_start_time TEXT,
            actual_end_time TEXT,
            quantity_unit TEXT NOT NULL,
            input_quantity REAL NOT NULL DEFAULT 0 CHECK (input_quantity >= 0),
            produced_quantity REAL,
            defect_quantity REAL,
            loss_quantity REAL,
            quality_grade TEXT,
            quality_notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_stage_instance_lot ON stage_instance(lot_number);
        CREATE INDEX IF NOT EXISTS idx_stage_instance_order ON stage_instance(production_order_id);

        CREATE TABLE IF NOT EXISTS lot_ledger (
            ledger_seq INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id TEXT NOT NULL UNIQUE,
            lot_number TEXT NOT NULL,
            source_stage_instance_id TEXT NOT NULL REFERENCES stage_instance(stage_instance_id),
            consuming_stage_instance_id TEXT REFERENCES stage_instance(stage_instance_id),
            kind TEXT NOT NULL CHECK (kind IN ('produced', 'allocated', 'released')),
            quantity REAL NOT NULL CHECK (quantity >= 0),
            quantity_unit TEXT NOT NULL,
            reference_entry_id TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_lot_ledger_source
            ON lot_ledger(lot_number, source_stage_instance_id);
        CREATE UNIQUE INDEX IF NOT EXISTS uq_lot_ledger_single_release
            ON lot_ledger(reference_entry_id) WHERE kind = 'released';
        CREATE UNIQUE INDEX IF NOT EXISTS uq_lot_ledger_single_production
            ON lot_ledger(source_stage_instance_id) WHERE kind = 'produced';

        CREATE TABLE IF NOT EXISTS stage_audit_log (
            audit_id TEXT PRIMARY KEY,
            stage_instance_id TEXT NOT NULL,
            seq_no INTEGER NOT NULL,
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            notes TEXT,
            process_data_json TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (stage_instance_id, seq_no)
        );
        CREATE INDEX IF NOT EXISTS idx_stage_audit_actor ON stage_audit_log(actor_id, created_at);

        CREATE TABLE IF NOT EXISTS production_order (
            production_order_id TEXT PRIMARY KEY,
            order_quantity REAL NOT NULL CHECK (order_quantity >= 0),
            quantity_unit TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS production_order_stage (
            production_order_id TEXT NOT NULL
                REFERENCES production_order(production_order_id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            stage_instance_id TEXT NOT NULL,
            PRIMARY KEY (production_order_id, position)
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
