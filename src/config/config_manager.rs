// ==========================================
// 纺织生产流转引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::types::QuantityUnit;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// 数量容差上限: 只吸收浮点舍入误差, 不能放行实际超量
pub const MAX_QUANTITY_EPSILON: f64 = 1e-9;

/// 容差取值是否合法 (有限, 0 ≤ v ≤ MAX_QUANTITY_EPSILON)
pub fn is_valid_quantity_epsilon(value: f64) -> bool {
    value.is_finite() && (0.0..=MAX_QUANTITY_EPSILON).contains(&value)
}

// ==========================================
// EngineConfig - 引擎配置 (只读)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 浮点舍入容差 (守恒校验/余额比较), 不超过 MAX_QUANTITY_EPSILON
    pub quantity_epsilon: f64,
    /// true: 除 pending → in_progress 外所有迁移都必须填写原因
    /// false: 仅拒绝类目标状态必须填写原因
    pub strict_justification: bool,
    /// 登记工序未指定单位时使用
    pub default_quantity_unit: QuantityUnit,
    /// 取消工序时同事务退回其未退回的领用
    pub auto_release_on_cancel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quantity_epsilon: MAX_QUANTITY_EPSILON,
            strict_justification: true,
            default_quantity_unit: QuantityUnit::Meter,
            auto_release_on_cancel: true,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 配置 (UPSERT)
    pub fn set_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key"
        )?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }

    /// 加载引擎配置
    ///
    /// 缺失或格式错误的配置项回退为默认值并告警
    pub fn load_engine_config(&self) -> Result<EngineConfig, Box<dyn Error>> {
        let defaults = EngineConfig::default();

        let quantity_epsilon = match self.get_global_config_value(config_keys::QUANTITY_EPSILON)? {
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if is_valid_quantity_epsilon(v) => v,
                _ => {
                    tracing::warn!(key = config_keys::QUANTITY_EPSILON, value = %raw, "配置值非法，使用默认值");
                    defaults.quantity_epsilon
                }
            },
            None => defaults.quantity_epsilon,
        };

        let strict_justification =
            self.read_bool(config_keys::STRICT_JUSTIFICATION, defaults.strict_justification)?;
        let auto_release_on_cancel =
            self.read_bool(config_keys::AUTO_RELEASE_ON_CANCEL, defaults.auto_release_on_cancel)?;

        let default_quantity_unit = match self.get_global_config_value(config_keys::DEFAULT_QUANTITY_UNIT)? {
            Some(raw) => QuantityUnit::from_str(raw.trim()).unwrap_or_else(|| {
                tracing::warn!(key = config_keys::DEFAULT_QUANTITY_UNIT, value = %raw, "配置值非法，使用默认值");
                defaults.default_quantity_unit
            }),
            None => defaults.default_quantity_unit,
        };

        Ok(EngineConfig {
            quantity_epsilon,
            strict_justification,
            default_quantity_unit,
            auto_release_on_cancel,
        })
    }

    fn read_bool(&self, key: &str, default: bool) -> Result<bool, Box<dyn Error>> {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => {
                tracing::warn!(key, value = %raw, "配置值非法，使用默认值");
                Ok(default)
            }
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 数量
    pub const QUANTITY_EPSILON: &str = "quantity_epsilon";
    pub const DEFAULT_QUANTITY_UNIT: &str = "default_quantity_unit";

    // 迁移
    pub const STRICT_JUSTIFICATION: &str = "strict_justification";

    // 台账
    pub const AUTO_RELEASE_ON_CANCEL: &str = "auto_release_on_cancel";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = crate::db::open_in_memory().unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = manager().load_engine_config().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let manager = manager();
        manager.set_value(config_keys::STRICT_JUSTIFICATION, "false").unwrap();
        manager.set_value(config_keys::DEFAULT_QUANTITY_UNIT, "piece").unwrap();
        manager.set_value(config_keys::QUANTITY_EPSILON, "not-a-number").unwrap();
        manager.set_value(config_keys::AUTO_RELEASE_ON_CANCEL, "maybe").unwrap();

        let config = manager.load_engine_config().unwrap();
        assert!(!config.strict_justification);
        assert_eq!(config.default_quantity_unit, QuantityUnit::Piece);
        assert_eq!(config.quantity_epsilon, EngineConfig::default().quantity_epsilon);
        assert!(config.auto_release_on_cancel);
    }

    #[test]
    fn test_snapshot_contains_values() {
        let manager = manager();
        manager.set_value(config_keys::QUANTITY_EPSILON, "1e-10").unwrap();
        let snapshot = manager.get_config_snapshot().unwrap();
        let parsed: HashMap<String, String> = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(parsed.get("quantity_epsilon").map(String::as_str), Some("1e-10"));
    }

    #[test]
    fn test_quantity_epsilon_is_bounded() {
        let manager = manager();
        manager.set_value(config_keys::QUANTITY_EPSILON, "1e-10").unwrap();
        assert_eq!(manager.load_engine_config().unwrap().quantity_epsilon, 1e-10);

        // 超过上限的容差会放行超量领用, 回退为默认值
        for raw in ["5", "0.001", "1e-6", "-1e-10", "inf"] {
            manager.set_value(config_keys::QUANTITY_EPSILON, raw).unwrap();
            assert_eq!(
                manager.load_engine_config().unwrap().quantity_epsilon,
                MAX_QUANTITY_EPSILON,
                "取值 {} 应回退",
                raw
            );
        }
    }
}
