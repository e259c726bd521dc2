// ==========================================
// 纺织生产流转引擎 - 配置管理 API
// ==========================================
// 职责: 引擎配置查询与更新 (global scope)
// 说明: 引擎在启动时读取一次配置; 更新在下次启动时生效
// ==========================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::config::config_manager::{
    config_keys, is_valid_quantity_epsilon, ConfigManager, EngineConfig,
};
use crate::domain::types::QuantityUnit;

/// 允许通过 API 修改的配置键
const KNOWN_KEYS: [&str; 4] = [
    config_keys::QUANTITY_EPSILON,
    config_keys::STRICT_JUSTIFICATION,
    config_keys::DEFAULT_QUANTITY_UNIT,
    config_keys::AUTO_RELEASE_ON_CANCEL,
];

pub struct ConfigApi {
    config_manager: Arc<ConfigManager>,
}

impl ConfigApi {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        Self { config_manager }
    }

    /// 当前持久化的全部配置
    pub fn list_configs(&self) -> ApiResult<HashMap<String, String>> {
        let snapshot = self
            .config_manager
            .get_config_snapshot()
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        serde_json::from_str(&snapshot).map_err(|e| ApiError::InternalError(e.to_string()))
    }

    /// 按当前持久化值解析出的引擎配置
    pub fn engine_config(&self) -> ApiResult<EngineConfig> {
        self.config_manager
            .load_engine_config()
            .map_err(|e| ApiError::DatabaseError(e.to_string()))
    }

    /// 更新配置
    ///
    /// # 参数
    /// - key: 配置键 (见 config_keys)
    /// - value: 配置值, 写入前按键的类型校验
    /// - operator: 操作人
    pub fn update_config(&self, key: &str, value: &str, operator: &str) -> ApiResult<()> {
        if operator.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }
        let key = key.trim();
        if !KNOWN_KEYS.contains(&key) {
            return Err(ApiError::InvalidInput(format!("未知的配置键: {}", key)));
        }
        validate_value(key, value.trim())?;

        self.config_manager
            .set_value(key, value.trim())
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

        info!(key, value = value.trim(), operator, "配置已更新 (下次启动生效)");
        Ok(())
    }
}

fn validate_value(key: &str, value: &str) -> ApiResult<()> {
    let valid = match key {
        config_keys::QUANTITY_EPSILON => value
            .parse::<f64>()
            .map(is_valid_quantity_epsilon)
            .unwrap_or(false),
        config_keys::DEFAULT_QUANTITY_UNIT => QuantityUnit::from_str(value).is_some(),
        _ => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "0" | "false" | "no" | "off"
        ),
    };
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(format!("配置 {} 的取值非法: {}", key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn api() -> ConfigApi {
        let conn = crate::db::open_in_memory().unwrap();
        ConfigApi::new(Arc::new(ConfigManager::from_connection(Arc::new(Mutex::new(conn)))))
    }

    #[test]
    fn test_update_config_validates_key_and_value() {
        let api = api();

        api.update_config("strict_justification", "false", "admin").unwrap();
        api.update_config("default_quantity_unit", "kilogram", "admin").unwrap();
        assert!(!api.engine_config().unwrap().strict_justification);
        assert_eq!(api.engine_config().unwrap().default_quantity_unit, QuantityUnit::Kilogram);

        assert!(matches!(
            api.update_config("unknown_key", "1", "admin"),
            Err(ApiError::InvalidInput(_))
        ));
        for epsilon in ["-1", "5", "1e-7"] {
            assert!(matches!(
                api.update_config("quantity_epsilon", epsilon, "admin"),
                Err(ApiError::InvalidInput(_))
            ));
        }
        api.update_config("quantity_epsilon", "0", "admin").unwrap();
        assert_eq!(api.engine_config().unwrap().quantity_epsilon, 0.0);
        assert!(matches!(
            api.update_config("auto_release_on_cancel", "true", " "),
            Err(ApiError::InvalidInput(_))
        ));

        let configs = api.list_configs().unwrap();
        assert_eq!(configs.len(), 3);
    }
}
