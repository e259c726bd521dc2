// ==========================================
// 纺织生产流转引擎 - 状态变更审计领域模型
// ==========================================
// 红线: 每次被接受的迁移恰好一条审计记录; 只追加
// 对齐: stage_audit_log 表
// ==========================================

use crate::domain::types::StageStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// ProcessValue - 工艺数据值
// ==========================================
// 仅允许基本类型 (在 API 边界校验), 引擎不解释其内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl From<bool> for ProcessValue {
    fn from(v: bool) -> Self {
        ProcessValue::Bool(v)
    }
}

impl From<i64> for ProcessValue {
    fn from(v: i64) -> Self {
        ProcessValue::Integer(v)
    }
}

impl From<f64> for ProcessValue {
    fn from(v: f64) -> Self {
        ProcessValue::Number(v)
    }
}

impl From<&str> for ProcessValue {
    fn from(v: &str) -> Self {
        ProcessValue::Text(v.to_string())
    }
}

impl From<String> for ProcessValue {
    fn from(v: String) -> Self {
        ProcessValue::Text(v)
    }
}

/// 工艺数据 (例: 温度/压力读数), 原样存入审计记录
pub type ProcessData = BTreeMap<String, ProcessValue>;

// ==========================================
// AuditRecord - 审计记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: String,
    pub stage_instance_id: String, // 弱引用, 不级联
    pub seq_no: i64,               // 实例内顺序号 (= 迁移后的 revision)
    pub from_status: StageStatus,
    pub to_status: StageStatus,
    pub actor_id: String,
    pub notes: Option<String>,
    pub process_data: ProcessData,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_data_json_is_flat() {
        let mut data = ProcessData::new();
        data.insert("temperature_c".to_string(), 130.5.into());
        data.insert("batch_ok".to_string(), true.into());
        data.insert("machine".to_string(), "JET-02".into());
        data.insert("cycles".to_string(), 3i64.into());

        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(
            json,
            r#"{"batch_ok":true,"cycles":3,"machine":"JET-02","temperature_c":130.5}"#
        );

        let back: ProcessData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("cycles"), Some(&ProcessValue::Integer(3)));
        assert_eq!(back.get("temperature_c"), Some(&ProcessValue::Number(130.5)));
    }
}
