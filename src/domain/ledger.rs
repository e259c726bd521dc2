// ==========================================
// 纺织生产流转引擎 - 批次物料台账领域模型
// ==========================================
// 红线: 台账只追加, 不修改不删除; 更正用新记录 (released)
// 对齐: lot_ledger 表
// ==========================================

use crate::domain::types::{LedgerEntryKind, QuantityUnit};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// LotLedgerEntry - 台账记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotLedgerEntry {
    pub entry_id: String,
    pub lot_number: String,
    pub source_stage_instance_id: String,            // 产出方
    pub consuming_stage_instance_id: Option<String>, // 领用方 (产出记录为 None)
    pub kind: LedgerEntryKind,
    pub quantity: f64,
    pub quantity_unit: QuantityUnit,
    pub reference_entry_id: Option<String>, // released 指向被退回的 allocated 记录
    pub created_at: NaiveDateTime,
}

// ==========================================
// SourceBalance - 产出方余额
// ==========================================
// 可用 = 产出 - (领用 - 退回)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBalance {
    pub lot_number: String,
    pub source_stage_instance_id: String,
    pub quantity_unit: Option<QuantityUnit>,
    pub produced: f64,
    pub allocated: f64,
    pub released: f64,
}

impl SourceBalance {
    pub fn empty(lot_number: &str, source_stage_instance_id: &str) -> Self {
        Self {
            lot_number: lot_number.to_string(),
            source_stage_instance_id: source_stage_instance_id.to_string(),
            quantity_unit: None,
            produced: 0.0,
            allocated: 0.0,
            released: 0.0,
        }
    }

    /// 未退回的领用量
    pub fn outstanding(&self) -> f64 {
        self.allocated - self.released
    }

    /// 剩余可用量; 不截断, 出现负数即说明台账被超领
    pub fn available(&self) -> f64 {
        self.produced - self.outstanding()
    }

    /// 再领用 `quantity` 后未退回领用是否仍不超过产出
    pub fn can_cover(&self, quantity: f64, epsilon: f64) -> bool {
        self.outstanding() + quantity <= self.produced + epsilon
    }
}
