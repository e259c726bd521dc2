// ==========================================
// 纺织生产流转引擎 - 生产订单 (外部实体) 与进度汇总
// ==========================================
// 生产订单由外部协作方拥有, 引擎只读取以计算进度
// 对齐: production_order / production_order_stage 表
// ==========================================

use crate::domain::types::{QuantityUnit, StageStatus};
use serde::{Deserialize, Serialize};

// ==========================================
// ProductionOrder - 生产订单
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionOrder {
    pub production_order_id: String,
    pub order_quantity: f64,
    pub quantity_unit: QuantityUnit,
    pub stage_instance_ids: Vec<String>, // 按流水线顺序
}

// ==========================================
// ProductionProgress - 订单进度
// ==========================================
// 纯读侧计算结果, 每次读取重新计算, 不缓存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionProgress {
    pub production_order_id: String,
    pub completion_percentage: u32,
    pub completed_stage_count: usize,
    pub total_stage_count: usize,
    pub produced_quantity: f64,
    pub defect_quantity: f64,

    // ===== 扩展计数 =====
    pub in_progress_stage_count: usize,
    pub blocked_stage_count: usize,
    pub cancelled_stage_count: usize,
    pub current_stage: Option<CurrentStage>,
}

/// 当前所处工序 (stage_number 最小且未完成/未取消)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStage {
    pub stage_instance_id: String,
    pub stage_number: i32,
    pub status: StageStatus,
}
