// ==========================================
// 纺织生产流转引擎 - 订单进度汇总
// ==========================================
// 职责: 读取订单下的工序实例, 推导完成百分比与计数
// 红线: 纯读侧计算, 不缓存, 不修改任何状态
// ==========================================

use crate::domain::production_order::{CurrentStage, ProductionOrder, ProductionProgress};
use crate::domain::stage::StageInstance;
use crate::domain::types::StageStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{ProductionOrderRepository, StageInstanceRepository};
use std::sync::Arc;

pub struct ProductionOrderProgressAggregator {
    order_repo: Arc<ProductionOrderRepository>,
    stage_repo: Arc<StageInstanceRepository>,
}

impl ProductionOrderProgressAggregator {
    pub fn new(
        order_repo: Arc<ProductionOrderRepository>,
        stage_repo: Arc<StageInstanceRepository>,
    ) -> Self {
        Self {
            order_repo,
            stage_repo,
        }
    }

    /// 订单进度 (每次重新计算)
    pub fn progress(&self, production_order_id: &str) -> EngineResult<ProductionProgress> {
        let order = self
            .order_repo
            .find_by_id(production_order_id)
            .map_err(EngineError::from_repository)?
            .ok_or_else(|| EngineError::not_found("ProductionOrder", production_order_id))?;

        let stages = self
            .stage_repo
            .find_many(&order.stage_instance_ids)
            .map_err(EngineError::from_repository)?;

        Ok(compute_progress(&order, &stages))
    }
}

/// 进度公式
///
/// - completed = status ∈ {completed, ready_for_next}
/// - order_quantity > 0: min(100, round(100 × Σproduced / order_quantity))
/// - 否则: round(100 × completed / total), 无工序为 0
pub fn compute_progress(order: &ProductionOrder, stages: &[StageInstance]) -> ProductionProgress {
    let finished: Vec<&StageInstance> = stages.iter().filter(|s| s.status.is_finished()).collect();

    let produced_quantity: f64 = finished
        .iter()
        .filter_map(|s| s.produced_quantity)
        .sum();
    let defect_quantity: f64 = finished.iter().filter_map(|s| s.defect_quantity).sum();

    let completed_stage_count = finished.len();
    let total_stage_count = stages.len();

    let completion_percentage = if order.order_quantity > 0.0 {
        let ratio = (100.0 * produced_quantity / order.order_quantity).round();
        ratio.clamp(0.0, 100.0) as u32
    } else if total_stage_count > 0 {
        (100.0 * completed_stage_count as f64 / total_stage_count as f64).round() as u32
    } else {
        0
    };

    let current_stage = stages
        .iter()
        .filter(|s| !s.status.is_finished() && s.status != StageStatus::Cancelled)
        .min_by_key(|s| s.stage_number)
        .map(|s| CurrentStage {
            stage_instance_id: s.stage_instance_id.clone(),
            stage_number: s.stage_number,
            status: s.status,
        });

    ProductionProgress {
        production_order_id: order.production_order_id.clone(),
        completion_percentage,
        completed_stage_count,
        total_stage_count,
        produced_quantity,
        defect_quantity,
        in_progress_stage_count: stages
            .iter()
            .filter(|s| s.status == StageStatus::InProgress)
            .count(),
        blocked_stage_count: stages.iter().filter(|s| s.status.is_blocked()).count(),
        cancelled_stage_count: stages
            .iter()
            .filter(|s| s.status == StageStatus::Cancelled)
            .count(),
        current_stage,
    }
}
