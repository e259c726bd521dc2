// ==========================================
// 纺织生产流转引擎 - 工序实例领域模型
// ==========================================
// 红线: 状态只能经由已接受的迁移修改; 永不删除 (取消是终态)
// 对齐: stage_instance 表
// ==========================================

use crate::domain::types::{ProcessType, QualityGrade, QuantityUnit, StageStatus};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// StageInstance - 工序实例
// ==========================================
// 一个批次在某道工序上的一次加工
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInstance {
    // ===== 标识 =====
    pub stage_instance_id: String,
    pub lot_number: String,
    pub production_order_id: Option<String>, // 毡处理/包装等按批次寻址的工序为 None
    pub process_type: ProcessType,
    pub stage_number: i32, // 订单流水线内的顺序提示

    // ===== 状态 =====
    pub status: StageStatus,

    // ===== 时间 =====
    pub planned_start_time: Option<NaiveDateTime>,
    pub planned_end_time: Option<NaiveDateTime>,
    pub actual_start_time: Option<NaiveDateTime>,
    pub actual_end_time: Option<NaiveDateTime>,

    // ===== 数量 =====
    pub quantity_unit: QuantityUnit,
    pub input_quantity: f64,
    pub produced_quantity: Option<f64>,
    pub defect_quantity: Option<f64>,
    pub loss_quantity: Option<f64>,

    // ===== 质量 (仅完工时设置) =====
    pub quality_grade: Option<QualityGrade>,
    pub quality_notes: Option<String>,

    // ===== 审计/并发 =====
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub revision: i64, // 乐观锁版本号, 每次写入 +1
}

impl StageInstance {
    /// 实际加工时长 (由时间戳即时推导, 不落库)
    pub fn actual_duration(&self) -> Option<Duration> {
        match (self.actual_start_time, self.actual_end_time) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }

    /// 计划加工时长
    pub fn planned_duration(&self) -> Option<Duration> {
        match (self.planned_start_time, self.planned_end_time) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }

    /// 产出 + 次品 + 损耗
    pub fn accounted_quantity(&self) -> f64 {
        self.produced_quantity.unwrap_or(0.0)
            + self.defect_quantity.unwrap_or(0.0)
            + self.loss_quantity.unwrap_or(0.0)
    }
}

// ==========================================
// NewStage - 工序登记请求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStage {
    pub lot_number: String,
    pub production_order_id: Option<String>,
    pub process_type: ProcessType,
    pub stage_number: i32,
    pub quantity_unit: Option<QuantityUnit>, // None → 使用配置的默认单位
    pub input_quantity: f64,
    pub planned_start_time: Option<NaiveDateTime>,
    pub planned_end_time: Option<NaiveDateTime>,
}

impl NewStage {
    pub fn new(lot_number: impl Into<String>, process_type: ProcessType, stage_number: i32) -> Self {
        Self {
            lot_number: lot_number.into(),
            production_order_id: None,
            process_type,
            stage_number,
            quantity_unit: None,
            input_quantity: 0.0,
            planned_start_time: None,
            planned_end_time: None,
        }
    }

    pub fn with_order(mut self, production_order_id: impl Into<String>) -> Self {
        self.production_order_id = Some(production_order_id.into());
        self
    }

    pub fn with_input(mut self, input_quantity: f64) -> Self {
        self.input_quantity = input_quantity;
        self
    }

    pub fn with_unit(mut self, unit: QuantityUnit) -> Self {
        self.quantity_unit = Some(unit);
        self
    }

    pub fn with_plan(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.planned_start_time = Some(start);
        self.planned_end_time = Some(end);
        self
    }
}

// ==========================================
// CompletionReport - 完工报工
// ==========================================
// 迁移到 completed 时必须提供 produced / defect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub produced_quantity: Option<f64>,
    pub defect_quantity: Option<f64>,
    pub loss_quantity: Option<f64>,
    pub quality_grade: Option<QualityGrade>,
    pub quality_notes: Option<String>,
}

impl CompletionReport {
    pub fn new(produced_quantity: f64, defect_quantity: f64) -> Self {
        Self {
            produced_quantity: Some(produced_quantity),
            defect_quantity: Some(defect_quantity),
            ..Default::default()
        }
    }

    pub fn with_loss(mut self, loss_quantity: f64) -> Self {
        self.loss_quantity = Some(loss_quantity);
        self
    }

    pub fn with_grade(mut self, grade: QualityGrade) -> Self {
        self.quality_grade = Some(grade);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn sample() -> StageInstance {
        StageInstance {
            stage_instance_id: "S1".to_string(),
            lot_number: "LOT-1".to_string(),
            production_order_id: None,
            process_type: ProcessType::Dyeing,
            stage_number: 1,
            status: StageStatus::Pending,
            planned_start_time: None,
            planned_end_time: None,
            actual_start_time: None,
            actual_end_time: None,
            quantity_unit: QuantityUnit::Meter,
            input_quantity: 50.0,
            produced_quantity: None,
            defect_quantity: None,
            loss_quantity: None,
            quality_grade: None,
            quality_notes: None,
            created_at: ts(8, 0),
            updated_at: ts(8, 0),
            revision: 0,
        }
    }

    #[test]
    fn test_actual_duration_derived_from_timestamps() {
        let mut stage = sample();
        assert!(stage.actual_duration().is_none());

        stage.actual_start_time = Some(ts(9, 0));
        stage.actual_end_time = Some(ts(11, 30));
        assert_eq!(stage.actual_duration(), Some(Duration::minutes(150)));

        // 结束早于开始视为无效
        stage.actual_end_time = Some(ts(8, 0));
        assert!(stage.actual_duration().is_none());
    }

    #[test]
    fn test_accounted_quantity() {
        let mut stage = sample();
        stage.produced_quantity = Some(45.0);
        stage.defect_quantity = Some(3.0);
        stage.loss_quantity = Some(1.5);
        assert!((stage.accounted_quantity() - 49.5).abs() < 1e-9);
    }
}
