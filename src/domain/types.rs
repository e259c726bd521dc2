// ==========================================
// 纺织生产流转引擎 - 领域类型定义
// ==========================================
// 职责: 工序类型 / 工序状态 / 质量等级 / 计量单位 / 台账类型
// 存储格式: snake_case 字符串 (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 工序类型 (Process Type)
// ==========================================
// 部署期固定的封闭集合, 决定该工序可用的状态迁移表
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    GreyInward,     // 坯布入库
    PreProcessing,  // 前处理
    Dyeing,         // 染色
    Printing,       // 印花
    Washing,        // 水洗
    Fixing,         // 固色
    Finishing,      // 后整理
    QualityControl, // 质检
    CuttingPacking, // 裁剪包装
    Felt,           // 毡处理 (按批次寻址)
    Packing,        // 包装 (按批次寻址)
    Dispatch,       // 发货
}

impl ProcessType {
    /// 全部工序类型 (按典型流转顺序)
    pub const ALL: [ProcessType; 12] = [
        ProcessType::GreyInward,
        ProcessType::PreProcessing,
        ProcessType::Dyeing,
        ProcessType::Printing,
        ProcessType::Washing,
        ProcessType::Fixing,
        ProcessType::Finishing,
        ProcessType::QualityControl,
        ProcessType::CuttingPacking,
        ProcessType::Felt,
        ProcessType::Packing,
        ProcessType::Dispatch,
    ];

    /// 从数据库字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "grey_inward" => Some(ProcessType::GreyInward),
            "pre_processing" => Some(ProcessType::PreProcessing),
            "dyeing" => Some(ProcessType::Dyeing),
            "printing" => Some(ProcessType::Printing),
            "washing" => Some(ProcessType::Washing),
            "fixing" => Some(ProcessType::Fixing),
            "finishing" => Some(ProcessType::Finishing),
            "quality_control" => Some(ProcessType::QualityControl),
            "cutting_packing" => Some(ProcessType::CuttingPacking),
            "felt" => Some(ProcessType::Felt),
            "packing" => Some(ProcessType::Packing),
            "dispatch" => Some(ProcessType::Dispatch),
            _ => None,
        }
    }

    /// 转换为数据库字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ProcessType::GreyInward => "grey_inward",
            ProcessType::PreProcessing => "pre_processing",
            ProcessType::Dyeing => "dyeing",
            ProcessType::Printing => "printing",
            ProcessType::Washing => "washing",
            ProcessType::Fixing => "fixing",
            ProcessType::Finishing => "finishing",
            ProcessType::QualityControl => "quality_control",
            ProcessType::CuttingPacking => "cutting_packing",
            ProcessType::Felt => "felt",
            ProcessType::Packing => "packing",
            ProcessType::Dispatch => "dispatch",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 工序状态 (Stage Status)
// ==========================================
// 并非每种工序都使用全部状态, 合法性以状态迁移表为准
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,          // 待开工
    InProgress,       // 进行中
    Completed,        // 已完工
    OnHold,           // 暂停
    QualityHold,      // 质量扣留
    MachineBreakdown, // 设备故障
    MaterialShortage, // 缺料
    ChemicalIssue,    // 助剂异常
    QualityReject,    // 质量判废
    Rework,           // 返工
    ReadyForNext,     // 待转下道
    Cancelled,        // 已取消
}

impl StageStatus {
    pub const ALL: [StageStatus; 12] = [
        StageStatus::Pending,
        StageStatus::InProgress,
        StageStatus::Completed,
        StageStatus::OnHold,
        StageStatus::QualityHold,
        StageStatus::MachineBreakdown,
        StageStatus::MaterialShortage,
        StageStatus::ChemicalIssue,
        StageStatus::QualityReject,
        StageStatus::Rework,
        StageStatus::ReadyForNext,
        StageStatus::Cancelled,
    ];

    /// 从数据库字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StageStatus::Pending),
            "in_progress" => Some(StageStatus::InProgress),
            "completed" => Some(StageStatus::Completed),
            "on_hold" => Some(StageStatus::OnHold),
            "quality_hold" => Some(StageStatus::QualityHold),
            "machine_breakdown" => Some(StageStatus::MachineBreakdown),
            "material_shortage" => Some(StageStatus::MaterialShortage),
            "chemical_issue" => Some(StageStatus::ChemicalIssue),
            "quality_reject" => Some(StageStatus::QualityReject),
            "rework" => Some(StageStatus::Rework),
            "ready_for_next" => Some(StageStatus::ReadyForNext),
            "cancelled" => Some(StageStatus::Cancelled),
            _ => None,
        }
    }

    /// 转换为数据库字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::OnHold => "on_hold",
            StageStatus::QualityHold => "quality_hold",
            StageStatus::MachineBreakdown => "machine_breakdown",
            StageStatus::MaterialShortage => "material_shortage",
            StageStatus::ChemicalIssue => "chemical_issue",
            StageStatus::QualityReject => "quality_reject",
            StageStatus::Rework => "rework",
            StageStatus::ReadyForNext => "ready_for_next",
            StageStatus::Cancelled => "cancelled",
        }
    }

    /// 是否计入"已完成"(订单进度口径)
    pub fn is_finished(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::ReadyForNext)
    }

    /// 进入该状态时是否打结束时间戳
    pub fn is_end_class(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed
                | StageStatus::ReadyForNext
                | StageStatus::Cancelled
                | StageStatus::QualityReject
        )
    }

    /// 拒绝类状态: 无论配置如何, 进入时都必须填写原因
    pub fn is_rejection_class(&self) -> bool {
        matches!(
            self,
            StageStatus::OnHold
                | StageStatus::QualityHold
                | StageStatus::MachineBreakdown
                | StageStatus::MaterialShortage
                | StageStatus::ChemicalIssue
                | StageStatus::QualityReject
                | StageStatus::Rework
                | StageStatus::Cancelled
        )
    }

    /// 停滞类状态 (暂停/扣留/故障/缺料/助剂异常)
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            StageStatus::OnHold
                | StageStatus::QualityHold
                | StageStatus::MachineBreakdown
                | StageStatus::MaterialShortage
                | StageStatus::ChemicalIssue
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 质量等级 (Quality Grade)
// ==========================================
// 顺序: A+ > A > B+ > B > C > D, 仅在完工时设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityGrade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "D")]
    D,
}

impl QualityGrade {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "A+" => Some(QualityGrade::APlus),
            "A" => Some(QualityGrade::A),
            "B+" => Some(QualityGrade::BPlus),
            "B" => Some(QualityGrade::B),
            "C" => Some(QualityGrade::C),
            "D" => Some(QualityGrade::D),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            QualityGrade::APlus => "A+",
            QualityGrade::A => "A",
            QualityGrade::BPlus => "B+",
            QualityGrade::B => "B",
            QualityGrade::C => "C",
            QualityGrade::D => "D",
        }
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 计量单位 (Quantity Unit)
// ==========================================
// 不做隐式换算: 批次只能按产出工序声明的单位领用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityUnit {
    Meter,    // 米
    Piece,    // 件
    Kilogram, // 公斤
}

impl QuantityUnit {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "meter" => Some(QuantityUnit::Meter),
            "piece" => Some(QuantityUnit::Piece),
            "kilogram" => Some(QuantityUnit::Kilogram),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            QuantityUnit::Meter => "meter",
            QuantityUnit::Piece => "piece",
            QuantityUnit::Kilogram => "kilogram",
        }
    }
}

impl fmt::Display for QuantityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 台账记录类型 (Ledger Entry Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Produced,  // 产出
    Allocated, // 领用
    Released,  // 退回
}

impl LedgerEntryKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "produced" => Some(LedgerEntryKind::Produced),
            "allocated" => Some(LedgerEntryKind::Allocated),
            "released" => Some(LedgerEntryKind::Released),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            LedgerEntryKind::Produced => "produced",
            LedgerEntryKind::Allocated => "allocated",
            LedgerEntryKind::Released => "released",
        }
    }
}

impl fmt::Display for LedgerEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_db_str_roundtrip_covers_all() {
        for status in StageStatus::ALL {
            assert_eq!(StageStatus::from_str(status.to_db_str()), Some(status));
        }
        assert_eq!(StageStatus::from_str("rejected"), None);
    }

    #[test]
    fn test_process_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&ProcessType::CuttingPacking).unwrap();
        assert_eq!(json, "\"cutting_packing\"");
        let parsed: ProcessType = serde_json::from_str("\"quality_control\"").unwrap();
        assert_eq!(parsed, ProcessType::QualityControl);
    }

    #[test]
    fn test_quality_grade_serde() {
        let json = serde_json::to_string(&QualityGrade::APlus).unwrap();
        assert_eq!(json, "\"A+\"");
        assert_eq!(QualityGrade::from_str(" B+ "), Some(QualityGrade::BPlus));
    }

    #[test]
    fn test_status_classes() {
        assert!(StageStatus::Completed.is_finished());
        assert!(StageStatus::ReadyForNext.is_finished());
        assert!(!StageStatus::Cancelled.is_finished());
        assert!(StageStatus::QualityReject.is_end_class());
        assert!(!StageStatus::InProgress.is_rejection_class());
        assert!(StageStatus::Cancelled.is_rejection_class());
        assert!(StageStatus::MachineBreakdown.is_blocked());
    }
}
