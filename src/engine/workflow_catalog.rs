// ==========================================
// 纺织生产流转引擎 - 工序状态迁移目录
// ==========================================
// 职责: 每种工序类型的合法状态迁移表, 纯查询无副作用
// 红线: 启动时加载一次并自检, 之后只读; 请求处理代码不得修改
// ==========================================

use crate::domain::types::{ProcessType, StageStatus};
use crate::engine::error::CatalogError;
use std::collections::{BTreeMap, BTreeSet};

/// 单个工序类型的迁移表: 当前状态 → 可达状态集合 (空集 = 终态)
pub type StatusTransitions = BTreeMap<StageStatus, BTreeSet<StageStatus>>;

/// 全部工序类型的迁移表
pub type TransitionTable = BTreeMap<ProcessType, StatusTransitions>;

// ==========================================
// StageWorkflowCatalog - 状态迁移目录
// ==========================================
#[derive(Debug, Clone)]
pub struct StageWorkflowCatalog {
    table: TransitionTable,
}

impl StageWorkflowCatalog {
    /// 加载内置迁移表并自检
    pub fn standard() -> Result<Self, CatalogError> {
        Self::from_table(standard_table())
    }

    /// 从给定迁移表构建 (自检失败即拒绝)
    pub fn from_table(table: TransitionTable) -> Result<Self, CatalogError> {
        Self::self_check(&table)?;
        tracing::info!(
            process_types = table.len(),
            transitions = table
                .values()
                .flat_map(|t| t.values())
                .map(|targets| targets.len())
                .sum::<usize>(),
            "工序状态迁移目录加载完成"
        );
        Ok(Self { table })
    }

    /// 自检
    ///
    /// 1. 每个部署的工序类型都有迁移表, 且包含 pending
    /// 2. 不存在自迁移
    /// 3. 作为"值"出现的状态必须作为"键"出现 (可为空集)
    fn self_check(table: &TransitionTable) -> Result<(), CatalogError> {
        for process_type in ProcessType::ALL {
            if !table.contains_key(&process_type) {
                return Err(CatalogError::MissingProcessType { process_type });
            }
        }

        for (&process_type, transitions) in table {
            if !transitions.contains_key(&StageStatus::Pending) {
                return Err(CatalogError::MissingPendingKey { process_type });
            }
            for (&from, targets) in transitions {
                for &to in targets {
                    if to == from {
                        return Err(CatalogError::SelfTransition {
                            process_type,
                            status: from,
                        });
                    }
                    if !transitions.contains_key(&to) {
                        return Err(CatalogError::UnknownTargetStatus {
                            process_type,
                            from,
                            to,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// 当前状态的合法后继; 未知组合返回空集 (与终态同等对待)
    pub fn allowed_next_statuses(
        &self,
        process_type: ProcessType,
        current: StageStatus,
    ) -> BTreeSet<StageStatus> {
        self.table
            .get(&process_type)
            .and_then(|t| t.get(&current))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_allowed(&self, process_type: ProcessType, from: StageStatus, to: StageStatus) -> bool {
        self.table
            .get(&process_type)
            .and_then(|t| t.get(&from))
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    pub fn is_terminal(&self, process_type: ProcessType, status: StageStatus) -> bool {
        self.allowed_next_statuses(process_type, status).is_empty()
    }

    /// 该工序类型使用的全部状态
    pub fn statuses(&self, process_type: ProcessType) -> BTreeSet<StageStatus> {
        self.table
            .get(&process_type)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }
}

// ==========================================
// 内置迁移表
// ==========================================
// 完工 (completed) 在裁剪包装/毡处理/包装/发货为终态,
// 其余工序允许 completed → ready_for_next
fn standard_table() -> TransitionTable {
    use StageStatus::*;

    let wet_process: StatusTransitions = [
        row(Pending, &[InProgress, Cancelled]),
        row(InProgress, &[Completed, OnHold, MachineBreakdown, MaterialShortage, Cancelled]),
        row(OnHold, &[InProgress, Cancelled]),
        row(MachineBreakdown, &[InProgress, Cancelled]),
        row(MaterialShortage, &[InProgress, Cancelled]),
        row(Completed, &[ReadyForNext]),
        row(ReadyForNext, &[]),
        row(Cancelled, &[]),
    ]
    .into_iter()
    .collect();

    let grey_inward: StatusTransitions = [
        row(Pending, &[InProgress, Cancelled]),
        row(InProgress, &[Completed, OnHold, QualityHold, Cancelled]),
        row(OnHold, &[InProgress, Cancelled]),
        row(QualityHold, &[InProgress, QualityReject]),
        row(QualityReject, &[]),
        row(Completed, &[ReadyForNext]),
        row(ReadyForNext, &[]),
        row(Cancelled, &[]),
    ]
    .into_iter()
    .collect();

    let dyeing: StatusTransitions = [
        row(Pending, &[InProgress, OnHold, Cancelled]),
        row(InProgress, &[Completed, OnHold, MachineBreakdown, ChemicalIssue, QualityHold, Cancelled]),
        row(OnHold, &[InProgress, Cancelled]),
        row(MachineBreakdown, &[InProgress, Cancelled]),
        row(ChemicalIssue, &[InProgress, Rework, Cancelled]),
        row(QualityHold, &[InProgress, Rework, QualityReject]),
        row(Rework, &[InProgress, Cancelled]),
        row(QualityReject, &[Rework, Cancelled]),
        row(Completed, &[ReadyForNext]),
        row(ReadyForNext, &[]),
        row(Cancelled, &[]),
    ]
    .into_iter()
    .collect();

    let printing: StatusTransitions = [
        row(Pending, &[InProgress, Cancelled]),
        row(InProgress, &[Completed, OnHold, MachineBreakdown, MaterialShortage, QualityHold, Cancelled]),
        row(OnHold, &[InProgress, Cancelled]),
        row(MachineBreakdown, &[InProgress, Cancelled]),
        row(MaterialShortage, &[InProgress, Cancelled]),
        row(QualityHold, &[InProgress, Rework, QualityReject]),
        row(Rework, &[InProgress, Cancelled]),
        row(QualityReject, &[Rework, Cancelled]),
        row(Completed, &[ReadyForNext]),
        row(ReadyForNext, &[]),
        row(Cancelled, &[]),
    ]
    .into_iter()
    .collect();

    let quality_control: StatusTransitions = [
        row(Pending, &[InProgress, Cancelled]),
        row(InProgress, &[Completed, OnHold, QualityHold, QualityReject, Rework]),
        row(OnHold, &[InProgress, Cancelled]),
        row(QualityHold, &[InProgress, QualityReject]),
        row(Rework, &[InProgress, Cancelled]),
        row(QualityReject, &[]),
        row(Completed, &[ReadyForNext]),
        row(ReadyForNext, &[]),
        row(Cancelled, &[]),
    ]
    .into_iter()
    .collect();

    let cutting_packing: StatusTransitions = [
        row(Pending, &[InProgress, Cancelled]),
        row(InProgress, &[Completed, OnHold, MachineBreakdown, MaterialShortage, Cancelled]),
        row(OnHold, &[InProgress, Cancelled]),
        row(MachineBreakdown, &[InProgress, Cancelled]),
        row(MaterialShortage, &[InProgress, Cancelled]),
        row(Completed, &[]),
        row(Cancelled, &[]),
    ]
    .into_iter()
    .collect();

    let felt: StatusTransitions = [
        row(Pending, &[InProgress, Cancelled]),
        row(InProgress, &[Completed, OnHold, MachineBreakdown, Cancelled]),
        row(OnHold, &[InProgress, Cancelled]),
        row(MachineBreakdown, &[InProgress, Cancelled]),
        row(Completed, &[]),
        row(Cancelled, &[]),
    ]
    .into_iter()
    .collect();

    let packing: StatusTransitions = [
        row(Pending, &[InProgress, Cancelled]),
        row(InProgress, &[Completed, OnHold, MaterialShortage, Cancelled]),
        row(OnHold, &[InProgress, Cancelled]),
        row(MaterialShortage, &[InProgress, Cancelled]),
        row(Completed, &[]),
        row(Cancelled, &[]),
    ]
    .into_iter()
    .collect();

    let dispatch: StatusTransitions = [
        row(Pending, &[InProgress, OnHold, Cancelled]),
        row(InProgress, &[Completed, OnHold, Cancelled]),
        row(OnHold, &[InProgress, Cancelled]),
        row(Completed, &[]),
        row(Cancelled, &[]),
    ]
    .into_iter()
    .collect();

    [
        (ProcessType::GreyInward, grey_inward),
        (ProcessType::PreProcessing, wet_process.clone()),
        (ProcessType::Dyeing, dyeing),
        (ProcessType::Printing, printing),
        (ProcessType::Washing, wet_process.clone()),
        (ProcessType::Fixing, wet_process.clone()),
        (ProcessType::Finishing, wet_process),
        (ProcessType::QualityControl, quality_control),
        (ProcessType::CuttingPacking, cutting_packing),
        (ProcessType::Felt, felt),
        (ProcessType::Packing, packing),
        (ProcessType::Dispatch, dispatch),
    ]
    .into_iter()
    .collect()
}

fn row(from: StageStatus, targets: &[StageStatus]) -> (StageStatus, BTreeSet<StageStatus>) {
    (from, targets.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StageWorkflowCatalog {
        StageWorkflowCatalog::standard().expect("内置迁移表自检失败")
    }

    #[test]
    fn test_transition_closure() {
        let catalog = catalog();
        for process_type in ProcessType::ALL {
            let keys = catalog.statuses(process_type);
            for status in StageStatus::ALL {
                let next = catalog.allowed_next_statuses(process_type, status);
                assert!(!next.contains(&status), "{} 存在自迁移 {}", process_type, status);
                for to in next {
                    assert!(keys.contains(&to));
                }
            }
        }
    }

    #[test]
    fn test_unknown_pair_returns_empty_set() {
        let catalog = catalog();
        // felt 不使用 chemical_issue
        assert!(catalog
            .allowed_next_statuses(ProcessType::Felt, StageStatus::ChemicalIssue)
            .is_empty());
    }

    #[test]
    fn test_completed_asymmetry_preserved() {
        let catalog = catalog();
        assert!(catalog.is_terminal(ProcessType::CuttingPacking, StageStatus::Completed));
        assert!(catalog.is_terminal(ProcessType::Felt, StageStatus::Completed));
        assert!(catalog.is_allowed(
            ProcessType::Dyeing,
            StageStatus::Completed,
            StageStatus::ReadyForNext
        ));
    }

    #[test]
    fn test_completion_reachable_at_most_once() {
        // 从 completed 出发不能再次到达 completed
        let catalog = catalog();
        for process_type in ProcessType::ALL {
            let mut frontier: Vec<StageStatus> = catalog
                .allowed_next_statuses(process_type, StageStatus::Completed)
                .into_iter()
                .collect();
            let mut seen = BTreeSet::new();
            while let Some(status) = frontier.pop() {
                assert_ne!(status, StageStatus::Completed, "{} 可重复完工", process_type);
                if seen.insert(status) {
                    frontier.extend(catalog.allowed_next_statuses(process_type, status));
                }
            }
        }
    }

    #[test]
    fn test_self_check_rejects_unknown_target() {
        let mut table = standard_table();
        table
            .get_mut(&ProcessType::Felt)
            .unwrap()
            .get_mut(&StageStatus::InProgress)
            .unwrap()
            .insert(StageStatus::Rework);

        let err = StageWorkflowCatalog::from_table(table).unwrap_err();
        assert_eq!(
            err,
            CatalogError::UnknownTargetStatus {
                process_type: ProcessType::Felt,
                from: StageStatus::InProgress,
                to: StageStatus::Rework,
            }
        );
    }

    #[test]
    fn test_self_check_rejects_self_transition_and_missing_pending() {
        let mut table = standard_table();
        table
            .get_mut(&ProcessType::Packing)
            .unwrap()
            .get_mut(&StageStatus::OnHold)
            .unwrap()
            .insert(StageStatus::OnHold);
        assert!(matches!(
            StageWorkflowCatalog::from_table(table),
            Err(CatalogError::SelfTransition { .. })
        ));

        let mut table = standard_table();
        table.get_mut(&ProcessType::Dispatch).unwrap().remove(&StageStatus::Pending);
        assert_eq!(
            StageWorkflowCatalog::from_table(table).unwrap_err(),
            CatalogError::MissingPendingKey {
                process_type: ProcessType::Dispatch
            }
        );

        let mut table = standard_table();
        table.remove(&ProcessType::Washing);
        assert!(matches!(
            StageWorkflowCatalog::from_table(table),
            Err(CatalogError::MissingProcessType { .. })
        ));
    }
}
