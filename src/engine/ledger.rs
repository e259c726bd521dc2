// ==========================================
// 纺织生产流转引擎 - 批次物料台账
// ==========================================
// 职责: 按 (批次, 产出工序) 记录产出与下游领用, 计算剩余可用量
// 红线: 任意交错下, 未退回领用之和 ≤ 产出之和 (可用量永不为负)
// 并发: 领用按 (lot_number, source_stage_instance_id) 串行化;
//       不同产出方互不阻塞; 存储层事务内再次复核余额
// ==========================================

use crate::config::EngineConfig;
use crate::domain::ledger::{LotLedgerEntry, SourceBalance};
use crate::domain::stage::StageInstance;
use crate::domain::types::LedgerEntryKind;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{
    AllocationOutcome, LotLedgerRepository, RepositoryError, StageInstanceRepository,
};
use chrono::{NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 领用串行化的键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SourceKey {
    lot_number: String,
    source_stage_instance_id: String,
}

// ==========================================
// LotMaterialLedger - 批次物料台账
// ==========================================
pub struct LotMaterialLedger {
    ledger_repo: Arc<LotLedgerRepository>,
    stage_repo: Arc<StageInstanceRepository>,
    config: EngineConfig,
    source_locks: Mutex<HashMap<SourceKey, Arc<Mutex<()>>>>,
}

impl LotMaterialLedger {
    pub fn new(
        ledger_repo: Arc<LotLedgerRepository>,
        stage_repo: Arc<StageInstanceRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger_repo,
            stage_repo,
            config,
            source_locks: Mutex::new(HashMap::new()),
        }
    }

    // ==========================================
    // 记录构造 (供迁移提交事务使用)
    // ==========================================

    /// 构造产出记录
    pub fn production_entry(
        &self,
        source: &StageInstance,
        produced_quantity: f64,
        at: NaiveDateTime,
    ) -> EngineResult<LotLedgerEntry> {
        ensure_quantity("produced_quantity", produced_quantity)?;
        Ok(LotLedgerEntry {
            entry_id: Uuid::new_v4().to_string(),
            lot_number: source.lot_number.clone(),
            source_stage_instance_id: source.stage_instance_id.clone(),
            consuming_stage_instance_id: None,
            kind: LedgerEntryKind::Produced,
            quantity: produced_quantity,
            quantity_unit: source.quantity_unit,
            reference_entry_id: None,
            created_at: at,
        })
    }

    /// 构造退回记录
    pub fn release_entry(&self, allocation: &LotLedgerEntry, at: NaiveDateTime) -> LotLedgerEntry {
        LotLedgerEntry {
            entry_id: Uuid::new_v4().to_string(),
            lot_number: allocation.lot_number.clone(),
            source_stage_instance_id: allocation.source_stage_instance_id.clone(),
            consuming_stage_instance_id: allocation.consuming_stage_instance_id.clone(),
            kind: LedgerEntryKind::Released,
            quantity: allocation.quantity,
            quantity_unit: allocation.quantity_unit,
            reference_entry_id: Some(allocation.entry_id.clone()),
            created_at: at,
        }
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 登记产出 (完工时调用)
    ///
    /// 不做守恒校验: produced + defect + loss ≤ input 由迁移校验器在此之前完成。
    /// 只接受已完工且报工数量一致的产出方; 完工提交已写入产出时返回该记录, 不重复计入
    pub fn register_production(
        &self,
        lot_number: &str,
        source_stage_instance_id: &str,
        produced_quantity: f64,
    ) -> EngineResult<LotLedgerEntry> {
        ensure_quantity("produced_quantity", produced_quantity)?;
        let source = self.load_stage(source_stage_instance_id)?;
        ensure_same_lot(&source, lot_number)?;

        if !source.status.is_finished() {
            return Err(EngineError::InvalidInput(format!(
                "工序 {} 处于 {} 状态, 完工后才能登记产出",
                source_stage_instance_id, source.status
            )));
        }
        if source.produced_quantity != Some(produced_quantity) {
            return Err(EngineError::InvalidInput(format!(
                "登记产出量 {} 与工序 {} 的完工报工 {:?} 不一致",
                produced_quantity, source_stage_instance_id, source.produced_quantity
            )));
        }

        if let Some(existing) = self
            .ledger_repo
            .find_production(source_stage_instance_id)
            .map_err(EngineError::from_repository)?
        {
            debug!(
                lot_number,
                source = source_stage_instance_id,
                entry_id = %existing.entry_id,
                "产出已登记"
            );
            return Ok(existing);
        }

        let entry = self.production_entry(&source, produced_quantity, now())?;
        self.ledger_repo
            .append(&entry)
            .map_err(EngineError::from_repository)?;

        info!(
            lot_number,
            source = source_stage_instance_id,
            quantity = produced_quantity,
            "登记产出"
        );
        Ok(entry)
    }

    /// 领用
    ///
    /// 在该产出方的串行锁内复核可用量; 不足则整体失败, 不做部分领用。
    /// 成功后领用方 input_quantity 同事务增加
    pub fn allocate(
        &self,
        lot_number: &str,
        source_stage_instance_id: &str,
        consuming_stage_instance_id: &str,
        requested_quantity: f64,
    ) -> EngineResult<LotLedgerEntry> {
        ensure_quantity("requested_quantity", requested_quantity)?;
        if requested_quantity <= 0.0 {
            return Err(EngineError::InvalidQuantity {
                field: "requested_quantity".to_string(),
                value: requested_quantity,
            });
        }
        if source_stage_instance_id == consuming_stage_instance_id {
            return Err(EngineError::InvalidInput(
                "工序不能领用自身的产出".to_string(),
            ));
        }

        let key = SourceKey {
            lot_number: lot_number.to_string(),
            source_stage_instance_id: source_stage_instance_id.to_string(),
        };
        self.with_source_lock(key, || {
            self.allocate_locked(
                lot_number,
                source_stage_instance_id,
                consuming_stage_instance_id,
                requested_quantity,
            )
        })
    }

    fn allocate_locked(
        &self,
        lot_number: &str,
        source_stage_instance_id: &str,
        consuming_stage_instance_id: &str,
        requested_quantity: f64,
    ) -> EngineResult<LotLedgerEntry> {
        let source = self.load_stage(source_stage_instance_id)?;
        ensure_same_lot(&source, lot_number)?;

        let consumer = self.load_stage(consuming_stage_instance_id)?;
        if consumer.lot_number != lot_number {
            return Err(EngineError::InvalidInput(format!(
                "领用方 {} 不属于批次 {}",
                consuming_stage_instance_id, lot_number
            )));
        }
        if consumer.status.is_end_class() {
            return Err(EngineError::InvalidInput(format!(
                "领用方 {} 已处于 {} 状态, 不能再领用",
                consuming_stage_instance_id, consumer.status
            )));
        }
        if consumer.quantity_unit != source.quantity_unit {
            return Err(EngineError::UnitMismatch {
                source_unit: source.quantity_unit,
                consumer_unit: consumer.quantity_unit,
            });
        }

        let entry = LotLedgerEntry {
            entry_id: Uuid::new_v4().to_string(),
            lot_number: lot_number.to_string(),
            source_stage_instance_id: source_stage_instance_id.to_string(),
            consuming_stage_instance_id: Some(consuming_stage_instance_id.to_string()),
            kind: LedgerEntryKind::Allocated,
            quantity: requested_quantity,
            quantity_unit: source.quantity_unit,
            reference_entry_id: None,
            created_at: now(),
        };

        let outcome = self
            .ledger_repo
            .allocate_atomically(&entry, consumer.revision, self.config.quantity_epsilon)
            .map_err(EngineError::from_repository)?;

        match outcome {
            AllocationOutcome::Committed(entry) => {
                info!(
                    lot_number,
                    source = source_stage_instance_id,
                    consumer = consuming_stage_instance_id,
                    quantity = requested_quantity,
                    entry_id = %entry.entry_id,
                    "领用成功"
                );
                Ok(entry)
            }
            AllocationOutcome::Insufficient(balance) => {
                warn!(
                    lot_number,
                    source = source_stage_instance_id,
                    requested = requested_quantity,
                    available = balance.available(),
                    "领用失败: 余额不足"
                );
                Err(EngineError::InsufficientBalance {
                    lot_number: lot_number.to_string(),
                    source_stage_instance_id: source_stage_instance_id.to_string(),
                    requested: requested_quantity,
                    available: balance.available(),
                })
            }
        }
    }

    /// 退回一条领用记录, 数量回到可用池
    pub fn release(&self, allocation_entry_id: &str) -> EngineResult<LotLedgerEntry> {
        let allocation = self
            .ledger_repo
            .find_by_id(allocation_entry_id)
            .map_err(EngineError::from_repository)?
            .ok_or_else(|| EngineError::not_found("LotLedgerEntry", allocation_entry_id))?;

        if allocation.kind != LedgerEntryKind::Allocated {
            return Err(EngineError::InvalidInput(format!(
                "台账记录 {} 类型为 {}, 只能退回领用记录",
                allocation_entry_id, allocation.kind
            )));
        }
        if self
            .ledger_repo
            .is_released(allocation_entry_id)
            .map_err(EngineError::from_repository)?
        {
            return Err(EngineError::AllocationAlreadyReleased(
                allocation_entry_id.to_string(),
            ));
        }

        let consumer_id = allocation
            .consuming_stage_instance_id
            .as_deref()
            .ok_or_else(|| EngineError::InvalidInput("领用记录缺少领用方".to_string()))?;
        let consumer = self.load_stage(consumer_id)?;
        if consumer.status.is_finished() {
            return Err(EngineError::AllocationLocked {
                allocation_entry_id: allocation_entry_id.to_string(),
                consumer_status: consumer.status,
            });
        }

        let entry = self.release_entry(&allocation, now());
        self.ledger_repo
            .release_atomically(&entry, consumer.revision)
            .map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => {
                    EngineError::AllocationAlreadyReleased(allocation_entry_id.to_string())
                }
                other => EngineError::from_repository(other),
            })?;

        info!(
            lot_number = %entry.lot_number,
            source = %entry.source_stage_instance_id,
            consumer = consumer_id,
            quantity = entry.quantity,
            "领用已退回"
        );
        Ok(entry)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 可用余额 = 产出 - 未退回领用
    pub fn available_balance(&self, lot_number: &str, source_stage_instance_id: &str) -> EngineResult<f64> {
        Ok(self.balance(lot_number, source_stage_instance_id)?.available())
    }

    /// 产出方余额明细
    pub fn balance(&self, lot_number: &str, source_stage_instance_id: &str) -> EngineResult<SourceBalance> {
        let source = self.load_stage(source_stage_instance_id)?;
        ensure_same_lot(&source, lot_number)?;

        let balance = self
            .ledger_repo
            .source_balance(lot_number, source_stage_instance_id)
            .map_err(EngineError::from_repository)?;
        debug!(
            lot_number,
            source = source_stage_instance_id,
            produced = balance.produced,
            outstanding = balance.outstanding(),
            "查询余额"
        );
        Ok(balance)
    }

    /// 批次下全部产出方的可用量
    pub fn lot_availability(&self, lot_number: &str) -> EngineResult<Vec<SourceBalance>> {
        self.ledger_repo
            .lot_balances(lot_number)
            .map_err(EngineError::from_repository)
    }

    /// 批次台账流水, 最早在前
    pub fn entries(&self, lot_number: &str) -> EngineResult<Vec<LotLedgerEntry>> {
        self.ledger_repo
            .find_by_lot(lot_number)
            .map_err(EngineError::from_repository)
    }

    /// 领用方尚未退回的领用
    pub fn outstanding_allocations(&self, consuming_stage_instance_id: &str) -> EngineResult<Vec<LotLedgerEntry>> {
        self.ledger_repo
            .outstanding_allocations_for_consumer(consuming_stage_instance_id)
            .map_err(EngineError::from_repository)
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    /// 在 (批次, 产出方) 串行锁内执行 `f`
    ///
    /// 锁只在注册表锁内克隆, 因此释放后引用计数为 1 即无其他等待者, 可回收
    fn with_source_lock<T>(
        &self,
        key: SourceKey,
        f: impl FnOnce() -> EngineResult<T>,
    ) -> EngineResult<T> {
        let lock = {
            let mut locks = self.source_locks.lock().map_err(lock_error)?;
            locks.entry(key.clone()).or_default().clone()
        };

        let result = match lock.lock() {
            Ok(_guard) => f(),
            Err(e) => Err(lock_error(e)),
        };
        drop(lock);

        if let Ok(mut locks) = self.source_locks.lock() {
            if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(&key);
            }
        }
        result
    }

    #[cfg(test)]
    fn source_lock_count(&self) -> usize {
        self.source_locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn load_stage(&self, stage_instance_id: &str) -> EngineResult<StageInstance> {
        self.stage_repo
            .find_by_id(stage_instance_id)
            .map_err(EngineError::from_repository)?
            .ok_or_else(|| EngineError::not_found("StageInstance", stage_instance_id))
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn lock_error<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::Repository(RepositoryError::LockError(e.to_string()))
}

fn ensure_quantity(field: &str, value: f64) -> EngineResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::InvalidQuantity {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

fn ensure_same_lot(source: &StageInstance, lot_number: &str) -> EngineResult<()> {
    if source.lot_number != lot_number {
        return Err(EngineError::not_found(
            "LotSource",
            &format!("{}/{}", lot_number, source.stage_instance_id),
        ));
    }
    Ok(())
}
