// ==========================================
// 纺织生产流转引擎 - 生产订单仓储 (只读外部实体)
// ==========================================
// 对齐: production_order / production_order_stage 表
// 说明: 订单归外部协作方所有; upsert 供其同步数据 (及测试) 使用,
//       引擎自身只读取
// ==========================================

use crate::domain::production_order::ProductionOrder;
use crate::domain::types::QuantityUnit;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::enum_col;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::{Arc, Mutex};

pub struct ProductionOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProductionOrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入/覆盖订单及其工序列表
    pub fn upsert(&self, order: &ProductionOrder) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT INTO production_order (production_order_id, order_quantity, quantity_unit)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(production_order_id) DO UPDATE
               SET order_quantity = ?2, quantity_unit = ?3"#,
            params![
                order.production_order_id,
                order.order_quantity,
                order.quantity_unit.to_db_str(),
            ],
        )?;

        tx.execute(
            "DELETE FROM production_order_stage WHERE production_order_id = ?1",
            params![order.production_order_id],
        )?;
        for (position, stage_id) in order.stage_instance_ids.iter().enumerate() {
            tx.execute(
                r#"INSERT INTO production_order_stage (production_order_id, position, stage_instance_id)
                   VALUES (?1, ?2, ?3)"#,
                params![order.production_order_id, position as i64, stage_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 按 ID 查询订单 (工序按流水线顺序)
    pub fn find_by_id(&self, production_order_id: &str) -> RepositoryResult<Option<ProductionOrder>> {
        let conn = self.get_conn()?;

        let header = conn
            .query_row(
                "SELECT order_quantity, quantity_unit FROM production_order WHERE production_order_id = ?1",
                params![production_order_id],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        enum_col(row, 1, "quantity_unit", QuantityUnit::from_str)?,
                    ))
                },
            )
            .optional()?;

        let Some((order_quantity, quantity_unit)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            r#"SELECT stage_instance_id FROM production_order_stage
               WHERE production_order_id = ?1 ORDER BY position"#,
        )?;
        let stage_instance_ids = stmt
            .query_map(params![production_order_id], |row| row.get(0))?
            .collect::<SqliteResult<Vec<String>>>()?;

        Ok(Some(ProductionOrder {
            production_order_id: production_order_id.to_string(),
            order_quantity,
            quantity_unit,
            stage_instance_ids,
        }))
    }
}
