//! Inventory, supplier and order queries
//!
//! Every query is scoped to one restaurant; rows belonging to another
//! restaurant behave as if they did not exist.

use super::{parse_datetime, Database, DbError, DbResult};
use super::schema::{InventoryItem, Order, OrderLine, OrderStatus, Supplier};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

/// A requested order line
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderLine {
    pub item_id: i64,
    pub quantity: f64,
}

impl Database {
    // ==================== Inventory ====================

    pub fn search_inventory(
        &self,
        restaurant_id: &str,
        query: Option<&str>,
        below_par: bool,
    ) -> DbResult<Vec<InventoryItem>> {
        let pattern = format!("%{}%", query.unwrap_or_default());
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, unit, quantity, par_level, supplier_id
             FROM inventory_items
             WHERE restaurant_id = ?1 AND name LIKE ?2
             ORDER BY name ASC",
        )?;
        let items = stmt
            .query_map(params![restaurant_id, pattern], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items
            .into_iter()
            .filter(|item| !below_par || item.is_below_par())
            .collect())
    }

    pub fn add_inventory_item(
        &self,
        restaurant_id: &str,
        name: &str,
        unit: &str,
        quantity: f64,
        par_level: f64,
        supplier_id: Option<i64>,
    ) -> DbResult<InventoryItem> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO inventory_items (restaurant_id, name, unit, quantity, par_level, supplier_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![restaurant_id, name, unit, quantity, par_level, supplier_id],
        )?;
        Ok(InventoryItem {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            unit: unit.to_string(),
            quantity,
            par_level,
            supplier_id,
        })
    }

    /// Apply a signed quantity change; stock may not go negative
    pub fn adjust_inventory(
        &self,
        restaurant_id: &str,
        item_id: i64,
        delta: f64,
    ) -> DbResult<InventoryItem> {
        let conn = self.lock();
        let mut item = get_item(&conn, restaurant_id, item_id)?;
        let quantity = item.quantity + delta;
        if quantity < 0.0 {
            return Err(DbError::Invalid(format!(
                "adjustment would leave {} at {quantity} {}",
                item.name, item.unit
            )));
        }
        conn.execute(
            "UPDATE inventory_items SET quantity = ?1 WHERE id = ?2 AND restaurant_id = ?3",
            params![quantity, item_id, restaurant_id],
        )?;
        item.quantity = quantity;
        Ok(item)
    }

    // ==================== Suppliers ====================

    pub fn list_suppliers(&self, restaurant_id: &str, query: Option<&str>) -> DbResult<Vec<Supplier>> {
        let pattern = format!("%{}%", query.unwrap_or_default());
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, contact_email, phone FROM suppliers
             WHERE restaurant_id = ?1 AND name LIKE ?2
             ORDER BY name ASC",
        )?;
        let rows = stmt.query_map(params![restaurant_id, pattern], supplier_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn add_supplier(
        &self,
        restaurant_id: &str,
        name: &str,
        contact_email: Option<&str>,
        phone: Option<&str>,
    ) -> DbResult<Supplier> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO suppliers (restaurant_id, name, contact_email, phone) VALUES (?1, ?2, ?3, ?4)",
            params![restaurant_id, name, contact_email, phone],
        )?;
        Ok(Supplier {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            contact_email: contact_email.map(String::from),
            phone: phone.map(String::from),
        })
    }

    // ==================== Orders ====================

    /// Create a draft order; every line must reference this restaurant's stock
    pub fn create_order(
        &self,
        restaurant_id: &str,
        supplier_id: i64,
        created_by: &str,
        lines: &[NewOrderLine],
        note: Option<&str>,
    ) -> DbResult<Order> {
        if lines.is_empty() {
            return Err(DbError::Invalid("an order needs at least one line".to_string()));
        }
        if let Some(line) = lines.iter().find(|l| l.quantity <= 0.0) {
            return Err(DbError::Invalid(format!(
                "quantity for item {} must be positive",
                line.item_id
            )));
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let supplier_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM suppliers WHERE id = ?1 AND restaurant_id = ?2)",
            params![supplier_id, restaurant_id],
            |row| row.get(0),
        )?;
        if !supplier_exists {
            return Err(DbError::NotFound(format!("supplier {supplier_id}")));
        }
        for line in lines {
            get_item(&tx, restaurant_id, line.item_id)?;
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO orders (restaurant_id, supplier_id, status, note, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                restaurant_id,
                supplier_id,
                OrderStatus::Draft.as_str(),
                note,
                created_by,
                now.to_rfc3339()
            ],
        )?;
        let order_id = tx.last_insert_rowid();
        for line in lines {
            tx.execute(
                "INSERT INTO order_lines (order_id, item_id, quantity) VALUES (?1, ?2, ?3)",
                params![order_id, line.item_id, line.quantity],
            )?;
        }
        tx.commit()?;

        Ok(Order {
            id: order_id,
            supplier_id,
            status: OrderStatus::Draft,
            note: note.map(String::from),
            created_by: created_by.to_string(),
            created_at: now,
            lines: lines
                .iter()
                .map(|l| OrderLine {
                    item_id: l.item_id,
                    quantity: l.quantity,
                })
                .collect(),
        })
    }

    pub fn list_orders(&self, restaurant_id: &str, status: Option<OrderStatus>) -> DbResult<Vec<Order>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM orders
             WHERE restaurant_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC, id DESC",
        )?;
        let ids = stmt
            .query_map(params![restaurant_id, status.map(OrderStatus::as_str)], |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        ids.into_iter()
            .map(|id| get_order(&conn, restaurant_id, id))
            .collect()
    }

    pub fn update_order_status(
        &self,
        restaurant_id: &str,
        order_id: i64,
        status: OrderStatus,
    ) -> DbResult<Order> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND restaurant_id = ?4",
            params![status.as_str(), Utc::now().to_rfc3339(), order_id, restaurant_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("order {order_id}")));
        }
        get_order(&conn, restaurant_id, order_id)
    }
}

fn get_item(conn: &Connection, restaurant_id: &str, item_id: i64) -> DbResult<InventoryItem> {
    conn.query_row(
        "SELECT id, name, unit, quantity, par_level, supplier_id
         FROM inventory_items WHERE id = ?1 AND restaurant_id = ?2",
        params![item_id, restaurant_id],
        item_from_row,
    )
    .optional()?
    .ok_or_else(|| DbError::NotFound(format!("inventory item {item_id}")))
}

fn get_order(conn: &Connection, restaurant_id: &str, order_id: i64) -> DbResult<Order> {
    let order = conn
        .query_row(
            "SELECT id, supplier_id, status, note, created_by, created_at
             FROM orders WHERE id = ?1 AND restaurant_id = ?2",
            params![order_id, restaurant_id],
            |row| {
                let status: String = row.get(2)?;
                let status = status.parse::<OrderStatus>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?;
                Ok(Order {
                    id: row.get(0)?,
                    supplier_id: row.get(1)?,
                    status,
                    note: row.get(3)?,
                    created_by: row.get(4)?,
                    created_at: parse_datetime(&row.get::<_, String>(5)?),
                    lines: Vec::new(),
                })
            },
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("order {order_id}")))?;

    let mut stmt =
        conn.prepare("SELECT item_id, quantity FROM order_lines WHERE order_id = ?1 ORDER BY rowid")?;
    let lines = stmt
        .query_map(params![order_id], |row| {
            Ok(OrderLine {
                item_id: row.get(0)?,
                quantity: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Order { lines, ..order })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
    Ok(InventoryItem {
        id: row.get(0)?,
        name: row.get(1)?,
        unit: row.get(2)?,
        quantity: row.get(3)?,
        par_level: row.get(4)?,
        supplier_id: row.get(5)?,
    })
}

fn supplier_from_row(row: &Row<'_>) -> rusqlite::Result<Supplier> {
    Ok(Supplier {
        id: row.get(0)?,
        name: row.get(1)?,
        contact_email: row.get(2)?,
        phone: row.get(3)?,
    })
}
