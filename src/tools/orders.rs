//! Purchase order tools

use super::{parse_input, to_output, AccessScope, Tool, ToolContext, ToolError};
use crate::db::{Database, NewOrderLine, OrderStatus};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Create a draft purchase order with one supplier
pub struct CreateOrderTool {
    db: Database,
}

impl CreateOrderTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, Deserialize)]
struct CreateOrderInput {
    supplier_id: i64,
    lines: Vec<NewOrderLine>,
    #[serde(default)]
    note: Option<String>,
}

#[async_trait]
impl Tool for CreateOrderTool {
    fn name(&self) -> &'static str {
        "create_order"
    }

    fn description(&self) -> String {
        "Create a draft purchase order with a single supplier. Each line names an inventory \
         item id and a quantity in that item's unit. Confirm quantities with the operator \
         before creating an order."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["supplier_id", "lines"],
            "properties": {
                "supplier_id": { "type": "integer" },
                "lines": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["item_id", "quantity"],
                        "properties": {
                            "item_id": { "type": "integer" },
                            "quantity": { "type": "number", "exclusiveMinimum": 0 }
                        }
                    }
                },
                "note": { "type": "string" }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: CreateOrderInput = parse_input(input)?;
        let order = self.db.create_order(
            &ctx.restaurant_id,
            input.supplier_id,
            &ctx.user_id,
            &input.lines,
            input.note.as_deref(),
        )?;
        tracing::info!(order_id = order.id, supplier_id = order.supplier_id, "Order created");
        Ok(json!({ "order": to_output(&order)? }))
    }
}

pub struct ListOrdersTool {
    db: Database,
}

impl ListOrdersTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, Deserialize)]
struct ListOrdersInput {
    #[serde(default)]
    status: Option<OrderStatus>,
}

#[async_trait]
impl Tool for ListOrdersTool {
    fn name(&self) -> &'static str {
        "list_orders"
    }

    fn description(&self) -> String {
        "List purchase orders, newest first, optionally filtered by status.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["draft", "submitted", "received", "cancelled"]
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: ListOrdersInput = parse_input(input)?;
        let orders = self.db.list_orders(&ctx.restaurant_id, input.status)?;
        Ok(json!({ "orders": to_output(&orders)? }))
    }
}

/// Manager-only: move an order through its lifecycle
pub struct UpdateOrderStatusTool {
    db: Database,
}

impl UpdateOrderStatusTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateOrderStatusInput {
    order_id: i64,
    status: OrderStatus,
}

#[async_trait]
impl Tool for UpdateOrderStatusTool {
    fn name(&self) -> &'static str {
        "update_order_status"
    }

    fn description(&self) -> String {
        "Change the status of a purchase order (submit, mark received, or cancel).".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["order_id", "status"],
            "properties": {
                "order_id": { "type": "integer" },
                "status": {
                    "type": "string",
                    "enum": ["draft", "submitted", "received", "cancelled"]
                }
            }
        })
    }

    fn required_scope(&self) -> AccessScope {
        AccessScope::Manager
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: UpdateOrderStatusInput = parse_input(input)?;
        let order = self
            .db
            .update_order_status(&ctx.restaurant_id, input.order_id, input.status)?;
        Ok(json!({ "order": to_output(&order)? }))
    }
}
