//! Inventory tools

use super::{parse_input, to_output, Tool, ToolContext, ToolError};
use crate::db::Database;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Look up stock levels
pub struct SearchInventoryTool {
    db: Database,
}

impl SearchInventoryTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, Deserialize)]
struct SearchInventoryInput {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    below_par: bool,
}

#[async_trait]
impl Tool for SearchInventoryTool {
    fn name(&self) -> &'static str {
        "search_inventory"
    }

    fn description(&self) -> String {
        "Search the restaurant's inventory by item name. Returns each item's id, unit, current \
         quantity, par level and usual supplier. Set below_par to list only items that need \
         reordering."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Case-insensitive substring of the item name"
                },
                "below_par": {
                    "type": "boolean",
                    "description": "Only return items whose quantity is under par"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: SearchInventoryInput = parse_input(input)?;
        let items = self.db.search_inventory(
            &ctx.restaurant_id,
            input.query.as_deref(),
            input.below_par,
        )?;
        Ok(json!({ "items": to_output(&items)? }))
    }
}

/// Record a stock change such as a delivery, waste or a count correction
pub struct AdjustInventoryTool {
    db: Database,
}

impl AdjustInventoryTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, Deserialize)]
struct AdjustInventoryInput {
    item_id: i64,
    delta: f64,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl Tool for AdjustInventoryTool {
    fn name(&self) -> &'static str {
        "adjust_inventory"
    }

    fn description(&self) -> String {
        "Adjust the on-hand quantity of an inventory item by a signed amount, in the item's \
         unit. Use positive values for deliveries and negative values for usage or waste."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["item_id", "delta"],
            "properties": {
                "item_id": { "type": "integer" },
                "delta": { "type": "number" },
                "reason": { "type": "string" }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: AdjustInventoryInput = parse_input(input)?;
        if !input.delta.is_finite() {
            return Err(ToolError::invalid_input("delta must be a finite number"));
        }
        let item = self
            .db
            .adjust_inventory(&ctx.restaurant_id, input.item_id, input.delta)?;
        tracing::info!(
            item_id = item.id,
            delta = input.delta,
            reason = input.reason.as_deref().unwrap_or(""),
            user_id = %ctx.user_id,
            "Inventory adjusted"
        );
        Ok(json!({ "item": to_output(&item)? }))
    }
}
