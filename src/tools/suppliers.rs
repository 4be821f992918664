//! Supplier tools

use super::{parse_input, to_output, AccessScope, Tool, ToolContext, ToolError};
use crate::db::Database;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct ListSuppliersTool {
    db: Database,
}

impl ListSuppliersTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, Deserialize)]
struct ListSuppliersInput {
    #[serde(default)]
    query: Option<String>,
}

#[async_trait]
impl Tool for ListSuppliersTool {
    fn name(&self) -> &'static str {
        "list_suppliers"
    }

    fn description(&self) -> String {
        "List the restaurant's suppliers with their ids and contact details, optionally \
         filtered by name."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Substring of the supplier name" }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: ListSuppliersInput = parse_input(input)?;
        let suppliers = self
            .db
            .list_suppliers(&ctx.restaurant_id, input.query.as_deref())?;
        Ok(json!({ "suppliers": to_output(&suppliers)? }))
    }
}

/// Manager-only: register a new supplier
pub struct AddSupplierTool {
    db: Database,
}

impl AddSupplierTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, Deserialize)]
struct AddSupplierInput {
    name: String,
    #[serde(default)]
    contact_email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[async_trait]
impl Tool for AddSupplierTool {
    fn name(&self) -> &'static str {
        "add_supplier"
    }

    fn description(&self) -> String {
        "Add a new supplier to the restaurant's supplier list.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": { "type": "string" },
                "contact_email": { "type": "string" },
                "phone": { "type": "string" }
            }
        })
    }

    fn required_scope(&self) -> AccessScope {
        AccessScope::Manager
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: AddSupplierInput = parse_input(input)?;
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ToolError::invalid_input("name must not be empty"));
        }
        let supplier = self.db.add_supplier(
            &ctx.restaurant_id,
            name,
            input.contact_email.as_deref(),
            input.phone.as_deref(),
        )?;
        Ok(json!({ "supplier": to_output(&supplier)? }))
    }
}
