//! System prompt construction
//!
//! The instruction text is fixed; only the caller's restaurant, access
//! level and today's date are appended.

use crate::tools::AccessScope;
use chrono::Utc;
use std::fmt::Write;

/// Base system prompt establishing the assistant's role
const BASE_PROMPT: &str = r"You are a procurement assistant for a restaurant. You help the operator keep track of inventory, suppliers and purchase orders by calling the tools available to you.

Always look data up with a tool instead of guessing quantities, prices, ids or order states. Quantities are in each item's own unit.

Before creating an order or changing stock, restate what you are about to do. If a tool returns an error, explain it plainly and suggest what the operator can do next.

Be concise.";

const MANAGER_NOTE: &str =
    "The operator is a manager and may change order status and add suppliers.";

const STAFF_NOTE: &str = "The operator is staff. Submitting, receiving or cancelling orders and adding suppliers require a manager; say so if asked.";

/// Build the system prompt for one caller
pub fn build_system_prompt(restaurant_id: &str, scope: AccessScope) -> String {
    let mut prompt = String::from(BASE_PROMPT);
    let note = match scope {
        AccessScope::Manager => MANAGER_NOTE,
        AccessScope::Staff => STAFF_NOTE,
    };
    let _ = write!(
        prompt,
        "\n\n<context>\nRestaurant: {restaurant_id}\nToday: {}\n{note}\n</context>",
        Utc::now().format("%Y-%m-%d")
    );
    prompt
}
