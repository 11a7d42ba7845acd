//! Resource and prompt listings
//!
//! Both features are advertised during `initialize` but nothing is published yet, so the lists
//! are always empty.

use rust_mcp_sdk::schema::{ListPromptsResult, ListResourcesResult};
use serde_json::{json, Value};

pub fn resources_list_result() -> Value {
    serde_json::to_value(ListResourcesResult {
        meta: None,
        next_cursor: None,
        resources: vec![],
    })
    .unwrap_or_else(|_| json!({ "resources": [] }))
}

pub fn prompts_list_result() -> Value {
    serde_json::to_value(ListPromptsResult {
        meta: None,
        next_cursor: None,
        prompts: vec![],
    })
    .unwrap_or_else(|_| json!({ "prompts": [] }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn listings_are_empty() {
        assert_eq!(resources_list_result(), json!({ "resources": [] }));
        assert_eq!(prompts_list_result(), json!({ "prompts": [] }));
    }
}
