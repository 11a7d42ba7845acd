//! The central Model Context Protocol engine
//!
//! Validates JSON-RPC framing, negotiates `initialize`, and routes tool, resource and prompt
//! methods. The dispatcher knows nothing about transports: it takes a decoded payload plus the
//! session it arrived on and returns the reply envelope, or `None` for notifications.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, ServerCapabilities, ServerCapabilitiesPrompts,
    ServerCapabilitiesResources, ServerCapabilitiesTools,
};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::domain::{
    resources::{prompts_list_result, resources_list_result},
    tools::{build_tools_list, handle_tools_call},
};
use crate::mcp::rpc::{
    is_json_rpc_error, json_rpc_error, json_rpc_error_with_data, json_rpc_result, peek_request,
    INTERNAL_ERROR, INVALID_REQUEST, METHOD_NOT_FOUND,
};
use crate::registry::RegistryHandle;
use crate::session::SessionTable;

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";
pub const NOTIFICATION_PREFIX: &str = "notifications/";

pub struct Dispatcher {
    registry: Arc<RegistryHandle>,
    sessions: SessionTable,
}

impl Dispatcher {
    pub fn new(registry: Arc<RegistryHandle>, sessions: SessionTable) -> Self {
        Self { registry, sessions }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Handles one decoded JSON-RPC payload. Never panics outward: any failure inside a handler
    /// becomes an internal error envelope.
    pub async fn dispatch(&self, payload: Value, session_id: Option<&str>) -> Option<Value> {
        let request_id = payload.get("id").cloned();
        match AssertUnwindSafe(self.dispatch_inner(payload, session_id))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(error = %message, "mcp handler panicked");
                Some(json_rpc_error_with_data(
                    request_id,
                    INTERNAL_ERROR,
                    "Internal error",
                    Some(json!({ "reason": message })),
                ))
            }
        }
    }

    async fn dispatch_inner(&self, payload: Value, session_id: Option<&str>) -> Option<Value> {
        if !payload.is_object() {
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        }

        let request_id = payload.get("id").cloned();
        let Some(request) = peek_request(&payload) else {
            return Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request"));
        };

        if request.jsonrpc.as_ref().and_then(Value::as_str) != Some("2.0") {
            return Some(json_rpc_error_with_data(
                request.id,
                INVALID_REQUEST,
                "Invalid Request",
                Some(json!({ "reason": "jsonrpc must be \"2.0\"" })),
            ));
        }

        let Some(method) = request.method_name().map(str::to_string) else {
            return Some(json_rpc_error_with_data(
                request.id,
                INVALID_REQUEST,
                "Invalid Request",
                Some(json!({ "reason": "method is required" })),
            ));
        };

        if method.starts_with(NOTIFICATION_PREFIX) {
            handle_notification(&method, session_id);
            return None;
        }

        Some(
            self.handle_request(request.id, method, request.params, session_id)
                .await,
        )
    }

    async fn handle_request(
        &self,
        id: Option<Value>,
        method: String,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Value {
        let audit_params = redact_audit_params(params.as_ref());

        let response = match method.as_str() {
            "initialize" => self.handle_initialize(id, params.as_ref(), session_id),
            "ping" => json_rpc_result(id, json!({})),
            "tools/list" => {
                let registry = self.registry.snapshot();
                json_rpc_result(id, json!({ "tools": build_tools_list(&registry) }))
            }
            "tools/call" => {
                let registry = self.registry.snapshot();
                handle_tools_call(&registry, id, params).await
            }
            "resources/list" => json_rpc_result(id, resources_list_result()),
            "prompts/list" => json_rpc_result(id, prompts_list_result()),
            _ => json_rpc_error_with_data(
                id,
                METHOD_NOT_FOUND,
                "Method not found",
                Some(json!({ "method": method })),
            ),
        };

        info!(
            method = %method,
            session_id = session_id.unwrap_or("-"),
            params = %audit_params,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }

    fn handle_initialize(
        &self,
        id: Option<Value>,
        params: Option<&Value>,
        session_id: Option<&str>,
    ) -> Value {
        let client_info = params
            .and_then(|params| params.get("clientInfo"))
            .cloned();

        match session_id {
            Some(session_id) if self.sessions.mark_initialized(session_id, client_info) => {
                debug!(session_id = %session_id, "session initialized");
            }
            Some(session_id) => {
                warn!(session_id = %session_id, "initialize for unknown session");
            }
            None => debug!("initialize without session"),
        }

        match serde_json::to_value(initialize_result()) {
            Ok(result) => json_rpc_result(id, result),
            Err(err) => json_rpc_error(id, INTERNAL_ERROR, &err.to_string()),
        }
    }
}

pub fn initialize_result() -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(true),
            }),
            resources: Some(ServerCapabilitiesResources {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
            prompts: Some(ServerCapabilitiesPrompts {
                list_changed: Some(false),
            }),
            logging: Some(Map::new()),
            ..Default::default()
        },
        protocol_version: SUPPORTED_PROTOCOL_VERSION.to_string(),
        instructions: None,
        meta: None,
    }
}

fn handle_notification(method: &str, session_id: Option<&str>) {
    let session_id = session_id.unwrap_or("-");
    match method {
        "notifications/initialized" => debug!(session_id, "client finished initialization"),
        // In-flight calls always run to completion.
        "notifications/cancelled" => debug!(session_id, "cancellation acknowledged"),
        "notifications/progress" | "notifications/message" => {
            debug!(session_id, method, "notification received")
        }
        _ => debug!(session_id, method, "unhandled notification ignored"),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "handler panicked".to_string()
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey" | "access_key_id" | "session_token"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::registry::{
        testing::FixedOperation, Operation, OperationError, OperationRegistry, RegistryBuilder,
    };
    use crate::session::Transport;

    struct PanickingOperation {
        schema: Arc<Value>,
    }

    #[async_trait]
    impl Operation for PanickingOperation {
        fn name(&self) -> &str {
            "sts_get_caller_identity"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn input_schema(&self) -> &Arc<Value> {
            &self.schema
        }

        async fn invoke(
            &self,
            _call_id: &str,
            _args: Map<String, Value>,
        ) -> Result<Value, OperationError> {
            panic!("credential provider exploded")
        }
    }

    fn dispatcher(registry: OperationRegistry) -> (Dispatcher, SessionTable) {
        let sessions = SessionTable::new();
        let dispatcher = Dispatcher::new(Arc::new(RegistryHandle::new(registry)), sessions.clone());
        (dispatcher, sessions)
    }

    #[tokio::test]
    async fn initialize_marks_session_and_reports_capabilities() {
        let (dispatcher, sessions) = dispatcher(OperationRegistry::empty());
        let session_id = sessions.open(Transport::Sse);

        let response = dispatcher
            .dispatch(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {"clientInfo": {"name": "inspector", "version": "0.9"}}
                }),
                Some(session_id.as_str()),
            )
            .await
            .expect("initialize replies");

        assert_eq!(response["result"]["protocolVersion"], SUPPORTED_PROTOCOL_VERSION);
        assert_eq!(response["result"]["capabilities"]["tools"]["listChanged"], true);
        assert!(response["result"]["capabilities"]["resources"].is_object());
        assert!(response["result"]["capabilities"]["prompts"].is_object());
        assert!(response["result"]["capabilities"]["logging"].is_object());
        assert_eq!(response["result"]["serverInfo"]["name"], env!("CARGO_PKG_NAME"));

        let info = sessions.lookup(&session_id).expect("session exists");
        assert!(info.initialized);
        assert_eq!(info.client_info, Some(json!({"name": "inspector", "version": "0.9"})));
    }

    #[tokio::test]
    async fn wrong_version_is_invalid_request_for_any_method() {
        let (dispatcher, _) = dispatcher(OperationRegistry::empty());

        for method in ["initialize", "tools/list", "notifications/initialized", "bogus"] {
            let response = dispatcher
                .dispatch(json!({"jsonrpc": "1.0", "id": 9, "method": method}), None)
                .await
                .expect("framing errors always reply");
            assert_eq!(response["error"]["code"], -32600, "method {method}");
            assert_eq!(response["id"], 9);
        }

        let response = dispatcher
            .dispatch(json!({"id": 10, "method": "tools/list"}), None)
            .await
            .expect("missing version replies");
        assert_eq!(response["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn non_object_payload_is_invalid_request() {
        let (dispatcher, _) = dispatcher(OperationRegistry::empty());
        let response = dispatcher
            .dispatch(json!([1, 2, 3]), None)
            .await
            .expect("reply");
        assert_eq!(response["error"]["code"], -32600);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn notifications_produce_no_reply() {
        let (dispatcher, _) = dispatcher(OperationRegistry::empty());

        for method in [
            "notifications/initialized",
            "notifications/cancelled",
            "notifications/progress",
            "notifications/message",
            "notifications/roots/list_changed",
        ] {
            let response = dispatcher
                .dispatch(json!({"jsonrpc": "2.0", "method": method, "params": {}}), None)
                .await;
            assert!(response.is_none(), "method {method}");
        }
    }

    #[tokio::test]
    async fn tools_list_with_empty_registry() {
        let (dispatcher, _) = dispatcher(OperationRegistry::empty());
        let response = dispatcher
            .dispatch(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}), None)
            .await
            .expect("reply");

        assert_eq!(
            serde_json::to_string(&response).expect("serialize"),
            r#"{"id":1,"jsonrpc":"2.0","result":{"tools":[]}}"#
        );
    }

    #[tokio::test]
    async fn tools_list_has_one_entry_per_operation() {
        let registry = RegistryBuilder::new()
            .register(FixedOperation::ok("s3_list_buckets", json!([])))
            .and_then(|builder| {
                builder.register(FixedOperation::ok("ec2_describe_vpcs", json!([])))
            })
            .expect("valid registrations")
            .build();
        let (dispatcher, _) = dispatcher(registry);

        let response = dispatcher
            .dispatch(json!({"jsonrpc": "2.0", "id": "a", "method": "tools/list"}), None)
            .await
            .expect("reply");
        let tools = response["result"]["tools"].as_array().expect("tools array");
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "s3_list_buckets");
        assert_eq!(tools[1]["name"], "ec2_describe_vpcs");
    }

    #[tokio::test]
    async fn unknown_method_names_the_method() {
        let (dispatcher, _) = dispatcher(OperationRegistry::empty());
        let response = dispatcher
            .dispatch(json!({"jsonrpc": "2.0", "id": 2, "method": "sampling/create"}), None)
            .await
            .expect("reply");

        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["error"]["data"]["method"], "sampling/create");
    }

    #[tokio::test]
    async fn resources_and_prompts_are_empty() {
        let (dispatcher, _) = dispatcher(OperationRegistry::empty());
        let resources = dispatcher
            .dispatch(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}), None)
            .await
            .expect("reply");
        let prompts = dispatcher
            .dispatch(json!({"jsonrpc": "2.0", "id": 4, "method": "prompts/list"}), None)
            .await
            .expect("reply");

        assert_eq!(resources["result"], json!({"resources": []}));
        assert_eq!(prompts["result"], json!({"prompts": []}));
    }

    #[tokio::test]
    async fn panicking_operation_becomes_internal_error() {
        let registry = RegistryBuilder::new()
            .register(Arc::new(PanickingOperation {
                schema: Arc::new(json!({"type": "object"})),
            }))
            .expect("valid registration")
            .build();
        let (dispatcher, _) = dispatcher(registry);

        let response = dispatcher
            .dispatch(
                json!({
                    "jsonrpc": "2.0",
                    "id": 5,
                    "method": "tools/call",
                    "params": {"name": "sts_get_caller_identity", "arguments": {}}
                }),
                None,
            )
            .await
            .expect("reply");

        assert_eq!(response["error"]["code"], -32603);
        assert_eq!(response["id"], 5);
        assert_eq!(response["error"]["data"]["reason"], "credential provider exploded");
    }

    #[test]
    fn redacts_sensitive_fields_in_audit_params() {
        let params = json!({
            "name": "s3_list_buckets",
            "arguments": {
                "region": "eu-west-1",
                "aws_secret_access_key": "should-not-appear",
                "session_token": "should-not-appear",
                "nested": {
                    "password": "should-not-appear"
                }
            }
        });

        let redacted = redact_audit_params(Some(&params));

        assert_eq!(redacted["name"], json!("s3_list_buckets"));
        assert_eq!(redacted["arguments"]["region"], json!("eu-west-1"));
        assert_eq!(redacted["arguments"]["aws_secret_access_key"], json!("[REDACTED]"));
        assert_eq!(redacted["arguments"]["session_token"], json!("[REDACTED]"));
        assert_eq!(redacted["arguments"]["nested"]["password"], json!("[REDACTED]"));
    }
}
