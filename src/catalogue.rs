//! Built-in operations registered at startup
//!
//! Remote service wrappers are registered next to these by the embedding binary.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::registry::{Operation, OperationError, RegistryBuilder, RegistryError};
use crate::session::SessionTable;

pub struct EchoOperation {
    schema: Arc<Value>,
}

impl EchoOperation {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(json!({
                "type": "object",
                "description": "Any arguments; they are returned unchanged",
                "additionalProperties": true
            })),
        }
    }
}

impl Default for EchoOperation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for EchoOperation {
    fn name(&self) -> &str {
        "gateway_echo"
    }

    fn description(&self) -> &str {
        "Return the supplied arguments unchanged"
    }

    fn input_schema(&self) -> &Arc<Value> {
        &self.schema
    }

    async fn invoke(
        &self,
        _call_id: &str,
        args: Map<String, Value>,
    ) -> Result<Value, OperationError> {
        Ok(Value::Object(args))
    }
}

/// Reports how many connected sessions each transport currently holds.
pub struct SessionsOperation {
    sessions: SessionTable,
    schema: Arc<Value>,
}

impl SessionsOperation {
    pub fn new(sessions: SessionTable) -> Self {
        Self {
            sessions,
            schema: Arc::new(json!({
                "type": "object",
                "properties": {
                    "session_id": {
                        "type": "string",
                        "description": "Describe a single session instead of the totals"
                    }
                }
            })),
        }
    }
}

#[async_trait]
impl Operation for SessionsOperation {
    fn name(&self) -> &str {
        "gateway_sessions"
    }

    fn description(&self) -> &str {
        "Summarize live MCP sessions per transport"
    }

    fn input_schema(&self) -> &Arc<Value> {
        &self.schema
    }

    async fn invoke(
        &self,
        _call_id: &str,
        args: Map<String, Value>,
    ) -> Result<Value, OperationError> {
        match args.get("session_id") {
            None => {
                let counts = self.sessions.live_counts();
                Ok(Value::String(format!(
                    "{} sse session(s), {} stream session(s)",
                    counts.sse, counts.stream
                )))
            }
            Some(Value::String(session_id)) => {
                let info = self.sessions.lookup(session_id).ok_or_else(|| {
                    OperationError::Failed(format!("session {session_id} not found"))
                })?;
                serde_json::to_value(info).map_err(|err| OperationError::Failed(err.to_string()))
            }
            Some(_) => Err(OperationError::InvalidArguments(
                "session_id must be a string".to_string(),
            )),
        }
    }
}

pub fn register_builtin(
    builder: RegistryBuilder,
    sessions: &SessionTable,
) -> Result<RegistryBuilder, RegistryError> {
    builder
        .register(Arc::new(EchoOperation::new()))?
        .register(Arc::new(SessionsOperation::new(sessions.clone())))
}
