//! MCP feature handlers
//!
//! Maps the tool, resource and prompt methods onto the operation registry.

pub mod resources;
pub mod tools;
