//! Model Context Protocol JSON-RPC handling
//!
//! Envelope construction lives in `rpc`; method routing and the dispatcher live in `server`.

pub mod rpc;
pub mod server;
