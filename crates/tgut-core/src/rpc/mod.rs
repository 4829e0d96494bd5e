//! JSON-RPC transport between the two windows.
//!
//! Provides HTTP-based JSON-RPC 2.0 with positional parameters, the dialect
//! Python `jsonrpclib` speaks, so the Raspberry Pi PWM endpoint can be either
//! `tgut-pwm` or the legacy Python server.
//!
//! # Architecture
//!
//! - **Server**: Binds a port, serves a procedure table from a background task
//! - **Client**: Calls procedures on one fixed peer address
//! - **Protocol**: Shared request/response types and argument helpers

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RpcClient;
pub use protocol::{arg_bool, arg_i64, arg_str, is_truthy, RpcRequest, RpcResponse};
pub use server::{Procedure, ProcedureTable, RpcServer, RpcServerHandle};
