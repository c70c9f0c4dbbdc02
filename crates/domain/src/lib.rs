//! Shared types for the Solace workspace: conversation records, runtime
//! configuration, LLM message/tool shapes, and the common error type.

pub mod config;
pub mod error;
pub mod records;
pub mod stream;
pub mod tool;
pub mod trace;
