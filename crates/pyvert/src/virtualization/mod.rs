//! The rewrite passes and the scope analysis they share.

pub mod control_flow;
pub mod function_calls;
pub mod logical_ops;
pub mod scoping;
pub mod variables;
