//! Agent module - the provider-agnostic tool-calling loop.
//!
//! This module contains:
//! - Message types (ChatTurn, ToolInvocation, ToolResult)
//! - Model backends and their protocol adapters
//! - The agent loop
//! - Per-request execution context and prompt seeding
//!
//! # Adding a New Provider
//!
//! See [`llm`] for instructions.

pub mod context;
mod loop_impl;
pub mod message;

// Model backends in submodule
pub mod llm;

// Re-exports for convenience
pub use context::ExecutionContext;
pub use llm::{BackendRegistry, ModelBackend, ParsedTurn, ProviderAdapter, Usage};
pub use loop_impl::{AgentLoop, LoopOutcome, Termination, NO_FINAL_TEXT};
pub use message::{ChatTurn, Role, ToolInvocation, ToolOutput, ToolResult};
