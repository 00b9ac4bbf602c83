//! Switchboard - multi-backend LLM task orchestrator
//!
//! This library classifies requests, routes them to the backend suited to
//! their category and drives a tool-calling agent loop over browser
//! automation, built-in workspace writes and per-user MCP tools.

pub mod agent;
pub mod browser;
pub mod collaborators;
pub mod mcp;
pub mod orchestrator;
pub mod tools;
pub mod adapters;
pub mod config;
pub mod error;
pub mod locks;
pub mod retry;
pub mod ui;

pub use error::{Error, Result};
