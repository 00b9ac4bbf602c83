//! Adapters module - front ends over the orchestrator.
//!
//! # Supported Front Ends
//!
//! - **CLI** - single request or interactive command line session
//!
//! The web layer, cookie auth and chat persistence live outside this crate;
//! they call [`crate::orchestrator::Orchestrator::handle`] the same way the
//! CLI does.

pub mod cli;
