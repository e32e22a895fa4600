//! Mutation engine services.
//!
//! # Responsibility
//! - Own the opened-store handle and its mutation guard.
//! - Run structural commands off the interactive path and report completion.
//! - Keep presentation layers decoupled from tree and storage details.

pub mod browser;
pub mod edit_intent;
pub mod mutation;
pub mod store;
pub mod task_runner;
