//! Persistence boundary for the node tree.
//!
//! # Responsibility
//! - Define the gateway contract mutations call after changing the tree.
//! - Isolate SQLite snapshot details from command orchestration.
//!
//! # Invariants
//! - Gateways see the tree only after an in-memory mutation completed.
//! - Repository APIs return semantic errors (`InvalidData`, `Tree`) in
//!   addition to DB transport errors.

pub mod tree_repo;
