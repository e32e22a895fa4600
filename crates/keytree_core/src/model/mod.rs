//! Domain model for the group/entry hierarchy.
//!
//! # Responsibility
//! - Define groups, entries and the ids that address them.
//! - Hold the arena-backed tree and its structural invariant checks.
//!
//! # Invariants
//! - Every node is identified by a stable UUID.
//! - Relations are stored as ids; the tree owns every node exclusively.

pub mod node;
pub mod tree;
