//! Core of the keytree password store.
//! This crate owns the group/entry tree and every structural mutation of it.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::node::{
    AttachmentId, Entry, EntryId, Group, GroupId, IconId, Node, NodeRef, DEFAULT_ICON,
};
pub use model::tree::{NodeTree, RemovedSubtree, TreeError, TreeResult, TreeViolation};
pub use repo::tree_repo::{PersistError, PersistResult, PersistenceGateway, SqliteTreeRepository};
pub use service::browser::{
    BrowserSettings, BrowserWarning, Completion, GroupBrowser, OpenTarget, TreeObserver,
};
pub use service::edit_intent::{EditDecision, EditIntent, EditIntentState, GroupDraft};
pub use service::mutation::{MutationCommand, MutationError, MutationOutcome, MutationResult};
pub use service::store::{StoreError, StoreHandle, StoreOptions, StoreState};
pub use service::task_runner::{
    NoProgress, PendingMutation, ProgressObserver, RunnerError, TaskRunner, SAVING_LABEL,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
