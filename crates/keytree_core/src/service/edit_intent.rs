//! Pending group-edit dialog intent.
//!
//! # Responsibility
//! - Remember whether the open group dialog creates or updates a group.
//! - Turn a confirmed dialog result into a decision for the caller.
//!
//! # Invariants
//! - At most one intent is pending.
//! - `confirm` and `cancel` always return the state to `None`.
//! - `cancel` never produces a decision.

use crate::model::node::{GroupId, IconId};
use log::debug;

/// Dialog intent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditIntentState {
    #[default]
    None,
    Creating {
        parent: GroupId,
    },
    Updating {
        target: GroupId,
    },
}

/// Values the group dialog reports on confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDraft {
    pub name: String,
    pub icon: IconId,
}

impl GroupDraft {
    pub fn new(name: impl Into<String>, icon: IconId) -> Self {
        Self {
            name: name.into(),
            icon,
        }
    }
}

/// What a confirmed dialog asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditDecision {
    Create {
        parent: GroupId,
        name: String,
        icon: IconId,
    },
    /// Rename/re-icon request; no command exists for it yet.
    Update {
        target: GroupId,
        name: String,
        icon: IconId,
    },
    /// Confirmation arrived with no pending intent.
    Ignored,
}

/// Single-slot intent holder.
#[derive(Debug, Clone, Default)]
pub struct EditIntent {
    state: EditIntentState,
}

impl EditIntent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EditIntentState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state != EditIntentState::None
    }

    /// User asked to add a group under `parent`.
    pub fn begin_create(&mut self, parent: GroupId) {
        self.replace(EditIntentState::Creating { parent });
    }

    /// User asked to edit the existing group `target`.
    pub fn begin_update(&mut self, target: GroupId) {
        self.replace(EditIntentState::Updating { target });
    }

    /// Consumes the pending intent with the dialog's confirmed values.
    pub fn confirm(&mut self, draft: GroupDraft) -> EditDecision {
        let GroupDraft { name, icon } = draft;
        match std::mem::take(&mut self.state) {
            EditIntentState::Creating { parent } => EditDecision::Create { parent, name, icon },
            EditIntentState::Updating { target } => EditDecision::Update { target, name, icon },
            EditIntentState::None => EditDecision::Ignored,
        }
    }

    /// Drops the pending intent without a decision.
    pub fn cancel(&mut self) {
        self.state = EditIntentState::None;
    }

    fn replace(&mut self, next: EditIntentState) {
        if self.is_pending() {
            debug!(
                "event=edit_intent module=service status=replaced previous={:?} next={:?}",
                self.state, next
            );
        }
        self.state = next;
    }
}
