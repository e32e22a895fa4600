//! Presentation-facing entry points for browsing and editing one group.
//!
//! # Responsibility
//! - Expose open/create/edit/delete requests to a presentation layer.
//! - Drive the edit-dialog intent and dispatch commands through the runner.
//! - Notify a `TreeObserver` of successful structural changes.
//!
//! # Invariants
//! - At most one dispatched command is pending per browser.
//! - Observers hear about a change exactly once, and only when it was saved.
//! - The current group always exists in the tree after a completion is
//!   collected, saved or not.
//! - Observer callbacks run on the thread that calls `pump`/`wait_for_completion`.

use crate::model::node::{EntryId, GroupId, Node, NodeRef};
use crate::model::tree::TreeResult;
use crate::service::edit_intent::{EditDecision, EditIntent, EditIntentState, GroupDraft};
use crate::service::mutation::{MutationCommand, MutationResult};
use crate::service::task_runner::{
    NoProgress, PendingMutation, ProgressObserver, RunnerError, TaskRunner,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Contract the presentation layer implements to keep its list in sync.
pub trait TreeObserver {
    fn on_node_added(&mut self, node: &Node);
    fn on_node_removed(&mut self, node: &Node);
    /// A node opened or edited earlier may have changed.
    fn on_node_updated(&mut self, _node: &Node) {}
}

/// User preferences read by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Warn on the root screen when the store is read-only.
    pub show_read_only_warning: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            show_read_only_warning: true,
        }
    }
}

/// Screen the presentation layer should show after `open_node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTarget {
    Group(GroupId),
    Entry(EntryId),
}

/// Banner the presentation layer should show for the current group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserWarning {
    ReadOnly,
}

/// Outcome of polling the pending command.
pub type Completion = Result<MutationResult, RunnerError>;

/// Controller for one group screen.
pub struct GroupBrowser<O: TreeObserver> {
    runner: TaskRunner,
    observer: O,
    settings: BrowserSettings,
    progress: Arc<dyn ProgressObserver + Sync>,
    current: GroupId,
    intent: EditIntent,
    pending: Option<PendingMutation>,
    registered: Option<NodeRef>,
}

impl<O: TreeObserver> GroupBrowser<O> {
    /// Creates a browser on `current`, or on the root when `None`.
    ///
    /// # Errors
    /// - `NotFound` when `current` is not in the tree.
    pub fn new(runner: TaskRunner, observer: O, current: Option<GroupId>) -> TreeResult<Self> {
        let current = runner.store().read(|tree| match current {
            Some(id) => tree.lookup_group(id).map(|group| group.id),
            None => Ok(tree.root_id()),
        })?;
        Ok(Self {
            runner,
            observer,
            settings: BrowserSettings::default(),
            progress: Arc::new(NoProgress),
            current,
            intent: EditIntent::new(),
            pending: None,
            registered: None,
        })
    }

    pub fn with_settings(mut self, settings: BrowserSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver + Sync>) -> Self {
        self.progress = progress;
        self
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn current_group(&self) -> GroupId {
        self.current
    }

    pub fn intent_state(&self) -> EditIntentState {
        self.intent.state()
    }

    /// `true` while a dispatched command has not been collected.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.runner.store().read(|tree| tree.is_root(self.current))
    }

    pub fn add_group_enabled(&self) -> bool {
        !self.runner.store().is_read_only()
    }

    pub fn add_entry_enabled(&self) -> bool {
        !self.runner.store().is_read_only()
            && self.runner.store().read(|tree| tree.can_add_entry(self.current))
    }

    pub fn can_navigate_up(&self) -> bool {
        self.runner
            .store()
            .read(|tree| tree.parent_of(self.current).ok().flatten().is_some())
    }

    /// Banners to show for the current group.
    pub fn warnings(&self) -> Vec<BrowserWarning> {
        let mut warnings = Vec::new();
        if self.settings.show_read_only_warning
            && self.runner.store().is_read_only()
            && self.is_root()
        {
            warnings.push(BrowserWarning::ReadOnly);
        }
        warnings
    }

    /// Opens a node: groups become the current group, entries are handed back
    /// for the entry screen. The node is registered for a later refresh.
    pub fn open_node(&mut self, node: NodeRef) -> TreeResult<OpenTarget> {
        let target = self.runner.store().read(|tree| match node {
            NodeRef::Group(id) => tree.lookup_group(id).map(|_| OpenTarget::Group(id)),
            NodeRef::Entry(id) => tree.lookup_entry(id).map(|_| OpenTarget::Entry(id)),
        })?;
        self.registered = Some(node);
        if let OpenTarget::Group(id) = target {
            self.current = id;
        }
        Ok(target)
    }

    /// Moves to the parent of the current group; `false` at the root.
    pub fn navigate_up(&mut self) -> bool {
        let parent = self
            .runner
            .store()
            .read(|tree| tree.parent_of(self.current).ok().flatten().map(|group| group.id));
        match parent {
            Some(parent) => {
                self.current = parent;
                true
            }
            None => false,
        }
    }

    /// Tells the observer to redraw the node registered by open/edit.
    ///
    /// Returns `false` when nothing was registered or the node is gone.
    pub fn refresh_registered(&mut self) -> bool {
        let Some(node) = self.registered.take() else {
            return false;
        };
        let snapshot = self.runner.store().read(|tree| match node {
            NodeRef::Group(id) => tree.lookup_group(id).cloned().map(Node::Group),
            NodeRef::Entry(id) => tree.lookup_entry(id).cloned().map(Node::Entry),
        });
        match snapshot {
            Ok(snapshot) => {
                self.observer.on_node_updated(&snapshot);
                true
            }
            Err(_) => false,
        }
    }

    /// Opens the group dialog in creation mode.
    pub fn request_create_group(&mut self, parent: GroupId) {
        self.intent.begin_create(parent);
    }

    /// Opens the group dialog in update mode for an existing group.
    pub fn request_edit_group(&mut self, group: GroupId) {
        self.registered = Some(NodeRef::Group(group));
        self.intent.begin_update(group);
    }

    /// Applies a confirmed dialog result.
    ///
    /// Creation dispatches `CreateGroup`; update is reported back without a
    /// command. The intent is cleared in every case.
    pub fn confirm_edit(&mut self, draft: GroupDraft) -> Result<EditDecision, RunnerError> {
        let decision = self.intent.confirm(draft);
        match &decision {
            EditDecision::Create { parent, name, icon } => {
                self.dispatch(MutationCommand::create_group(*parent, name.clone(), *icon))?;
            }
            EditDecision::Update { target, .. } => {
                info!(
                    "event=edit_confirm module=service status=skipped op=update_group target={target} reason=unsupported"
                );
            }
            EditDecision::Ignored => {}
        }
        Ok(decision)
    }

    /// Closes the dialog without changes.
    pub fn cancel_edit(&mut self) {
        self.intent.cancel();
    }

    /// Deletes a group or entry; there is no confirmation step.
    pub fn request_delete(&mut self, node: NodeRef) -> Result<(), RunnerError> {
        self.dispatch(MutationCommand::delete(node))
    }

    /// Collects the pending result without blocking and notifies the observer.
    pub fn pump(&mut self) -> Option<Completion> {
        let completion = self.pending.as_mut()?.try_take()?;
        self.pending = None;
        self.finish(&completion);
        Some(completion)
    }

    /// Blocks until the pending command finished and notifies the observer.
    pub fn wait_for_completion(&mut self) -> Option<Completion> {
        let completion = self.pending.take()?.wait();
        self.finish(&completion);
        Some(completion)
    }

    fn dispatch(&mut self, command: MutationCommand) -> Result<(), RunnerError> {
        if self.pending.is_some() {
            return Err(RunnerError::Busy);
        }
        let pending = self.runner.run(command, Arc::clone(&self.progress))?;
        self.pending = Some(pending);
        Ok(())
    }

    fn finish(&mut self, completion: &Completion) {
        if let Ok(Ok(outcome)) = completion {
            if let Some(node) = outcome.node() {
                if outcome.is_addition() {
                    self.observer.on_node_added(&node);
                } else {
                    self.observer.on_node_removed(&node);
                }
            }
        }

        // A failed save still applied the change in memory.
        let current_gone = self
            .runner
            .store()
            .read(|tree| (!tree.contains_group(self.current)).then(|| tree.root_id()));
        if let Some(root) = current_gone {
            self.current = root;
        }
    }
}

impl<O: TreeObserver> std::fmt::Debug for GroupBrowser<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupBrowser")
            .field("current", &self.current)
            .field("intent", &self.intent.state())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

