/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Single-writer store actor.
//!
//! One task owns the [`HierarchyStore`]. Events, reconciler passes, reparent
//! requests and reads all arrive as [`StoreCommand`]s on one channel and are
//! handled to completion in arrival order, so no caller ever sees a
//! half-applied mutation.

use std::fmt;

use forest_core::{
    FlatEntry, Forest, ForestStats, HierarchyStore, Node, RepairResult, ReparentError, StoreError,
    SyncOutcome, Tab, TabId, TreeNode, ValidationReport, WindowId, reconcile,
};
use log::{debug, trace};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::events::{TabEvent, apply_event};

/// Bounds how far producers can run ahead of the actor.
const STORE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorError {
    /// The actor has stopped; the request was not applied.
    Closed,
}

impl fmt::Display for ActorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorError::Closed => write!(f, "store actor is no longer running"),
        }
    }
}

impl std::error::Error for ActorError {}

/// Validation and shape statistics taken in one step.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticSnapshot {
    pub report: ValidationReport,
    pub stats: ForestStats,
}

pub enum StoreCommand {
    ApplyEvent {
        event: TabEvent,
        reply: oneshot::Sender<bool>,
    },
    AddTab {
        tab: Tab,
        opener: Option<TabId>,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    RemoveTab {
        id: TabId,
        cascade: bool,
        reply: oneshot::Sender<bool>,
    },
    SetParent {
        id: TabId,
        parent: Option<TabId>,
        reply: oneshot::Sender<Result<(), ReparentError>>,
    },
    GetNode {
        id: TabId,
        reply: oneshot::Sender<Option<Node>>,
    },
    GetHierarchy {
        window: Option<WindowId>,
        reply: oneshot::Sender<Vec<TreeNode>>,
    },
    Flatten {
        window: Option<WindowId>,
        reply: oneshot::Sender<Vec<FlatEntry>>,
    },
    Validate {
        external: Vec<Tab>,
        reply: oneshot::Sender<ValidationReport>,
    },
    Diagnose {
        external: Vec<Tab>,
        reply: oneshot::Sender<DiagnosticSnapshot>,
    },
    Repair {
        external: Vec<Tab>,
        reply: oneshot::Sender<RepairResult>,
    },
    Reconcile {
        external: Vec<Tab>,
        force: bool,
        reply: oneshot::Sender<SyncOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<(Forest, u64)>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl fmt::Debug for StoreCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreCommand::ApplyEvent { .. } => "ApplyEvent",
            StoreCommand::AddTab { .. } => "AddTab",
            StoreCommand::RemoveTab { .. } => "RemoveTab",
            StoreCommand::SetParent { .. } => "SetParent",
            StoreCommand::GetNode { .. } => "GetNode",
            StoreCommand::GetHierarchy { .. } => "GetHierarchy",
            StoreCommand::Flatten { .. } => "Flatten",
            StoreCommand::Validate { .. } => "Validate",
            StoreCommand::Diagnose { .. } => "Diagnose",
            StoreCommand::Repair { .. } => "Repair",
            StoreCommand::Reconcile { .. } => "Reconcile",
            StoreCommand::Snapshot { .. } => "Snapshot",
            StoreCommand::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Cloneable sender side of the actor.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

pub struct StoreActor;

impl StoreActor {
    /// Move `store` into a new actor task.
    ///
    /// When `revisions` is given, the store revision is published there after
    /// every command that changed the forest.
    pub fn spawn(
        store: HierarchyStore,
        revisions: Option<watch::Sender<u64>>,
    ) -> (StoreHandle, JoinHandle<HierarchyStore>) {
        let (tx, rx) = mpsc::channel(STORE_CHANNEL_CAPACITY);
        let task = tokio::spawn(run(store, rx, revisions));
        debug!("store actor: spawned");
        (StoreHandle { tx }, task)
    }
}

async fn run(
    mut store: HierarchyStore,
    mut rx: mpsc::Receiver<StoreCommand>,
    revisions: Option<watch::Sender<u64>>,
) -> HierarchyStore {
    while let Some(command) = rx.recv().await {
        trace!("store actor: {command:?}");
        let before = store.revision();
        let keep_running = handle_command(&mut store, command);
        if store.revision() != before
            && let Some(revisions) = &revisions
        {
            revisions.send_replace(store.revision());
        }
        if !keep_running {
            break;
        }
    }
    debug!("store actor: stopped at revision {}", store.revision());
    store
}

// Reply failures mean the requester went away; the command still applied.
fn handle_command(store: &mut HierarchyStore, command: StoreCommand) -> bool {
    match command {
        StoreCommand::ApplyEvent { event, reply } => {
            let _ = reply.send(apply_event(store, &event));
        },
        StoreCommand::AddTab { tab, opener, reply } => {
            let _ = reply.send(store.add_node(&tab, opener));
        },
        StoreCommand::RemoveTab { id, cascade, reply } => {
            let _ = reply.send(store.remove_node(id, cascade));
        },
        StoreCommand::SetParent { id, parent, reply } => {
            let _ = reply.send(store.set_parent(id, parent));
        },
        StoreCommand::GetNode { id, reply } => {
            let _ = reply.send(store.get_node(id));
        },
        StoreCommand::GetHierarchy { window, reply } => {
            let _ = reply.send(store.get_forest(window));
        },
        StoreCommand::Flatten { window, reply } => {
            let _ = reply.send(store.flatten(window));
        },
        StoreCommand::Validate { external, reply } => {
            let _ = reply.send(reconcile::validate(store, &external));
        },
        StoreCommand::Diagnose { external, reply } => {
            let _ = reply.send(DiagnosticSnapshot {
                report: reconcile::validate(store, &external),
                stats: ForestStats::collect(store.forest()),
            });
        },
        StoreCommand::Repair { external, reply } => {
            let _ = reply.send(reconcile::repair(store, &external));
        },
        StoreCommand::Reconcile {
            external,
            force,
            reply,
        } => {
            let _ = reply.send(reconcile::reconcile_once(store, &external, force));
        },
        StoreCommand::Snapshot { reply } => {
            let _ = reply.send((store.forest().clone(), store.revision()));
        },
        StoreCommand::Shutdown { reply } => {
            let _ = reply.send(());
            return false;
        },
    }
    true
}

impl StoreHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T, ActorError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ActorError::Closed)?;
        response.await.map_err(|_| ActorError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn apply_event(&self, event: TabEvent) -> Result<bool, ActorError> {
        self.request(|reply| StoreCommand::ApplyEvent { event, reply })
            .await
    }

    pub async fn add_tab(
        &self,
        tab: Tab,
        opener: Option<TabId>,
    ) -> Result<Result<(), StoreError>, ActorError> {
        self.request(|reply| StoreCommand::AddTab { tab, opener, reply })
            .await
    }

    pub async fn remove_tab(&self, id: TabId, cascade: bool) -> Result<bool, ActorError> {
        self.request(|reply| StoreCommand::RemoveTab { id, cascade, reply })
            .await
    }

    pub async fn set_parent(
        &self,
        id: TabId,
        parent: Option<TabId>,
    ) -> Result<Result<(), ReparentError>, ActorError> {
        self.request(|reply| StoreCommand::SetParent { id, parent, reply })
            .await
    }

    pub async fn get_node(&self, id: TabId) -> Result<Option<Node>, ActorError> {
        self.request(|reply| StoreCommand::GetNode { id, reply }).await
    }

    pub async fn get_hierarchy(
        &self,
        window: Option<WindowId>,
    ) -> Result<Vec<TreeNode>, ActorError> {
        self.request(|reply| StoreCommand::GetHierarchy { window, reply })
            .await
    }

    pub async fn flatten(&self, window: Option<WindowId>) -> Result<Vec<FlatEntry>, ActorError> {
        self.request(|reply| StoreCommand::Flatten { window, reply })
            .await
    }

    pub async fn validate(&self, external: Vec<Tab>) -> Result<ValidationReport, ActorError> {
        self.request(|reply| StoreCommand::Validate { external, reply })
            .await
    }

    pub async fn diagnose(&self, external: Vec<Tab>) -> Result<DiagnosticSnapshot, ActorError> {
        self.request(|reply| StoreCommand::Diagnose { external, reply })
            .await
    }

    pub async fn repair(&self, external: Vec<Tab>) -> Result<RepairResult, ActorError> {
        self.request(|reply| StoreCommand::Repair { external, reply })
            .await
    }

    /// Validate, repair and if needed rebuild as one command.
    pub async fn reconcile(
        &self,
        external: Vec<Tab>,
        force: bool,
    ) -> Result<SyncOutcome, ActorError> {
        self.request(|reply| StoreCommand::Reconcile {
            external,
            force,
            reply,
        })
        .await
    }

    /// A copy of the forest together with the revision it reflects.
    pub async fn snapshot(&self) -> Result<(Forest, u64), ActorError> {
        self.request(|reply| StoreCommand::Snapshot { reply }).await
    }

    /// Stop the actor after everything queued ahead of this request.
    pub async fn shutdown(&self) -> Result<(), ActorError> {
        self.request(|reply| StoreCommand::Shutdown { reply }).await
    }
}
