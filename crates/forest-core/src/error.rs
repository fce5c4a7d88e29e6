/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;

use crate::tab::TabId;

/// Programming errors raised by store mutations.
///
/// Drift between the store and the host is never reported through this type;
/// that is what [`crate::ValidationReport`] is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A node with this id is already tracked.
    DuplicateId(TabId),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateId(id) => write!(f, "{id} is already tracked"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Why an explicit reparent request was refused. The node keeps its old parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReparentError {
    UnknownNode(TabId),
    UnknownParent(TabId),
    SelfParent(TabId),
    /// The requested parent is the node itself or one of its descendants.
    WouldCycle { tab_id: TabId, parent_id: TabId },
    /// Parent and child live in different windows.
    CrossWindow { tab_id: TabId, parent_id: TabId },
}

impl fmt::Display for ReparentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReparentError::UnknownNode(id) => write!(f, "{id} is not tracked"),
            ReparentError::UnknownParent(id) => write!(f, "parent {id} is not tracked"),
            ReparentError::SelfParent(id) => write!(f, "{id} cannot be its own parent"),
            ReparentError::WouldCycle { tab_id, parent_id } => {
                write!(f, "making {parent_id} the parent of {tab_id} would create a cycle")
            },
            ReparentError::CrossWindow { tab_id, parent_id } => {
                write!(f, "{parent_id} and {tab_id} are in different windows")
            },
        }
    }
}

impl std::error::Error for ReparentError {}
