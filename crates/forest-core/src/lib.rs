/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Portable hierarchy kernel for tabforest.
//!
//! Core structures:
//! - `Tab`: strictly typed tab record accepted from the host boundary
//! - `Forest`: id-keyed nodes plus the derived root set
//! - `HierarchyStore`: invariant-preserving mutations and snapshot reads
//! - `reconcile`: drift validation, targeted repair and full rebuild

pub mod error;
pub mod forest;
pub mod node;
pub mod reconcile;
pub mod stats;
pub mod store;
pub mod tab;

pub use error::{ReparentError, StoreError};
pub use forest::Forest;
pub use node::{FlatEntry, Node, NodePatch, TreeNode};
pub use reconcile::{
    Issue, RepairResult, SyncAction, SyncOutcome, ValidationReport, rebuild, reconcile_once,
    repair, validate,
};
pub use stats::{ForestStats, WindowStats};
pub use store::{HierarchyStore, now_ms};
pub use tab::{Tab, TabError, TabId, WindowId};
