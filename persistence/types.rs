/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! On-disk snapshot documents.

use std::collections::BTreeSet;

use forest_core::{Node, TabId, WindowId};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_VERSION: u32 = 2;

/// Current format: child lists are stored in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestSnapshot {
    pub version: u32,
    pub nodes: Vec<Node>,
    pub roots: Vec<TabId>,
    pub saved_at_ms: i64,
}

/// Version 1 stored children as an unordered set and no save time.
#[derive(Debug, Clone, Deserialize)]
pub struct ForestSnapshotV1 {
    pub nodes: Vec<NodeV1>,
    #[serde(default)]
    pub roots: Vec<TabId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeV1 {
    pub id: TabId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub window_id: WindowId,
    pub index: u32,
    #[serde(default)]
    pub pinned: bool,
    pub parent_id: Option<TabId>,
    #[serde(default)]
    pub children: BTreeSet<TabId>,
    #[serde(default)]
    pub created_at_ms: i64,
}

impl From<NodeV1> for Node {
    fn from(node: NodeV1) -> Self {
        Node {
            id: node.id,
            url: node.url,
            title: node.title,
            window_id: node.window_id,
            index: node.index,
            pinned: node.pinned,
            parent_id: node.parent_id,
            // Order is restored by sorting on load.
            children: node.children.into_iter().collect(),
            created_at_ms: node.created_at_ms,
        }
    }
}
