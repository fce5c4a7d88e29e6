/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The hierarchy store: sole owner of a [`Forest`].
//!
//! Every public operation leaves the forest satisfying the invariants listed
//! in [`crate::forest`]. Operations on untracked ids are no-ops; only adding a
//! duplicate id is an error.

use std::collections::HashSet;
use std::collections::hash_map::Entry;

use log::{debug, trace};

use crate::error::{ReparentError, StoreError};
use crate::forest::Forest;
use crate::node::{FlatEntry, Node, NodePatch, TreeNode};
use crate::tab::{Tab, TabId, WindowId};

#[derive(Debug, Clone, Default)]
pub struct HierarchyStore {
    pub(crate) forest: Forest,
    revision: u64,
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

impl HierarchyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt nodes loaded from elsewhere, healing any link that does not hold
    /// up against the node set and re-sorting every child list.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut store = Self::new();
        for node in nodes {
            if let Entry::Vacant(slot) = store.forest.nodes.entry(node.id) {
                if node.is_root() {
                    store.forest.roots.insert(node.id);
                }
                slot.insert(node);
            }
        }
        let repaired = crate::reconcile::heal_structure(&mut store);
        if repaired > 0 {
            debug!("hierarchy store: healed {repaired} inconsistent links on load");
        }
        store.sort_all_children();
        store.revision = 0;
        store
    }

    /// Monotonic counter bumped by every mutation that changed the forest.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn len(&self) -> usize {
        self.forest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forest.is_empty()
    }

    pub fn contains(&self, id: TabId) -> bool {
        self.forest.contains(id)
    }

    pub fn root_ids(&self) -> Vec<TabId> {
        self.forest.roots.iter().copied().collect()
    }

    /// Track a new tab, under `opener` when that link is valid, else as a root.
    pub fn add_node(&mut self, tab: &Tab, opener: Option<TabId>) -> Result<(), StoreError> {
        if self.forest.contains(tab.id) {
            return Err(StoreError::DuplicateId(tab.id));
        }
        let parent = opener.filter(|parent| self.forest.can_link(tab.id, tab.window_id, *parent));
        if opener.is_some() && parent.is_none() {
            debug!(
                "hierarchy store: opener {:?} rejected for {}, adding as root",
                opener, tab.id
            );
        }
        self.forest
            .nodes
            .insert(tab.id, Node::from_tab(tab, now_ms()));
        self.forest.link(tab.id, parent);
        self.touch();
        trace!("hierarchy store: added {} under {parent:?}", tab.id);
        Ok(())
    }

    /// Remove a node. With `cascade` its whole subtree goes too; otherwise its
    /// direct children become roots.
    pub fn remove_node(&mut self, id: TabId, cascade: bool) -> bool {
        if !self.forest.contains(id) {
            return false;
        }

        let removed: HashSet<TabId> = if cascade {
            self.forest.subtree_post_order(id).into_iter().collect()
        } else {
            HashSet::from([id])
        };
        self.forest.unlink(id);
        for member in &removed {
            self.forest.nodes.remove(member);
            self.forest.roots.remove(member);
        }
        self.release_references_to(&removed);
        debug!(
            "hierarchy store: removed {id} ({} node(s), cascade={cascade})",
            removed.len()
        );
        self.touch();
        true
    }

    /// Drop child entries naming removed nodes and root every survivor whose
    /// parent was removed.
    fn release_references_to(&mut self, removed: &HashSet<TabId>) {
        let mut orphaned = Vec::new();
        for node in self.forest.nodes.values_mut() {
            node.children.retain(|child| !removed.contains(child));
            if node.parent_id.is_some_and(|parent| removed.contains(&parent)) {
                orphaned.push(node.id);
            }
        }
        for child in orphaned {
            self.forest.link(child, None);
        }
    }

    /// Apply a property patch, reparenting when the patch names an opener.
    pub fn update_node(&mut self, id: TabId, patch: &NodePatch) -> bool {
        let Some(node) = self.forest.nodes.get_mut(&id) else {
            return false;
        };

        let mut changed = false;
        let old_index = node.index;
        let old_window = node.window_id;
        if let Some(url) = &patch.url
            && *url != node.url
        {
            node.url.clone_from(url);
            changed = true;
        }
        if let Some(title) = &patch.title
            && *title != node.title
        {
            node.title.clone_from(title);
            changed = true;
        }
        if let Some(pinned) = patch.pinned
            && pinned != node.pinned
        {
            node.pinned = pinned;
            changed = true;
        }
        if let Some(index) = patch.index {
            node.index = index;
        }
        if let Some(window_id) = patch.window_id {
            node.window_id = window_id;
        }
        let new_index = node.index;
        let new_window = node.window_id;
        let current_parent = node.parent_id;
        changed |= new_index != old_index || new_window != old_window;

        let desired_parent = match patch.opener {
            Some(requested) => {
                requested.filter(|parent| self.forest.can_link(id, new_window, *parent))
            },
            None => current_parent
                .filter(|parent| self.forest.can_link(id, new_window, *parent)),
        };

        if desired_parent != current_parent {
            self.forest.unlink(id);
            self.forest.link(id, desired_parent);
            changed = true;
        } else if new_index != old_index && current_parent.is_some() {
            self.forest.unlink(id);
            self.forest.link(id, current_parent);
        }

        if new_window != old_window {
            self.release_children_outside_window(id, new_window);
        }

        if changed {
            self.touch();
        }
        changed
    }

    /// Children left behind in another window become roots there.
    fn release_children_outside_window(&mut self, id: TabId, window: WindowId) {
        let stranded: Vec<TabId> = self
            .forest
            .nodes
            .get(&id)
            .map(|node| {
                node.children
                    .iter()
                    .filter(|child| {
                        self.forest
                            .nodes
                            .get(child)
                            .is_some_and(|child| child.window_id != window)
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        for child in stranded {
            self.forest.unlink(child);
            self.forest.link(child, None);
        }
    }

    /// Explicitly move `id` under `parent` (or to root). Unlike a patch, an
    /// invalid target is refused and the node stays where it was.
    pub fn set_parent(&mut self, id: TabId, parent: Option<TabId>) -> Result<(), ReparentError> {
        let Some(node) = self.forest.nodes.get(&id) else {
            return Err(ReparentError::UnknownNode(id));
        };
        let window = node.window_id;
        let current = node.parent_id;

        if let Some(parent_id) = parent {
            let Some(parent_node) = self.forest.nodes.get(&parent_id) else {
                return Err(ReparentError::UnknownParent(parent_id));
            };
            if parent_id == id {
                return Err(ReparentError::SelfParent(id));
            }
            if parent_node.window_id != window {
                return Err(ReparentError::CrossWindow {
                    tab_id: id,
                    parent_id,
                });
            }
            if self.forest.is_self_or_ancestor(id, parent_id) {
                return Err(ReparentError::WouldCycle {
                    tab_id: id,
                    parent_id,
                });
            }
        }

        if current != parent || (parent.is_none() && !self.forest.roots.contains(&id)) {
            self.forest.unlink(id);
            self.forest.link(id, parent);
            self.touch();
            debug!("hierarchy store: reparented {id} under {parent:?}");
        }
        Ok(())
    }

    pub fn get_node(&self, id: TabId) -> Option<Node> {
        self.forest.node(id).cloned()
    }

    pub fn get_children(&self, id: TabId) -> Vec<Node> {
        self.forest
            .node(id)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| self.forest.node(*child).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nested roots (optionally of one window) ordered by `(window, index)`.
    pub fn get_forest(&self, window: Option<WindowId>) -> Vec<TreeNode> {
        let mut seen = HashSet::new();
        self.forest
            .sorted_roots(window)
            .into_iter()
            .filter_map(|root| self.build_tree(root, &mut seen))
            .collect()
    }

    fn build_tree(&self, id: TabId, seen: &mut HashSet<TabId>) -> Option<TreeNode> {
        if !seen.insert(id) {
            return None;
        }
        let node = self.forest.node(id)?;
        let children = node
            .children
            .iter()
            .filter_map(|child| self.build_tree(*child, seen))
            .collect();
        Some(TreeNode {
            node: node.clone(),
            children,
        })
    }

    /// Pre-order traversal of [`Self::get_forest`], depth 0 at the roots.
    pub fn flatten(&self, window: Option<WindowId>) -> Vec<FlatEntry> {
        let mut entries = Vec::with_capacity(self.forest.len());
        self.forest.visit_pre_order(window, |node, depth| {
            entries.push(FlatEntry {
                node: node.clone(),
                depth,
            });
        });
        entries
    }

    pub fn sort_children(&mut self, id: TabId) -> bool {
        let changed = self.forest.sort_children(id);
        if changed {
            self.touch();
        }
        changed
    }

    /// Re-sort every child list; returns how many lists changed order.
    pub fn sort_all_children(&mut self) -> usize {
        let changed = self
            .forest
            .sorted_ids()
            .into_iter()
            .filter(|id| self.forest.sort_children(*id))
            .count();
        if changed > 0 {
            self.touch();
        }
        changed
    }

    pub fn clear(&mut self) {
        if !self.forest.is_empty() || !self.forest.roots.is_empty() {
            self.forest = Forest::new();
            self.touch();
        }
    }

    // Repair primitives. These deliberately work on a possibly corrupted
    // forest and report whether anything changed.

    pub(crate) fn force_root(&mut self, id: TabId) -> bool {
        let Some(node) = self.forest.nodes.get(&id) else {
            return false;
        };
        if node.parent_id.is_none() && self.forest.roots.contains(&id) {
            return false;
        }
        self.forest.unlink(id);
        self.forest.link(id, None);
        self.touch();
        true
    }

    pub(crate) fn drop_child_entry(&mut self, parent: TabId, child: TabId) -> bool {
        let Some(node) = self.forest.nodes.get_mut(&parent) else {
            return false;
        };
        let before = node.children.len();
        node.children.retain(|entry| *entry != child);
        let changed = node.children.len() != before;
        if changed {
            self.touch();
        }
        changed
    }

    /// Make the link between `listed_by` and `child` agree with the child's
    /// own `parent_id`.
    pub(crate) fn reconcile_link(&mut self, listed_by: TabId, child: TabId) -> bool {
        let Some(declared) = self.forest.nodes.get(&child).map(|node| node.parent_id) else {
            return self.drop_child_entry(listed_by, child);
        };
        let mut changed = false;

        if declared != Some(listed_by)
            && let Some(node) = self.forest.nodes.get_mut(&listed_by)
        {
            let before = node.children.len();
            node.children.retain(|entry| *entry != child);
            changed |= node.children.len() != before;
        }

        if let Some(parent) = declared
            && let Some(parent_node) = self.forest.nodes.get_mut(&parent)
        {
            let listed = parent_node.children.iter().filter(|c| **c == child).count();
            if listed != 1 {
                parent_node.children.retain(|entry| *entry != child);
                parent_node.children.push(child);
                changed = true;
            }
            if self.forest.roots.remove(&child) {
                changed = true;
            }
        }

        if changed {
            self.touch();
        }
        changed
    }

    /// Overwrite host-reported placement without resplicing; callers re-sort.
    pub(crate) fn overwrite_placement(
        &mut self,
        id: TabId,
        index: Option<u32>,
        window: Option<WindowId>,
    ) -> bool {
        let Some(node) = self.forest.nodes.get_mut(&id) else {
            return false;
        };
        let mut changed = false;
        if let Some(index) = index
            && node.index != index
        {
            node.index = index;
            changed = true;
        }
        if let Some(window) = window
            && node.window_id != window
        {
            node.window_id = window;
            changed = true;
        }
        if changed {
            self.touch();
        }
        changed
    }

    /// Root every node whose parent lives in another window.
    pub(crate) fn sever_cross_window_links(&mut self) -> usize {
        let crossing: Vec<TabId> = self
            .forest
            .sorted_ids()
            .into_iter()
            .filter(|id| {
                let Some(node) = self.forest.nodes.get(id) else {
                    return false;
                };
                node.parent_id
                    .and_then(|parent| self.forest.nodes.get(&parent))
                    .is_some_and(|parent| parent.window_id != node.window_id)
            })
            .collect();
        for id in &crossing {
            self.force_root(*id);
        }
        crossing.len()
    }

    /// Bring `id`'s membership in `roots` in line with its `parent_id`.
    pub(crate) fn fix_root_membership(&mut self, id: TabId) -> bool {
        let changed = match self.forest.nodes.get(&id) {
            None => self.forest.roots.remove(&id),
            Some(node) if node.parent_id.is_none() => self.forest.roots.insert(id),
            Some(_) => self.forest.roots.remove(&id),
        };
        if changed {
            self.touch();
        }
        changed
    }
}
