/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The forest aggregate and the low-level link primitives the store builds on.
//!
//! Structural invariants, checked by [`Forest::invariant_violations`]:
//! 1. a node's `parent_id` names a tracked node whose `children` lists it once
//! 2. an id appears in at most one `children` list
//! 3. parent links never form a cycle
//! 4. `children` is ordered by child `index`
//! 5. `roots` is exactly the set of parentless nodes
//! 6. a parent and its children share a window
//!
//! Helpers here never trust the invariants: every walk is bounded so a
//! corrupted forest (as seen by the reconciler) cannot hang a traversal.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::node::Node;
use crate::tab::{TabId, WindowId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    pub(crate) nodes: HashMap<TabId, Node>,
    pub(crate) roots: BTreeSet<TabId>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: TabId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: TabId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Node ids in ascending order, for deterministic scans.
    pub fn sorted_ids(&self) -> Vec<TabId> {
        let mut ids: Vec<TabId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn roots(&self) -> &BTreeSet<TabId> {
        &self.roots
    }

    /// Whether `candidate` is `start` or one of its ancestors.
    ///
    /// A parent chain longer than the node count can only be a cycle, which is
    /// reported as a hit so callers refuse to link into it.
    pub(crate) fn is_self_or_ancestor(&self, candidate: TabId, start: TabId) -> bool {
        let mut cursor = Some(start);
        let mut steps = 0;
        while let Some(id) = cursor {
            if id == candidate || steps > self.nodes.len() {
                return true;
            }
            cursor = self.nodes.get(&id).and_then(|node| node.parent_id);
            steps += 1;
        }
        false
    }

    /// Whether `parent` may become the parent of `child` (which need not be tracked yet).
    pub(crate) fn can_link(&self, child: TabId, child_window: WindowId, parent: TabId) -> bool {
        let Some(parent_node) = self.nodes.get(&parent) else {
            return false;
        };
        parent != child
            && parent_node.window_id == child_window
            && !self.is_self_or_ancestor(child, parent)
    }

    /// Insertion point in `parent`'s children that keeps ascending `index`
    /// order, after any siblings with an equal index.
    fn ordered_position(&self, parent: TabId, child_index: u32) -> usize {
        let Some(parent) = self.nodes.get(&parent) else {
            return 0;
        };
        let mut position = parent.children.len();
        while position > 0 {
            match self.nodes.get(&parent.children[position - 1]) {
                Some(sibling) if sibling.index > child_index => position -= 1,
                _ => break,
            }
        }
        position
    }

    /// Put `child` under `parent`, or into `roots` when `parent` is `None`.
    /// The caller has already validated the link and unlinked the child.
    pub(crate) fn link(&mut self, child: TabId, parent: Option<TabId>) {
        let Some(child_index) = self.nodes.get(&child).map(|node| node.index) else {
            return;
        };
        match parent {
            Some(parent) if self.nodes.contains_key(&parent) => {
                let position = self.ordered_position(parent, child_index);
                if let Some(parent_node) = self.nodes.get_mut(&parent) {
                    parent_node.children.insert(position, child);
                }
                if let Some(child_node) = self.nodes.get_mut(&child) {
                    child_node.parent_id = Some(parent);
                }
                self.roots.remove(&child);
            },
            _ => {
                if let Some(child_node) = self.nodes.get_mut(&child) {
                    child_node.parent_id = None;
                }
                self.roots.insert(child);
            },
        }
    }

    /// Detach `id` from its parent's children (or from `roots`) and clear its parent.
    pub(crate) fn unlink(&mut self, id: TabId) {
        let parent = self.nodes.get(&id).and_then(|node| node.parent_id);
        if let Some(parent) = parent
            && let Some(parent_node) = self.nodes.get_mut(&parent)
        {
            parent_node.children.retain(|child| *child != id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_id = None;
        }
        self.roots.remove(&id);
    }

    /// Stable re-sort of one node's children by their current `index`.
    /// Returns whether the order changed.
    pub(crate) fn sort_children(&mut self, id: TabId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        let mut keyed: Vec<(u32, TabId)> = node
            .children
            .iter()
            .map(|child| {
                let index = self.nodes.get(child).map_or(u32::MAX, |n| n.index);
                (index, *child)
            })
            .collect();
        keyed.sort_by_key(|(index, _)| *index);
        let sorted: Vec<TabId> = keyed.into_iter().map(|(_, child)| child).collect();
        if sorted == node.children {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.children = sorted;
        }
        true
    }

    /// Root ids, optionally restricted to one window, ordered by `(window, index)`.
    pub(crate) fn sorted_roots(&self, window: Option<WindowId>) -> Vec<TabId> {
        let mut roots: Vec<&Node> = self
            .roots
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|node| window.is_none_or(|window| node.window_id == window))
            .collect();
        roots.sort_by_key(|node| (node.window_id, node.index));
        roots.into_iter().map(|node| node.id).collect()
    }

    /// Pre-order walk from the (sorted) roots. Each node is visited at most once.
    pub(crate) fn visit_pre_order(&self, window: Option<WindowId>, mut visit: impl FnMut(&Node, usize)) {
        let mut seen = HashSet::new();
        let mut stack: Vec<(TabId, usize)> = self
            .sorted_roots(window)
            .into_iter()
            .rev()
            .map(|id| (id, 0))
            .collect();
        while let Some((id, depth)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            visit(node, depth);
            stack.extend(node.children.iter().rev().map(|child| (*child, depth + 1)));
        }
    }

    /// `id` and all of its descendants, deepest first.
    pub(crate) fn subtree_post_order(&self, id: TabId) -> Vec<TabId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            if !seen.insert(current) {
                continue;
            }
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            stack.push((current, true));
            stack.extend(node.children.iter().map(|child| (*child, false)));
        }
        order
    }

    /// Nodes that sit on a parent-link cycle, grouped per cycle. Each group is
    /// sorted ascending; groups are ordered by their smallest id.
    pub(crate) fn cycles(&self) -> Vec<Vec<TabId>> {
        let mut settled: HashSet<TabId> = HashSet::new();
        let mut cycles = Vec::new();

        for start in self.sorted_ids() {
            if settled.contains(&start) {
                continue;
            }
            let mut path: Vec<TabId> = Vec::new();
            let mut on_path: HashMap<TabId, usize> = HashMap::new();
            let mut cursor = Some(start);
            while let Some(id) = cursor {
                if settled.contains(&id) || !self.nodes.contains_key(&id) {
                    break;
                }
                if let Some(&position) = on_path.get(&id) {
                    let mut cycle = path[position..].to_vec();
                    cycle.sort_unstable();
                    cycles.push(cycle);
                    break;
                }
                on_path.insert(id, path.len());
                path.push(id);
                cursor = self.nodes.get(&id).and_then(|node| node.parent_id);
            }
            settled.extend(path);
        }

        cycles.sort_by_key(|cycle| cycle.first().copied());
        cycles
    }

    /// Human-readable list of every broken invariant; empty when healthy.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut listed_by: HashMap<TabId, TabId> = HashMap::new();

        for id in self.sorted_ids() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };

            match node.parent_id {
                Some(parent) => match self.nodes.get(&parent) {
                    None => violations.push(format!("{id} has untracked parent {parent}")),
                    Some(parent_node) => {
                        let listed = parent_node.children.iter().filter(|c| **c == id).count();
                        if listed != 1 {
                            violations.push(format!(
                                "{id} appears {listed} times in children of its parent {parent}"
                            ));
                        }
                        if parent_node.window_id != node.window_id {
                            violations.push(format!(
                                "{id} is in {} but its parent {parent} is in {}",
                                node.window_id, parent_node.window_id
                            ));
                        }
                    },
                },
                None if !self.roots.contains(&id) => {
                    violations.push(format!("parentless {id} is missing from roots"))
                },
                None => {},
            }
            if node.parent_id.is_some() && self.roots.contains(&id) {
                violations.push(format!("{id} is both a root and a child"));
            }

            let mut previous_index = None;
            for child in &node.children {
                if let Some(other) = listed_by.insert(*child, id)
                    && other != id
                {
                    violations.push(format!("{child} is listed by both {other} and {id}"));
                }
                match self.nodes.get(child) {
                    None => violations.push(format!("{id} lists untracked child {child}")),
                    Some(child_node) => {
                        if child_node.parent_id != Some(id) {
                            violations.push(format!(
                                "{id} lists {child} whose parent is {:?}",
                                child_node.parent_id
                            ));
                        }
                        if previous_index.is_some_and(|prev| prev > child_node.index) {
                            violations.push(format!("children of {id} are out of index order"));
                        }
                        previous_index = Some(child_node.index);
                    },
                }
            }
        }

        for root in &self.roots {
            if !self.nodes.contains_key(root) {
                violations.push(format!("roots lists untracked {root}"));
            }
        }
        for cycle in self.cycles() {
            violations.push(format!("parent cycle through {cycle:?}"));
        }
        violations
    }
}
