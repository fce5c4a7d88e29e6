/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Shape statistics reported alongside validation in diagnostics.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::forest::Forest;
use crate::tab::WindowId;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowStats {
    pub tab_count: usize,
    pub root_count: usize,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForestStats {
    pub node_count: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    /// Nodes not reachable from any root (only non-zero on a corrupted forest).
    pub unreachable_count: usize,
    pub max_depth: usize,
    pub mean_depth: f64,
    pub max_fan_out: usize,
    /// Average child count over nodes that have children.
    pub mean_fan_out: f64,
    pub per_window: BTreeMap<u64, WindowStats>,
}

impl ForestStats {
    pub fn collect(forest: &Forest) -> Self {
        let mut stats = ForestStats {
            node_count: forest.len(),
            root_count: forest.roots().len(),
            ..ForestStats::default()
        };

        let mut reached = 0_usize;
        let mut depth_sum = 0_usize;
        forest.visit_pre_order(None, |node, depth| {
            reached += 1;
            depth_sum += depth;
            stats.max_depth = stats.max_depth.max(depth);

            let window = stats.per_window.entry(node.window_id.0).or_default();
            window.max_depth = window.max_depth.max(depth);
            if depth == 0 {
                window.root_count += 1;
            }
        });
        stats.unreachable_count = forest.len().saturating_sub(reached);
        if reached > 0 {
            stats.mean_depth = depth_sum as f64 / reached as f64;
        }

        let mut parents = 0_usize;
        let mut child_links = 0_usize;
        for node in forest.nodes() {
            stats
                .per_window
                .entry(node.window_id.0)
                .or_default()
                .tab_count += 1;
            let fan_out = node.children.len();
            if fan_out == 0 {
                stats.leaf_count += 1;
            } else {
                parents += 1;
                child_links += fan_out;
                stats.max_fan_out = stats.max_fan_out.max(fan_out);
            }
        }
        if parents > 0 {
            stats.mean_fan_out = child_links as f64 / parents as f64;
        }
        stats
    }

    pub fn window(&self, window: WindowId) -> Option<&WindowStats> {
        self.per_window.get(&window.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::rebuild;
    use crate::store::HierarchyStore;
    use crate::tab::Tab;

    #[test]
    fn collects_depth_and_fan_out() {
        let mut store = HierarchyStore::new();
        rebuild(
            &mut store,
            &[
                Tab::new(1, 1, 0),
                Tab::new(2, 1, 1).with_opener(1),
                Tab::new(3, 1, 2).with_opener(1),
                Tab::new(4, 1, 3).with_opener(3),
                Tab::new(5, 2, 0),
            ],
        );

        let stats = ForestStats::collect(store.forest());

        assert_eq!(stats.node_count, 5);
        assert_eq!(stats.root_count, 2);
        assert_eq!(stats.leaf_count, 3);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.max_fan_out, 2);
        assert!((stats.mean_fan_out - 1.5).abs() < f64::EPSILON);
        assert!((stats.mean_depth - 0.8).abs() < 1e-9);
        assert_eq!(stats.unreachable_count, 0);
        assert_eq!(
            stats.window(WindowId(1)),
            Some(&WindowStats {
                tab_count: 4,
                root_count: 1,
                max_depth: 2
            })
        );
    }
}
