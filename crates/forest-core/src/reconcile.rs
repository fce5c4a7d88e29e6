/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Drift detection and correction against the host's authoritative tab list.
//!
//! Three tiers:
//! - [`validate`]: classify every discrepancy, read-only
//! - [`repair`]: one targeted, idempotent action per reported issue
//! - [`rebuild`]: throw the forest away and re-derive it from host openers
//!
//! [`reconcile_once`] chains them: nothing when valid, repair otherwise, and a
//! rebuild only when the repaired forest still fails validation.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, info, warn};
use serde::Serialize;

use crate::store::HierarchyStore;
use crate::tab::{Tab, TabId, WindowId};

/// One discrepancy between the store and the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Issue {
    /// Tracked by the store, unknown to the host.
    OrphanedInHierarchy { tab_id: TabId },
    /// Known to the host, not tracked by the store.
    MissingInHierarchy { tab_id: TabId },
    IndexMismatch {
        tab_id: TabId,
        expected: u32,
        actual: u32,
    },
    WindowMismatch {
        tab_id: TabId,
        expected: WindowId,
        actual: WindowId,
    },
    /// `tab_id` is the smallest id on a parent-link cycle.
    CircularReference { tab_id: TabId },
    InvalidParent { tab_id: TabId, parent_id: TabId },
    InvalidChild { parent_id: TabId, child_id: TabId },
    /// `parent_id` lists `child_id` (or is named by it) but the two disagree,
    /// or the child is listed more than once.
    ParentChildMismatch {
        parent_id: TabId,
        child_id: TabId,
        actual_parent: Option<TabId>,
    },
    /// `roots` membership disagrees with `parent_id`.
    RootSetMismatch { tab_id: TabId },
    MissingTabsInWindow {
        window_id: WindowId,
        tab_ids: Vec<TabId>,
    },
    ExtraTabsInWindow {
        window_id: WindowId,
        tab_ids: Vec<TabId>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    fn from_issues(issues: Vec<Issue>) -> Self {
        Self {
            is_valid: issues.is_empty(),
            issues,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairResult {
    pub success: bool,
    pub repairs_performed: usize,
    /// Whatever the post-repair validation still reports.
    pub remaining_issues: Vec<Issue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    None,
    Repair,
    Rebuild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub action: SyncAction,
    /// Validation of the store as it was before this pass.
    pub report: ValidationReport,
    pub repair: Option<RepairResult>,
}

/// First occurrence wins when the host reports an id twice.
fn dedup_external(external: &[Tab]) -> Vec<&Tab> {
    let mut seen = HashSet::new();
    let mut tabs = Vec::with_capacity(external.len());
    for tab in external {
        if seen.insert(tab.id) {
            tabs.push(tab);
        } else {
            warn!("reconcile: host reported {} more than once", tab.id);
        }
    }
    tabs
}

/// Compare the store against `external` without mutating anything.
pub fn validate(store: &HierarchyStore, external: &[Tab]) -> ValidationReport {
    let forest = store.forest();
    let external = dedup_external(external);
    let by_id: HashMap<TabId, &Tab> = external.iter().map(|tab| (tab.id, *tab)).collect();
    let store_ids = forest.sorted_ids();
    let mut issues = Vec::new();

    for id in &store_ids {
        if !by_id.contains_key(id) {
            issues.push(Issue::OrphanedInHierarchy { tab_id: *id });
        }
    }
    let mut external_ids: Vec<TabId> = by_id.keys().copied().collect();
    external_ids.sort_unstable();
    for id in &external_ids {
        if !forest.contains(*id) {
            issues.push(Issue::MissingInHierarchy { tab_id: *id });
        }
    }

    for id in &store_ids {
        let (Some(node), Some(tab)) = (forest.node(*id), by_id.get(id)) else {
            continue;
        };
        if node.index != tab.index {
            issues.push(Issue::IndexMismatch {
                tab_id: *id,
                expected: tab.index,
                actual: node.index,
            });
        }
        if node.window_id != tab.window_id {
            issues.push(Issue::WindowMismatch {
                tab_id: *id,
                expected: tab.window_id,
                actual: node.window_id,
            });
        }
    }

    issues.extend(structural_issues(store));

    let mut expected_by_window: HashMap<WindowId, BTreeSet<TabId>> = HashMap::new();
    for tab in &external {
        expected_by_window
            .entry(tab.window_id)
            .or_default()
            .insert(tab.id);
    }
    let windows: BTreeSet<WindowId> = forest
        .nodes()
        .map(|node| node.window_id)
        .chain(expected_by_window.keys().copied())
        .collect();
    for window in windows {
        let mut present = BTreeSet::new();
        forest.visit_pre_order(Some(window), |node, _| {
            present.insert(node.id);
        });
        let expected = expected_by_window.remove(&window).unwrap_or_default();
        let missing: Vec<TabId> = expected.difference(&present).copied().collect();
        let extra: Vec<TabId> = present.difference(&expected).copied().collect();
        if !missing.is_empty() {
            issues.push(Issue::MissingTabsInWindow {
                window_id: window,
                tab_ids: missing,
            });
        }
        if !extra.is_empty() {
            issues.push(Issue::ExtraTabsInWindow {
                window_id: window,
                tab_ids: extra,
            });
        }
    }

    ValidationReport::from_issues(issues)
}

/// Link-level corruption that does not depend on the host's view.
fn structural_issues(store: &HierarchyStore) -> Vec<Issue> {
    let forest = store.forest();
    let mut issues = Vec::new();

    for cycle in forest.cycles() {
        if let Some(first) = cycle.first() {
            issues.push(Issue::CircularReference { tab_id: *first });
        }
    }

    let ids = forest.sorted_ids();
    for id in &ids {
        let Some(node) = forest.node(*id) else {
            continue;
        };
        if let Some(parent) = node.parent_id
            && !forest.contains(parent)
        {
            issues.push(Issue::InvalidParent {
                tab_id: *id,
                parent_id: parent,
            });
        }
    }

    for id in &ids {
        let Some(node) = forest.node(*id) else {
            continue;
        };
        let mut reported = HashSet::new();
        for child in &node.children {
            if !forest.contains(*child) && reported.insert(*child) {
                issues.push(Issue::InvalidChild {
                    parent_id: *id,
                    child_id: *child,
                });
            }
        }
    }

    let mut mismatches = HashSet::new();
    for id in &ids {
        let Some(node) = forest.node(*id) else {
            continue;
        };
        for child in &node.children {
            let Some(child_node) = forest.node(*child) else {
                continue;
            };
            let listed = node.children.iter().filter(|c| *c == child).count();
            if (child_node.parent_id != Some(*id) || listed > 1) && mismatches.insert((*id, *child))
            {
                issues.push(Issue::ParentChildMismatch {
                    parent_id: *id,
                    child_id: *child,
                    actual_parent: child_node.parent_id,
                });
            }
        }
        if let Some(parent) = node.parent_id
            && let Some(parent_node) = forest.node(parent)
            && !parent_node.children.contains(id)
            && mismatches.insert((parent, *id))
        {
            issues.push(Issue::ParentChildMismatch {
                parent_id: parent,
                child_id: *id,
                actual_parent: Some(parent),
            });
        }
    }

    for id in &ids {
        let Some(node) = forest.node(*id) else {
            continue;
        };
        if node.is_root() != forest.roots().contains(id) {
            issues.push(Issue::RootSetMismatch { tab_id: *id });
        }
    }
    for root in forest.roots() {
        if !forest.contains(*root) {
            issues.push(Issue::RootSetMismatch { tab_id: *root });
        }
    }

    issues
}

/// Apply the corrective action for one structural issue.
fn repair_structural(store: &mut HierarchyStore, issue: &Issue) -> usize {
    let changed = match issue {
        Issue::CircularReference { tab_id } => store.force_root(*tab_id),
        Issue::InvalidParent { tab_id, .. } => store.force_root(*tab_id),
        Issue::InvalidChild {
            parent_id,
            child_id,
        } => store.drop_child_entry(*parent_id, *child_id),
        Issue::ParentChildMismatch {
            parent_id,
            child_id,
            ..
        } => store.reconcile_link(*parent_id, *child_id),
        Issue::RootSetMismatch { tab_id } => store.fix_root_membership(*tab_id),
        _ => false,
    };
    usize::from(changed)
}

/// Fix link-level corruption only; used when adopting persisted nodes.
pub(crate) fn heal_structure(store: &mut HierarchyStore) -> usize {
    let mut repaired = 0;
    // A pass can expose new issues (rooting a cycle member may reveal an
    // asymmetric link), so iterate to a fixed point. Every action strictly
    // reduces the number of bad links, which bounds the loop.
    for _ in 0..=store.len() + 1 {
        let issues = structural_issues(store);
        if issues.is_empty() {
            break;
        }
        let before = repaired;
        for issue in &issues {
            repaired += repair_structural(store, issue);
        }
        if repaired == before {
            break;
        }
    }
    repaired += store.sever_cross_window_links();
    repaired
}

/// Add host tabs the store does not track, openers first.
fn add_missing(store: &mut HierarchyStore, tabs: &[&Tab]) -> usize {
    let mut ordered: Vec<&Tab> = tabs.to_vec();
    ordered.sort_by_key(|tab| (tab.window_id, tab.index, tab.id));

    let mut added = Vec::new();
    for tab in ordered {
        match store.add_node(tab, tab.opener_tab_id) {
            Ok(()) => added.push(tab),
            Err(err) => debug!("reconcile: skipping {}: {err}", tab.id),
        }
    }
    link_late_openers(store, &added);
    added.len()
}

/// Openers that were added after their children get a second chance.
fn link_late_openers(store: &mut HierarchyStore, tabs: &[&Tab]) {
    for tab in tabs {
        let Some(opener) = tab.opener_tab_id else {
            continue;
        };
        let unlinked = store
            .forest()
            .node(tab.id)
            .is_some_and(|node| node.parent_id.is_none());
        if unlinked && store.contains(opener) {
            let _ = store.set_parent(tab.id, Some(opener));
        }
    }
}

/// Correct every issue [`validate`] reports, in report order, then re-sort all
/// child lists and validate again.
pub fn repair(store: &mut HierarchyStore, external: &[Tab]) -> RepairResult {
    let report = validate(store, external);
    let deduped = dedup_external(external);
    let by_id: HashMap<TabId, &Tab> = deduped.iter().map(|tab| (tab.id, *tab)).collect();

    let mut repairs = 0;
    let mut missing_handled = false;
    let mut windows_handled = false;

    for issue in &report.issues {
        repairs += match issue {
            Issue::OrphanedInHierarchy { tab_id } => usize::from(store.remove_node(*tab_id, false)),
            Issue::MissingInHierarchy { .. } if missing_handled => 0,
            Issue::MissingInHierarchy { .. } => {
                missing_handled = true;
                let missing: Vec<&Tab> = report
                    .issues
                    .iter()
                    .filter_map(|issue| match issue {
                        Issue::MissingInHierarchy { tab_id } => by_id.get(tab_id).copied(),
                        _ => None,
                    })
                    .collect();
                add_missing(store, &missing)
            },
            Issue::IndexMismatch {
                tab_id, expected, ..
            } => usize::from(store.overwrite_placement(*tab_id, Some(*expected), None)),
            Issue::WindowMismatch {
                tab_id, expected, ..
            } => usize::from(store.overwrite_placement(*tab_id, None, Some(*expected))),
            Issue::MissingTabsInWindow { .. } | Issue::ExtraTabsInWindow { .. }
                if windows_handled =>
            {
                0
            },
            Issue::MissingTabsInWindow { .. } | Issue::ExtraTabsInWindow { .. } => {
                windows_handled = true;
                store.sever_cross_window_links()
            },
            structural => repair_structural(store, structural),
        };
    }

    // Overwritten windows can leave a child hanging under a parent elsewhere
    // even when no window-set issue was reported up front.
    repairs += store.sever_cross_window_links();
    store.sort_all_children();
    let after = validate(store, external);
    if repairs > 0 {
        info!(
            "reconcile: repaired {repairs} issue(s), {} remaining",
            after.issues.len()
        );
    }
    RepairResult {
        success: after.is_valid,
        repairs_performed: repairs,
        remaining_issues: after.issues,
    }
}

/// Re-derive the whole forest from `external`. Parent links come only from the
/// host's opener references; any hierarchy the host does not track is lost.
pub fn rebuild(store: &mut HierarchyStore, external: &[Tab]) {
    let tabs = dedup_external(external);
    store.clear();
    let added = add_missing(store, &tabs);
    store.sort_all_children();
    info!("reconcile: rebuilt forest with {added} tab(s)");
}

/// One reconciliation pass: validate, then repair, then rebuild if needed.
///
/// Repair roots every node it cannot place, so the rebuild is a fallback
/// for a repair that still leaves issues behind.
pub fn reconcile_once(store: &mut HierarchyStore, external: &[Tab], force: bool) -> SyncOutcome {
    reconcile_with(store, external, force, repair)
}

fn reconcile_with(
    store: &mut HierarchyStore,
    external: &[Tab],
    force: bool,
    repair: impl FnOnce(&mut HierarchyStore, &[Tab]) -> RepairResult,
) -> SyncOutcome {
    let report = validate(store, external);
    if report.is_valid && !force {
        return SyncOutcome {
            action: SyncAction::None,
            report,
            repair: None,
        };
    }

    let repaired = repair(store, external);
    if repaired.success {
        return SyncOutcome {
            action: SyncAction::Repair,
            report,
            repair: Some(repaired),
        };
    }

    warn!(
        "reconcile: repair left {} issue(s), rebuilding",
        repaired.remaining_issues.len()
    );
    rebuild(store, external);
    SyncOutcome {
        action: SyncAction::Rebuild,
        report,
        repair: Some(repaired),
    }
}
