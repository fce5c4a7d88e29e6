/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::sync::Arc;

use rstest::rstest;
use serde_json::json;
use tabforest::VERSION;
use tabforest::config::ForestConfig;
use tabforest::events::{StaticTabSource, TabEvent, TabSource};
use tabforest::forest_core::{
    HierarchyStore, Issue, NodePatch, SyncAction, SyncOutcome, Tab, TabId, WindowId,
};
use tabforest::persistence::{BlobStore, RedbBlobStore};
use tabforest::runtime::ForestRuntime;
use tabforest::runtime::sync::SyncReport;
use tempfile::TempDir;

fn child_ids(children: &[tabforest::forest_core::TreeNode]) -> Vec<u64> {
    children.iter().map(|tree| tree.node.id.0).collect()
}

fn completed(report: SyncReport) -> SyncOutcome {
    match report {
        SyncReport::Completed(outcome) => outcome,
        SyncReport::Coalesced => panic!("sync unexpectedly coalesced"),
    }
}

#[test]
fn scenarios_binary_smoke_runs() {
    assert!(!VERSION.is_empty());
}

#[tokio::test]
async fn missed_events_are_healed_by_the_next_sync() {
    let host = StaticTabSource::new(vec![
        Tab::new(1, 1, 0),
        Tab::new(2, 1, 1).with_opener(1),
        Tab::new(3, 1, 2).with_opener(1),
    ]);
    let runtime = ForestRuntime::start(&ForestConfig::default(), host.clone(), None).await;
    let handle = runtime.handle().clone();
    let service = runtime.service();

    // Tab 3's creation was never delivered, and a stale removal arrives for a
    // tab the store never saw.
    for tab in [Tab::new(1, 1, 0), Tab::new(2, 1, 1).with_opener(1)] {
        handle.apply_event(TabEvent::Created { tab }).await.unwrap();
    }
    assert!(
        !handle
            .apply_event(TabEvent::Removed {
                tab_id: TabId(40),
                window_closing: false,
            })
            .await
            .unwrap()
    );

    let report = service.validate_parity().await.unwrap();
    assert_eq!(
        report.issues.first(),
        Some(&Issue::MissingInHierarchy { tab_id: TabId(3) })
    );

    let outcome = completed(runtime.coordinator().sync(false).await.unwrap());
    assert_eq!(outcome.action, SyncAction::Repair);

    let forest = service.get_hierarchy(None).await.unwrap();
    assert_eq!(child_ids(&forest), vec![1]);
    assert_eq!(child_ids(&forest[0].children), vec![2, 3]);
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn host_side_move_is_picked_up_by_forced_sync() {
    let host = StaticTabSource::new(vec![
        Tab::new(1, 1, 0),
        Tab::new(2, 1, 1).with_opener(1),
        Tab::new(3, 1, 2).with_opener(1),
    ]);
    let runtime = ForestRuntime::start(&ForestConfig::default(), host.clone(), None).await;
    let service = runtime.service();
    service.repair_hierarchy().await.unwrap();

    // Drag-and-drop moves the tab on the host; its Moved event is lost.
    host.move_tab(TabId(3), 1, None).await.unwrap();

    let outcome = completed(service.repair_hierarchy().await.unwrap());
    assert_eq!(outcome.action, SyncAction::Repair);
    assert!(outcome.report.issues.contains(&Issue::IndexMismatch {
        tab_id: TabId(3),
        expected: 1,
        actual: 2,
    }));

    let forest = service.get_hierarchy(Some(WindowId(1))).await.unwrap();
    assert_eq!(child_ids(&forest[0].children), vec![3, 2]);
    assert!(service.validate_parity().await.unwrap().is_valid);
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn orphaned_tab_is_dropped_by_repair() {
    let host = StaticTabSource::new((1..=5).map(|id| Tab::new(id, 1, id as u32)).collect());
    let runtime = ForestRuntime::start(&ForestConfig::default(), host.clone(), None).await;
    let service = runtime.service();
    service.repair_hierarchy().await.unwrap();

    host.set_tabs((1..=4).map(|id| Tab::new(id, 1, id as u32)).collect());
    let report = service.validate_parity().await.unwrap();
    assert!(
        report
            .issues
            .contains(&Issue::OrphanedInHierarchy { tab_id: TabId(5) })
    );

    let outcome = runtime.checker().check_now().await.unwrap();
    assert!(outcome.report().is_some_and(|report| !report.is_valid));
    assert_eq!(service.get_tab(TabId(5)).await.unwrap(), None);
    assert!(runtime.checker().last_report().is_some());
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn redb_persistence_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = ForestConfig {
        save_debounce_ms: 10,
        store_dir: Some(dir.path().to_path_buf()),
        ..ForestConfig::default()
    };
    let host = StaticTabSource::new(Vec::new());

    {
        let blobs: Arc<dyn BlobStore> = Arc::new(RedbBlobStore::open(dir.path()).unwrap());
        let runtime = ForestRuntime::start(&config, host.clone(), Some(blobs)).await;
        let handle = runtime.handle();
        for tab in [
            Tab::new(10, 1, 0).with_title("docs"),
            Tab::new(11, 1, 2).with_opener(10),
            Tab::new(12, 1, 1).with_opener(10),
        ] {
            handle.apply_event(TabEvent::Created { tab }).await.unwrap();
        }
        runtime
            .service()
            .update_parent_relationship(TabId(11), Some(TabId(12)))
            .await
            .unwrap();
        runtime.shutdown().await.unwrap();
    }

    let blobs: Arc<dyn BlobStore> = Arc::new(RedbBlobStore::open(dir.path()).unwrap());
    let runtime = ForestRuntime::start(&config, host, Some(blobs)).await;
    let handle = runtime.handle();
    let flat: Vec<(u64, usize)> = handle
        .flatten(None)
        .await
        .unwrap()
        .iter()
        .map(|entry| (entry.node.id.0, entry.depth))
        .collect();
    assert_eq!(flat, vec![(10, 0), (12, 1), (11, 2)]);
    assert_eq!(
        handle.get_node(TabId(10)).await.unwrap().unwrap().title,
        "docs"
    );
    runtime.shutdown().await.unwrap();
}

#[rstest]
#[case::created(
    json!({ "type": "created", "tab": { "id": 3, "windowId": 1, "index": 2, "openerTabId": 1 } }),
    Some(1)
)]
#[case::reparent_to_root(
    json!({ "type": "updated", "tabId": 2, "changes": { "openerTabId": null } }),
    None
)]
#[case::attached_elsewhere(
    json!({ "type": "attached", "tabId": 2, "newWindowId": 7, "newPosition": 0 }),
    None
)]
#[case::moved_within_window(
    json!({ "type": "moved", "tabId": 2, "fromIndex": 1, "toIndex": 0, "windowId": 1 }),
    Some(1)
)]
fn host_json_events_apply_to_store(#[case] raw: serde_json::Value, #[case] parent: Option<u64>) {
    let mut store = HierarchyStore::new();
    store.add_node(&Tab::new(1, 1, 0), None).unwrap();
    store.add_node(&Tab::new(2, 1, 1), Some(TabId(1))).unwrap();

    let event: TabEvent = serde_json::from_value(raw).unwrap();
    assert!(tabforest::events::apply_event(&mut store, &event));

    let node = store.get_node(event.tab_id()).unwrap();
    assert_eq!(node.parent_id, parent.map(TabId));
    assert!(store.forest().invariant_violations().is_empty());
}

#[test]
fn malformed_patch_is_rejected_at_the_boundary() {
    let raw = json!({ "type": "updated", "tabId": 2, "changes": { "pinned": "yes" } });
    assert!(serde_json::from_value::<TabEvent>(raw).is_err());

    let patch: NodePatch = serde_json::from_value(json!({ "title": "ok", "children": [9] })).unwrap();
    assert_eq!(patch.title.as_deref(), Some("ok"));
}
