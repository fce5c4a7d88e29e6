/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Host tab lifecycle notifications and how they map onto store mutations.
//!
//! Events are applied strictly in arrival order by the store actor. Events
//! that reference tabs the store does not know (or no longer knows) are
//! dropped here; the reconciler picks up whatever drift that leaves behind.

pub mod source;

use forest_core::{HierarchyStore, NodePatch, Tab, TabId, WindowId};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

pub use source::{SourceError, StaticTabSource, TabSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum TabEvent {
    Created {
        tab: Tab,
    },
    Removed {
        tab_id: TabId,
        #[serde(default)]
        window_closing: bool,
    },
    Moved {
        tab_id: TabId,
        from_index: u32,
        to_index: u32,
        window_id: WindowId,
    },
    Updated {
        tab_id: TabId,
        changes: NodePatch,
    },
    Attached {
        tab_id: TabId,
        new_window_id: WindowId,
        new_position: u32,
    },
    Detached {
        tab_id: TabId,
        old_window_id: WindowId,
    },
}

impl TabEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            TabEvent::Created { tab } => tab.id,
            TabEvent::Removed { tab_id, .. }
            | TabEvent::Moved { tab_id, .. }
            | TabEvent::Updated { tab_id, .. }
            | TabEvent::Attached { tab_id, .. }
            | TabEvent::Detached { tab_id, .. } => *tab_id,
        }
    }
}

/// Apply one host event. Returns whether the store changed.
pub fn apply_event(store: &mut HierarchyStore, event: &TabEvent) -> bool {
    match event {
        TabEvent::Created { tab } => match store.add_node(tab, tab.opener_tab_id) {
            Ok(()) => true,
            Err(err) => {
                warn!("events: ignoring create for {}: {err}", tab.id);
                false
            },
        },
        TabEvent::Removed {
            tab_id,
            window_closing,
        } => {
            trace!("events: remove {tab_id} (window closing: {window_closing})");
            store.remove_node(*tab_id, false)
        },
        TabEvent::Moved {
            tab_id,
            from_index,
            to_index,
            window_id,
        } => {
            trace!("events: move {tab_id} {from_index} -> {to_index} in {window_id}");
            store.update_node(*tab_id, &NodePatch::placement(*window_id, *to_index))
        },
        TabEvent::Updated { tab_id, changes } => store.update_node(*tab_id, changes),
        TabEvent::Attached {
            tab_id,
            new_window_id,
            new_position,
        } => store.update_node(*tab_id, &NodePatch::placement(*new_window_id, *new_position)),
        TabEvent::Detached {
            tab_id,
            old_window_id,
        } => {
            // The matching attach carries the new placement.
            debug!("events: {tab_id} detached from {old_window_id}");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn ids(store: &HierarchyStore, id: u64) -> Vec<u64> {
        store
            .get_children(TabId(id))
            .iter()
            .map(|node| node.id.0)
            .collect()
    }

    #[test]
    fn lifecycle_sequence_keeps_forest_consistent() {
        let mut store = HierarchyStore::new();
        let events = [
            TabEvent::Created {
                tab: Tab::new(1, 1, 0),
            },
            TabEvent::Created {
                tab: Tab::new(2, 1, 1).with_opener(1),
            },
            TabEvent::Created {
                tab: Tab::new(3, 1, 2).with_opener(1),
            },
            TabEvent::Moved {
                tab_id: TabId(3),
                from_index: 2,
                to_index: 0,
                window_id: WindowId(1),
            },
        ];
        for event in &events {
            assert!(apply_event(&mut store, event));
        }
        assert_eq!(ids(&store, 1), vec![3, 2]);

        assert!(apply_event(
            &mut store,
            &TabEvent::Attached {
                tab_id: TabId(2),
                new_window_id: WindowId(2),
                new_position: 0,
            }
        ));
        assert_eq!(ids(&store, 1), vec![3]);
        assert_eq!(store.get_node(TabId(2)).unwrap().parent_id, None);

        assert!(apply_event(
            &mut store,
            &TabEvent::Removed {
                tab_id: TabId(1),
                window_closing: false,
            }
        ));
        assert_eq!(store.root_ids(), vec![TabId(2), TabId(3)]);
        assert!(store.forest().invariant_violations().is_empty());
    }

    #[test]
    fn duplicate_create_and_unknown_targets_are_ignored() {
        let mut store = HierarchyStore::new();
        let create = TabEvent::Created {
            tab: Tab::new(1, 1, 0),
        };
        assert!(apply_event(&mut store, &create));
        assert!(!apply_event(&mut store, &create));
        assert!(!apply_event(
            &mut store,
            &TabEvent::Removed {
                tab_id: TabId(8),
                window_closing: true,
            }
        ));
        assert!(!apply_event(
            &mut store,
            &TabEvent::Detached {
                tab_id: TabId(1),
                old_window_id: WindowId(1),
            }
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn events_deserialize_from_host_json() {
        let events: Vec<TabEvent> = serde_json::from_value(json!([
            { "type": "created", "tab": { "id": 4, "windowId": 1, "index": 0 } },
            { "type": "updated", "tabId": 4, "changes": { "title": "t", "parentId": 9 } },
            { "type": "removed", "tabId": 4 },
        ]))
        .unwrap();

        assert_eq!(events[0].tab_id(), TabId(4));
        assert_eq!(
            events[1],
            TabEvent::Updated {
                tab_id: TabId(4),
                changes: NodePatch {
                    title: Some("t".into()),
                    ..NodePatch::default()
                },
            }
        );
        assert_eq!(
            events[2],
            TabEvent::Removed {
                tab_id: TabId(4),
                window_closing: false,
            }
        );

        let malformed: Result<TabEvent, _> =
            serde_json::from_value(json!({ "type": "created", "tab": { "windowId": 1, "index": 0 } }));
        assert!(malformed.is_err());
    }

    fn event_strategy() -> impl Strategy<Value = TabEvent> {
        let id = 0..12_u64;
        prop_oneof![
            (id.clone(), 0..3_u64, 0..8_u32, proptest::option::of(0..12_u64)).prop_map(
                |(id, window, index, opener)| {
                    let mut tab = Tab::new(id, window, index);
                    tab.opener_tab_id = opener.map(TabId);
                    TabEvent::Created { tab }
                }
            ),
            (id.clone(), any::<bool>()).prop_map(|(id, window_closing)| TabEvent::Removed {
                tab_id: TabId(id),
                window_closing,
            }),
            (id.clone(), 0..8_u32, 0..3_u64).prop_map(|(id, to_index, window)| {
                TabEvent::Moved {
                    tab_id: TabId(id),
                    from_index: 0,
                    to_index,
                    window_id: WindowId(window),
                }
            }),
            (id.clone(), proptest::option::of(0..12_u64)).prop_map(|(id, opener)| {
                TabEvent::Updated {
                    tab_id: TabId(id),
                    changes: NodePatch::opener(opener.map(TabId)),
                }
            }),
            (id, 0..3_u64, 0..8_u32).prop_map(|(id, window, position)| TabEvent::Attached {
                tab_id: TabId(id),
                new_window_id: WindowId(window),
                new_position: position,
            }),
        ]
    }

    proptest! {
        #[test]
        fn proptest_any_event_order_keeps_invariants(
            events in proptest::collection::vec(event_strategy(), 0..60)
        ) {
            let mut store = HierarchyStore::new();
            for event in &events {
                apply_event(&mut store, event);
                let violations = store.forest().invariant_violations();
                prop_assert!(violations.is_empty(), "{violations:?} after {event:?}");
            }
        }
    }
}
