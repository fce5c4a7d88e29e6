/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Query surface for presentation and messaging layers.
//!
//! Only copies and summaries leave through here; nothing hands out access to
//! the live forest.

use std::fmt;

use forest_core::{ForestStats, Node, ReparentError, TabId, TreeNode, ValidationReport, WindowId};
use log::debug;
use serde::Serialize;

use crate::events::TabSource;
use crate::runtime::actor::ActorError;
use crate::runtime::sync::{SyncCoordinator, SyncError, SyncReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    Sync(SyncError),
    Reparent(ReparentError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Sync(e) => write!(f, "{e}"),
            ServiceError::Reparent(e) => write!(f, "reparent rejected: {e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<SyncError> for ServiceError {
    fn from(e: SyncError) -> Self {
        ServiceError::Sync(e)
    }
}

impl From<ActorError> for ServiceError {
    fn from(e: ActorError) -> Self {
        ServiceError::Sync(SyncError::Actor(e))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub report: ValidationReport,
    pub stats: ForestStats,
    pub node_count: usize,
    pub root_count: usize,
}

pub struct HierarchyService<S: TabSource> {
    coordinator: SyncCoordinator<S>,
}

impl<S: TabSource> Clone for HierarchyService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: TabSource> HierarchyService<S> {
    pub fn new(coordinator: SyncCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// Ordered roots with their subtrees, optionally for one window.
    pub async fn get_hierarchy(&self, window: Option<WindowId>) -> Result<Vec<TreeNode>, ServiceError> {
        Ok(self.coordinator.handle().get_hierarchy(window).await?)
    }

    pub async fn get_tab(&self, id: TabId) -> Result<Option<Node>, ServiceError> {
        Ok(self.coordinator.handle().get_node(id).await?)
    }

    /// Parity against a fresh host list plus the forest's shape.
    pub async fn get_diagnostics(&self) -> Result<Diagnostics, ServiceError> {
        let external = self.coordinator.fetch().await?;
        let snapshot = self.coordinator.handle().diagnose(external).await?;
        Ok(Diagnostics {
            node_count: snapshot.stats.node_count,
            root_count: snapshot.stats.root_count,
            report: snapshot.report,
            stats: snapshot.stats,
        })
    }

    pub async fn validate_parity(&self) -> Result<ValidationReport, ServiceError> {
        let external = self.coordinator.fetch().await?;
        Ok(self.coordinator.handle().validate(external).await?)
    }

    /// A forced sync: repair even when the forest validates.
    pub async fn repair_hierarchy(&self) -> Result<SyncReport, ServiceError> {
        Ok(self.coordinator.sync(true).await?)
    }

    /// Manual reparent from the presentation layer. `None` makes a root.
    pub async fn update_parent_relationship(
        &self,
        id: TabId,
        new_parent: Option<TabId>,
    ) -> Result<(), ServiceError> {
        self.coordinator
            .handle()
            .set_parent(id, new_parent)
            .await?
            .map_err(ServiceError::Reparent)?;
        debug!("service: {id} moved under {new_parent:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StaticTabSource;
    use crate::runtime::actor::StoreActor;
    use forest_core::{HierarchyStore, Issue, SyncAction, SyncOutcome, Tab};
    use std::sync::Arc;

    async fn service(tabs: Vec<Tab>) -> (HierarchyService<StaticTabSource>, StaticTabSource) {
        let source = StaticTabSource::new(tabs);
        let (handle, _task) = StoreActor::spawn(HierarchyStore::new(), None);
        let service = HierarchyService::new(SyncCoordinator::new(Arc::new(source.clone()), handle));
        service.repair_hierarchy().await.unwrap();
        (service, source)
    }

    #[tokio::test]
    async fn diagnostics_combine_parity_and_shape() {
        let (service, source) = service(vec![
            Tab::new(1, 1, 0),
            Tab::new(2, 1, 1).with_opener(1),
            Tab::new(3, 2, 0),
        ])
        .await;

        let diagnostics = service.get_diagnostics().await.unwrap();
        assert!(diagnostics.report.is_valid);
        assert_eq!(diagnostics.node_count, 3);
        assert_eq!(diagnostics.root_count, 2);
        assert_eq!(diagnostics.stats.max_depth, 1);

        source.set_tabs(vec![Tab::new(1, 1, 0), Tab::new(2, 1, 1).with_opener(1)]);
        let report = service.validate_parity().await.unwrap();
        assert!(report.issues.contains(&Issue::OrphanedInHierarchy { tab_id: TabId(3) }));

        let repaired = service.repair_hierarchy().await.unwrap();
        assert!(matches!(
            repaired,
            SyncReport::Completed(SyncOutcome {
                action: SyncAction::Repair,
                ..
            })
        ));
        assert!(service.get_tab(TabId(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn manual_reparent_is_validated() {
        let (service, _source) = service(vec![
            Tab::new(1, 1, 0),
            Tab::new(2, 1, 1).with_opener(1),
            Tab::new(3, 2, 0),
        ])
        .await;

        let err = service
            .update_parent_relationship(TabId(1), Some(TabId(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Reparent(ReparentError::WouldCycle { .. })));

        let err = service
            .update_parent_relationship(TabId(3), Some(TabId(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Reparent(ReparentError::CrossWindow { .. })));

        service
            .update_parent_relationship(TabId(2), None)
            .await
            .unwrap();
        let window = service.get_hierarchy(Some(WindowId(1))).await.unwrap();
        let roots: Vec<u64> = window.iter().map(|tree| tree.node.id.0).collect();
        assert_eq!(roots, vec![1, 2]);
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_as_sync_error() {
        let (service, source) = service(vec![Tab::new(1, 1, 0)]).await;
        source.fail_next("offline");
        let err = service.validate_parity().await.unwrap_err();
        assert!(matches!(err, ServiceError::Sync(SyncError::Fetch(_))));
    }
}
