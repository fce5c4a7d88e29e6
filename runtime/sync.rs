/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Reconciliation passes against the host.
//!
//! At most one pass runs at a time. A sync requested while another pass is in
//! flight is folded into a single follow-up pass instead of queueing.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use forest_core::{RepairResult, SyncAction, SyncOutcome, Tab, ValidationReport};
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::actor::{ActorError, StoreHandle};
use crate::events::{SourceError, TabSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The host list could not be fetched; the store was not touched.
    Fetch(SourceError),
    Actor(ActorError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Fetch(e) => write!(f, "sync aborted, fetch failed: {e}"),
            SyncError::Actor(e) => write!(f, "sync aborted: {e}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<ActorError> for SyncError {
    fn from(e: ActorError) -> Self {
        SyncError::Actor(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    Completed(SyncOutcome),
    /// Another pass was in flight; it will run once more on our behalf.
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Valid(ValidationReport),
    Repaired {
        report: ValidationReport,
        repair: RepairResult,
    },
    /// A reconciliation pass was already running.
    Skipped,
}

impl CheckOutcome {
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            CheckOutcome::Valid(report) | CheckOutcome::Repaired { report, .. } => Some(report),
            CheckOutcome::Skipped => None,
        }
    }
}

pub struct SyncCoordinator<S: TabSource> {
    source: Arc<S>,
    handle: StoreHandle,
    gate: Arc<Mutex<()>>,
    rerun: Arc<AtomicBool>,
    rerun_forced: Arc<AtomicBool>,
}

impl<S: TabSource> Clone for SyncCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            handle: self.handle.clone(),
            gate: Arc::clone(&self.gate),
            rerun: Arc::clone(&self.rerun),
            rerun_forced: Arc::clone(&self.rerun_forced),
        }
    }
}

impl<S: TabSource> SyncCoordinator<S> {
    pub fn new(source: Arc<S>, handle: StoreHandle) -> Self {
        Self {
            source,
            handle,
            gate: Arc::new(Mutex::new(())),
            rerun: Arc::new(AtomicBool::new(false)),
            rerun_forced: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    #[cfg(test)]
    pub(crate) fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    pub(crate) async fn fetch(&self) -> Result<Vec<Tab>, SyncError> {
        self.source.query_all_tabs().await.map_err(SyncError::Fetch)
    }

    /// Bring the store in line with the host: nothing when already valid
    /// (unless `force`), else repair, else rebuild.
    pub async fn sync(&self, force: bool) -> Result<SyncReport, SyncError> {
        let Ok(gate) = self.gate.try_lock() else {
            if force {
                self.rerun_forced.store(true, Ordering::SeqCst);
            }
            self.rerun.store(true, Ordering::SeqCst);
            debug!("sync: pass in flight, coalescing request (force: {force})");
            // The holder may have drained its reruns before the flag was set.
            self.settle_reruns().await;
            return Ok(SyncReport::Coalesced);
        };

        let first = self.pass(force).await;
        if let Err(e) = &first {
            warn!("sync: pass failed: {e}");
        }
        self.drain_reruns().await;
        drop(gate);
        self.settle_reruns().await;
        first.map(SyncReport::Completed)
    }

    /// Run coalesced follow-up passes while holding the gate.
    async fn drain_reruns(&self) {
        while self.rerun.swap(false, Ordering::SeqCst) {
            let forced = self.rerun_forced.swap(false, Ordering::SeqCst);
            if let Err(e) = self.pass(forced).await {
                warn!("sync: coalesced pass failed: {e}");
            }
        }
    }

    /// Pick up a rerun requested after the last drain. Stops as soon as
    /// another caller holds the gate, since that caller settles on release.
    async fn settle_reruns(&self) {
        while self.rerun.load(Ordering::SeqCst) {
            let Ok(_gate) = self.gate.try_lock() else {
                break;
            };
            self.drain_reruns().await;
        }
    }

    async fn pass(&self, force: bool) -> Result<SyncOutcome, SyncError> {
        let external = self.fetch().await?;
        let outcome = self.handle.reconcile(external, force).await?;
        match outcome.action {
            SyncAction::None => debug!("sync: forest matches host"),
            SyncAction::Repair => info!(
                "sync: repaired {} issue(s)",
                outcome.report.issues.len()
            ),
            SyncAction::Rebuild => info!("sync: forest rebuilt from host"),
        }
        Ok(outcome)
    }

    /// One parity check: validate, and on failure report the issues and
    /// repair against a freshly fetched host list.
    pub async fn check(
        &self,
        on_issue: impl FnOnce(&ValidationReport),
    ) -> Result<CheckOutcome, SyncError> {
        let Ok(_gate) = self.gate.try_lock() else {
            return Ok(CheckOutcome::Skipped);
        };

        let external = self.fetch().await?;
        let report = self.handle.validate(external).await?;
        if report.is_valid {
            return Ok(CheckOutcome::Valid(report));
        }
        on_issue(&report);

        // The host may have moved on while the report was handled.
        let external = self.fetch().await?;
        let repair = self.handle.repair(external).await?;
        if !repair.success {
            warn!(
                "check: repair left {} issue(s)",
                repair.remaining_issues.len()
            );
        }
        Ok(CheckOutcome::Repaired { report, repair })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StaticTabSource;
    use crate::runtime::actor::StoreActor;
    use forest_core::{HierarchyStore, Issue, TabId};
    use std::future::Future;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn coordinator(tabs: Vec<Tab>) -> (SyncCoordinator<StaticTabSource>, StaticTabSource) {
        let source = StaticTabSource::new(tabs);
        let (handle, _task) = StoreActor::spawn(HierarchyStore::new(), None);
        (SyncCoordinator::new(Arc::new(source.clone()), handle), source)
    }

    #[tokio::test]
    async fn sync_repairs_then_reports_nothing_to_do() {
        let (sync, _source) = coordinator(vec![Tab::new(1, 1, 0), Tab::new(2, 1, 1).with_opener(1)]);

        let first = sync.sync(false).await.unwrap();
        let SyncReport::Completed(outcome) = first else {
            panic!("expected a completed pass");
        };
        assert_eq!(outcome.action, SyncAction::Repair);

        let second = sync.sync(false).await.unwrap();
        assert!(matches!(
            second,
            SyncReport::Completed(SyncOutcome {
                action: SyncAction::None,
                ..
            })
        ));
        let node = sync.handle().get_node(TabId(2)).await.unwrap().unwrap();
        assert_eq!(node.parent_id, Some(TabId(1)));
    }

    #[tokio::test]
    async fn fetch_failure_leaves_store_untouched() {
        let (sync, source) = coordinator(vec![Tab::new(1, 1, 0)]);
        source.fail_next("host gone");

        let err = sync.sync(true).await.unwrap_err();
        assert_eq!(err, SyncError::Fetch(SourceError::Unavailable("host gone".into())));
        let (forest, revision) = sync.handle().snapshot().await.unwrap();
        assert!(forest.is_empty());
        assert_eq!(revision, 0);
    }

    /// Blocks every query until released.
    struct GatedSource {
        inner: StaticTabSource,
        release: Arc<Notify>,
    }

    impl TabSource for GatedSource {
        fn query_all_tabs(&self) -> impl Future<Output = Result<Vec<Tab>, SourceError>> + Send {
            let release = Arc::clone(&self.release);
            let inner = self.inner.clone();
            async move {
                release.notified().await;
                inner.query_all_tabs().await
            }
        }

        fn move_tab(
            &self,
            id: TabId,
            index: u32,
            window: Option<forest_core::WindowId>,
        ) -> impl Future<Output = Result<(), SourceError>> + Send {
            self.inner.move_tab(id, index, window)
        }
    }

    #[tokio::test]
    async fn concurrent_requests_are_coalesced_into_one_rerun() {
        let inner = StaticTabSource::new(vec![Tab::new(1, 1, 0)]);
        let release = Arc::new(Notify::new());
        let source = Arc::new(GatedSource {
            inner: inner.clone(),
            release: Arc::clone(&release),
        });
        let (handle, _task) = StoreActor::spawn(HierarchyStore::new(), None);
        let sync = SyncCoordinator::new(source, handle);

        let running = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.sync(false).await })
        };
        while !sync.is_busy() {
            tokio::task::yield_now().await;
        }

        assert_eq!(sync.sync(true).await.unwrap(), SyncReport::Coalesced);
        assert_eq!(sync.sync(false).await.unwrap(), SyncReport::Coalesced);
        assert!(matches!(
            sync.check(|_| {}).await.unwrap(),
            CheckOutcome::Skipped
        ));

        // One permit for the original pass, one for the single rerun.
        release.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
        release.notify_one();
        let report = running.await.unwrap().unwrap();
        assert!(matches!(report, SyncReport::Completed(_)));
        assert_eq!(inner.query_count(), 2);
        assert!(!sync.is_busy());
    }

    #[tokio::test]
    async fn coalesced_request_still_runs_when_the_first_pass_fails() {
        let inner = StaticTabSource::new(vec![Tab::new(1, 1, 0)]);
        inner.fail_next("blip");
        let release = Arc::new(Notify::new());
        let source = Arc::new(GatedSource {
            inner: inner.clone(),
            release: Arc::clone(&release),
        });
        let (handle, _task) = StoreActor::spawn(HierarchyStore::new(), None);
        let sync = SyncCoordinator::new(source, handle);

        let running = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.sync(false).await })
        };
        while !sync.is_busy() {
            tokio::task::yield_now().await;
        }
        assert_eq!(sync.sync(true).await.unwrap(), SyncReport::Coalesced);

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
        release.notify_one();
        let first = running.await.unwrap();

        assert_eq!(
            first,
            Err(SyncError::Fetch(SourceError::Unavailable("blip".into())))
        );
        assert_eq!(inner.query_count(), 2);
        assert!(!sync.rerun.load(Ordering::SeqCst));
        assert!(!sync.rerun_forced.load(Ordering::SeqCst));
        assert!(sync.handle().get_node(TabId(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rerun_flagged_after_the_last_drain_is_picked_up() {
        let (sync, source) = coordinator(vec![Tab::new(1, 1, 0)]);

        // A request coalesced just before the previous holder released the gate.
        sync.rerun.store(true, Ordering::SeqCst);
        sync.rerun_forced.store(true, Ordering::SeqCst);

        let report = sync.sync(false).await.unwrap();
        assert!(matches!(
            report,
            SyncReport::Completed(SyncOutcome {
                action: SyncAction::Repair,
                ..
            })
        ));
        assert_eq!(source.query_count(), 2);
        assert!(!sync.rerun.load(Ordering::SeqCst));
        assert!(!sync.rerun_forced.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn check_reports_issues_then_repairs_with_fresh_list() {
        let (sync, source) = coordinator(vec![Tab::new(1, 1, 0), Tab::new(5, 1, 1)]);
        sync.sync(false).await.unwrap();

        source.set_tabs(vec![Tab::new(1, 1, 0)]);
        let mut seen = Vec::new();
        let outcome = sync
            .check(|report| seen.extend(report.issues.iter().cloned()))
            .await
            .unwrap();

        assert!(seen.contains(&Issue::OrphanedInHierarchy { tab_id: TabId(5) }));
        let CheckOutcome::Repaired { repair, .. } = outcome else {
            panic!("expected a repair");
        };
        assert!(repair.success);
        assert!(sync.handle().get_node(TabId(5)).await.unwrap().is_none());
        assert!(matches!(
            sync.check(|_| panic!("no issues expected")).await.unwrap(),
            CheckOutcome::Valid(_)
        ));
    }
}
