/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Periodic parity checker.

use std::sync::Arc;
use std::time::Duration;

use forest_core::ValidationReport;
use log::{debug, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::sync::{CheckOutcome, SyncCoordinator, SyncError};
use crate::events::TabSource;

pub type IssueCallback = Arc<dyn Fn(&ValidationReport) + Send + Sync>;

struct RunningTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct CheckerState {
    running: Option<RunningTask>,
    last_report: Option<ValidationReport>,
}

/// Start/stop controller around a timer that runs [`SyncCoordinator::check`].
pub struct Checker<S: TabSource> {
    coordinator: SyncCoordinator<S>,
    interval: Duration,
    on_issue: IssueCallback,
    state: Arc<Mutex<CheckerState>>,
}

impl<S: TabSource> Checker<S> {
    pub fn new(coordinator: SyncCoordinator<S>, interval: Duration, on_issue: IssueCallback) -> Self {
        Self {
            coordinator,
            interval,
            on_issue,
            state: Arc::new(Mutex::new(CheckerState::default())),
        }
    }

    /// Checker whose issue callback only logs.
    pub fn logging(coordinator: SyncCoordinator<S>, interval: Duration) -> Self {
        Self::new(
            coordinator,
            interval,
            Arc::new(|report: &ValidationReport| {
                warn!("checker: {} issue(s) found", report.issues.len());
            }),
        )
    }

    /// Begin checking every interval. The first check runs one full interval
    /// from now. Starting an already running checker does nothing.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state
            .running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
        {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_checker(
            self.coordinator.clone(),
            self.interval,
            Arc::clone(&self.on_issue),
            Arc::clone(&self.state),
            cancel.clone(),
        ));
        state.running = Some(RunningTask { cancel, task });
        debug!("checker: started ({:?} interval)", self.interval);
    }

    /// Stop the timer. No check is started after this returns.
    pub fn stop(&self) {
        let running = self.state.lock().running.take();
        if let Some(running) = running {
            running.cancel.cancel();
            running.task.abort();
            debug!("checker: stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Run one check immediately, independent of the timer.
    pub async fn check_now(&self) -> Result<CheckOutcome, SyncError> {
        run_check(&self.coordinator, &self.on_issue, &self.state).await
    }

    /// The report of the most recent check that got to validate.
    pub fn last_report(&self) -> Option<ValidationReport> {
        self.state.lock().last_report.clone()
    }
}

impl<S: TabSource> Drop for Checker<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_checker<S: TabSource>(
    coordinator: SyncCoordinator<S>,
    interval: Duration,
    on_issue: IssueCallback,
    state: Arc<Mutex<CheckerState>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("checker: cancelled");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = run_check(&coordinator, &on_issue, &state).await {
                    warn!("checker: check failed, retrying next interval: {e}");
                }
            }
        }
    }
}

async fn run_check<S: TabSource>(
    coordinator: &SyncCoordinator<S>,
    on_issue: &IssueCallback,
    state: &Mutex<CheckerState>,
) -> Result<CheckOutcome, SyncError> {
    let outcome = coordinator.check(|report| on_issue(report)).await?;
    if let Some(report) = outcome.report() {
        state.lock().last_report = Some(report.clone());
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StaticTabSource;
    use crate::runtime::actor::StoreActor;
    use forest_core::{HierarchyStore, Tab};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn checker(
        tabs: Vec<Tab>,
        interval: Duration,
    ) -> (Checker<StaticTabSource>, StaticTabSource, Arc<AtomicUsize>) {
        let source = StaticTabSource::new(tabs);
        let (handle, _task) = StoreActor::spawn(HierarchyStore::new(), None);
        let coordinator = SyncCoordinator::new(Arc::new(source.clone()), handle);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let checker = Checker::new(
            coordinator,
            interval,
            Arc::new(move |_report: &ValidationReport| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (checker, source, calls)
    }

    #[tokio::test]
    async fn check_now_records_last_report_and_repairs() {
        let (checker, _source, calls) = checker(vec![Tab::new(1, 1, 0)], Duration::from_secs(60));
        assert!(checker.last_report().is_none());

        let outcome = checker.check_now().await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Repaired { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!checker.last_report().unwrap().is_valid);

        checker.check_now().await.unwrap();
        assert!(checker.last_report().unwrap().is_valid);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_checks_every_interval_until_stopped() {
        let (checker, source, calls) = checker(vec![Tab::new(1, 1, 0)], Duration::from_millis(100));

        checker.start();
        checker.start();
        assert!(checker.is_running());
        assert_eq!(source.query_count(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let queries = source.query_count();
        assert!(queries >= 2);

        checker.stop();
        assert!(!checker.is_running());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.query_count(), queries);

        checker.start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(source.query_count() > queries);
        checker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_does_not_stop_the_timer() {
        let (checker, source, _calls) = checker(vec![Tab::new(1, 1, 0)], Duration::from_millis(100));
        source.fail_next("offline");

        checker.start();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(checker.is_running());
        assert_eq!(source.query_count(), 3);
        assert!(checker.last_report().is_some());
        checker.stop();
    }
}
