/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Debounced snapshot writer.
//!
//! The store only publishes its revision. This task owns a single deadline:
//! every new revision pushes it out by the quiet period, and when it expires
//! one snapshot is written. Cancelling the task flushes a pending write.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{BlobStore, save_forest};
use crate::runtime::actor::StoreHandle;

pub struct DebouncedSaver {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DebouncedSaver {
    /// Start watching `revisions`. The revision current at spawn time counts
    /// as already saved.
    pub fn spawn(
        handle: StoreHandle,
        mut revisions: watch::Receiver<u64>,
        blobs: Arc<dyn BlobStore>,
        quiet_period: Duration,
    ) -> Self {
        let saved = *revisions.borrow_and_update();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_saver(
            handle,
            revisions,
            saved,
            blobs,
            quiet_period,
            cancel.clone(),
        ));
        Self { cancel, task }
    }

    /// Write out anything pending and stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("saver: task ended abnormally: {e}");
        }
    }
}

async fn run_saver(
    handle: StoreHandle,
    mut revisions: watch::Receiver<u64>,
    mut saved: u64,
    blobs: Arc<dyn BlobStore>,
    quiet_period: Duration,
    cancel: CancellationToken,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let expiry = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    // Store is gone; write what we have below.
                    break;
                }
                deadline = Some(Instant::now() + quiet_period);
            }
            _ = expiry => {
                deadline = None;
                if let Some(revision) = save_latest(&handle, &blobs).await {
                    saved = revision;
                }
            }
        }
    }

    if deadline.is_some() || *revisions.borrow() != saved {
        debug!("saver: flushing pending snapshot");
        save_latest(&handle, &blobs).await;
    }
    debug!("saver: stopped");
}

/// Snapshot the store and write it off the async workers. Returns the saved
/// revision, or `None` when nothing was written.
async fn save_latest(handle: &StoreHandle, blobs: &Arc<dyn BlobStore>) -> Option<u64> {
    let (forest, revision) = match handle.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Failed to snapshot forest for saving: {e}");
            return None;
        },
    };
    let blobs = Arc::clone(blobs);
    let written = tokio::task::spawn_blocking(move || save_forest(blobs.as_ref(), &forest)).await;
    match written {
        Ok(Ok(())) => {
            debug!("saver: wrote revision {revision}");
            Some(revision)
        },
        Ok(Err(e)) => {
            warn!("Failed to save forest: {e}");
            None
        },
        Err(e) => {
            warn!("Failed to save forest: {e}");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryBlobStore, load_store};
    use crate::runtime::actor::StoreActor;
    use forest_core::{HierarchyStore, Tab};

    #[tokio::test(start_paused = true)]
    async fn bursts_coalesce_into_one_write() {
        let (revisions_tx, revisions) = watch::channel(0);
        let (handle, _task) = StoreActor::spawn(HierarchyStore::new(), Some(revisions_tx));
        let blobs = MemoryBlobStore::new();
        let saver = DebouncedSaver::spawn(
            handle.clone(),
            revisions,
            Arc::new(blobs.clone()),
            Duration::from_millis(500),
        );

        for id in 0..5_u64 {
            handle
                .add_tab(Tab::new(id, 1, u32::try_from(id).unwrap()), None)
                .await
                .unwrap()
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(blobs.save_count(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(blobs.save_count(), 1);
        assert_eq!(load_store(&blobs).len(), 5);

        saver.shutdown().await;
        assert_eq!(blobs.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_change() {
        let (revisions_tx, revisions) = watch::channel(0);
        let (handle, _task) = StoreActor::spawn(HierarchyStore::new(), Some(revisions_tx));
        let blobs = MemoryBlobStore::new();
        let saver = DebouncedSaver::spawn(
            handle.clone(),
            revisions,
            Arc::new(blobs.clone()),
            Duration::from_secs(30),
        );

        handle.add_tab(Tab::new(1, 1, 0), None).await.unwrap().unwrap();
        saver.shutdown().await;

        assert_eq!(blobs.save_count(), 1);
        assert_eq!(load_store(&blobs).len(), 1);
    }
}
