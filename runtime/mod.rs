/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Wiring of the long-lived tasks around one store.
//!
//! - `actor`: the single writer that owns the [`HierarchyStore`]
//! - `sync`: serialised, coalescing reconciliation passes
//! - `checker`: the periodic parity check
//!
//! [`ForestRuntime`] starts them together with the debounced saver and tears
//! them down in dependency order.

pub mod actor;
pub mod checker;
pub mod sync;

use std::sync::Arc;

use forest_core::HierarchyStore;
use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ForestConfig;
use crate::events::TabSource;
use crate::persistence::saver::DebouncedSaver;
use crate::persistence::{BlobStore, load_store};
use crate::service::HierarchyService;
use actor::{ActorError, StoreActor, StoreHandle};
use checker::Checker;
use sync::SyncCoordinator;

pub struct ForestRuntime<S: TabSource> {
    handle: StoreHandle,
    actor: JoinHandle<HierarchyStore>,
    coordinator: SyncCoordinator<S>,
    checker: Checker<S>,
    saver: Option<DebouncedSaver>,
}

impl<S: TabSource> ForestRuntime<S> {
    /// Restore the persisted forest (if any), then start the actor, the saver
    /// and the periodic checker.
    pub async fn start(config: &ForestConfig, source: S, blobs: Option<Arc<dyn BlobStore>>) -> Self {
        let store = match &blobs {
            Some(blobs) => {
                let blobs = Arc::clone(blobs);
                tokio::task::spawn_blocking(move || load_store(blobs.as_ref()))
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Failed to load persisted forest: {e}");
                        HierarchyStore::new()
                    })
            },
            None => HierarchyStore::new(),
        };

        let (revisions_tx, revisions_rx) = watch::channel(store.revision());
        let (handle, actor) = StoreActor::spawn(store, Some(revisions_tx));
        let saver = blobs.map(|blobs| {
            DebouncedSaver::spawn(handle.clone(), revisions_rx, blobs, config.save_debounce())
        });

        let coordinator = SyncCoordinator::new(Arc::new(source), handle.clone());
        let checker = Checker::logging(coordinator.clone(), config.check_interval());
        checker.start();
        debug!("runtime: started");

        Self {
            handle,
            actor,
            coordinator,
            checker,
            saver,
        }
    }

    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    pub fn coordinator(&self) -> &SyncCoordinator<S> {
        &self.coordinator
    }

    pub fn checker(&self) -> &Checker<S> {
        &self.checker
    }

    pub fn service(&self) -> HierarchyService<S> {
        HierarchyService::new(self.coordinator.clone())
    }

    /// Stop the checker, flush the saver, then stop the actor and hand back
    /// the final store.
    pub async fn shutdown(self) -> Result<HierarchyStore, ActorError> {
        self.checker.stop();
        if let Some(saver) = self.saver {
            saver.shutdown().await;
        }
        self.handle.shutdown().await?;
        self.actor.await.map_err(|e| {
            warn!("runtime: store actor ended abnormally: {e}");
            ActorError::Closed
        })
    }
}
