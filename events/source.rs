/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The host's authoritative tab list.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use forest_core::{Tab, TabId, WindowId};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The host could not be reached or refused the call.
    Unavailable(String),
    UnknownTab(TabId),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unavailable(reason) => write!(f, "tab source unavailable: {reason}"),
            SourceError::UnknownTab(id) => write!(f, "tab source does not know {id}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Read and move access to the host's tabs.
///
/// The reconciler only ever reads; `move_tab` exists for presentation-driven
/// moves, whose outcome comes back as a `Moved` event.
pub trait TabSource: Send + Sync + 'static {
    fn query_all_tabs(&self) -> impl Future<Output = Result<Vec<Tab>, SourceError>> + Send;

    fn move_tab(
        &self,
        id: TabId,
        index: u32,
        window: Option<WindowId>,
    ) -> impl Future<Output = Result<(), SourceError>> + Send;
}

#[derive(Debug, Default)]
struct SourceState {
    tabs: Vec<Tab>,
    fail_next: Option<String>,
    queries: usize,
}

/// An in-memory host: a settable tab list behind a shared handle.
#[derive(Debug, Clone, Default)]
pub struct StaticTabSource {
    state: Arc<Mutex<SourceState>>,
}

impl StaticTabSource {
    pub fn new(tabs: Vec<Tab>) -> Self {
        let source = Self::default();
        source.set_tabs(tabs);
        source
    }

    pub fn set_tabs(&self, tabs: Vec<Tab>) {
        self.state.lock().tabs = tabs;
    }

    pub fn tabs(&self) -> Vec<Tab> {
        self.state.lock().tabs.clone()
    }

    /// Make the next query fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.state.lock().fail_next = Some(reason.into());
    }

    /// Number of `query_all_tabs` calls so far, failed ones included.
    pub fn query_count(&self) -> usize {
        self.state.lock().queries
    }

    fn move_now(&self, id: TabId, index: u32, window: Option<WindowId>) -> Result<(), SourceError> {
        let mut state = self.state.lock();
        let position = state
            .tabs
            .iter()
            .position(|tab| tab.id == id)
            .ok_or(SourceError::UnknownTab(id))?;
        let mut tab = state.tabs.remove(position);
        let from_window = tab.window_id;
        let to_window = window.unwrap_or(from_window);
        tab.window_id = to_window;

        let mut target: Vec<Tab> = state
            .tabs
            .iter()
            .filter(|other| other.window_id == to_window)
            .cloned()
            .collect();
        target.sort_by_key(|other| other.index);
        let slot = usize::try_from(index).unwrap_or(usize::MAX).min(target.len());
        target.insert(slot, tab);
        for (position, tab) in target.iter_mut().enumerate() {
            tab.index = u32::try_from(position).unwrap_or(u32::MAX);
        }

        state.tabs.retain(|other| other.window_id != to_window);
        state.tabs.extend(target);
        if from_window != to_window {
            reindex(&mut state.tabs, from_window);
        }
        Ok(())
    }
}

/// Close the gap a departing tab left behind.
fn reindex(tabs: &mut [Tab], window: WindowId) {
    let mut in_window: Vec<&mut Tab> = tabs.iter_mut().filter(|tab| tab.window_id == window).collect();
    in_window.sort_by_key(|tab| tab.index);
    for (index, tab) in in_window.into_iter().enumerate() {
        tab.index = u32::try_from(index).unwrap_or(u32::MAX);
    }
}

impl TabSource for StaticTabSource {
    fn query_all_tabs(&self) -> impl Future<Output = Result<Vec<Tab>, SourceError>> + Send {
        let result = {
            let mut state = self.state.lock();
            state.queries += 1;
            match state.fail_next.take() {
                Some(reason) => Err(SourceError::Unavailable(reason)),
                None => Ok(state.tabs.clone()),
            }
        };
        std::future::ready(result)
    }

    fn move_tab(
        &self,
        id: TabId,
        index: u32,
        window: Option<WindowId>,
    ) -> impl Future<Output = Result<(), SourceError>> + Send {
        std::future::ready(self.move_now(id, index, window))
    }
}
