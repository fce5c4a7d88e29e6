/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! tabforest keeps an opener-ordered forest of browser tabs consistent with
//! the host's live tab list.
//!
//! The portable kernel (store, reconciler) lives in `forest-core`; this crate
//! wires it into a single-writer actor, a periodic checker, debounced
//! persistence and the query surface consumed by UI/messaging layers.

pub mod config;
pub mod events;
pub mod persistence;
pub mod runtime;
pub mod service;

pub use forest_core;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
