/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! `tabforest` command line: inspect a persisted forest or replay a recorded
//! event trace against a host tab list.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use bpaf::Bpaf;
use log::{error, info};
use serde_json::json;
use tabforest::config::ForestConfig;
use tabforest::events::{StaticTabSource, TabEvent};
use tabforest::forest_core::{ForestStats, Tab, WindowId};
use tabforest::persistence::{BlobStore, RedbBlobStore, load_store};
use tabforest::runtime::ForestRuntime;
use tabforest::runtime::sync::SyncReport;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
/// Keep a browser's tab forest in step with the host's tab list
struct Options {
    /// TOML configuration file
    #[bpaf(long, argument("PATH"))]
    config: Option<PathBuf>,
    /// Log filter directives, e.g. `tabforest=debug`
    #[bpaf(long, argument("FILTER"))]
    log_filter: Option<String>,
    #[bpaf(external(command))]
    command: Command,
}

#[derive(Debug, Clone, Bpaf)]
enum Command {
    /// Print the persisted hierarchy and its shape statistics
    #[bpaf(command)]
    Inspect {
        /// Directory holding forest.redb
        #[bpaf(long, argument("DIR"))]
        store: PathBuf,
        /// Only show this window
        #[bpaf(long, argument("ID"))]
        window: Option<u64>,
    },
    /// Apply a JSON event trace, then force a sync against a JSON tab list
    #[bpaf(command)]
    Replay {
        #[bpaf(long, argument("FILE"))]
        events: PathBuf,
        #[bpaf(long, argument("FILE"))]
        tabs: PathBuf,
        /// Persist the result to this directory
        #[bpaf(long, argument("DIR"))]
        store: Option<PathBuf>,
    },
}

fn init_tracing(filter: Option<&str>) {
    let filter = filter
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    // Also installs the `log` bridge, so library records reach the subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("Failed to parse {}: {e}", path.display()).into())
}

fn inspect(store_dir: &Path, window: Option<WindowId>) -> CliResult<serde_json::Value> {
    let blobs = RedbBlobStore::open(store_dir)?;
    let store = load_store(&blobs);
    Ok(json!({
        "hierarchy": store.get_forest(window),
        "stats": ForestStats::collect(store.forest()),
        "violations": store.forest().invariant_violations(),
    }))
}

async fn replay(
    config: &ForestConfig,
    events: &Path,
    tabs: &Path,
    store_dir: Option<&Path>,
) -> CliResult<serde_json::Value> {
    let events: Vec<TabEvent> = read_json(events)?;
    let tabs: Vec<Tab> = read_json(tabs)?;
    let blobs = match store_dir {
        Some(dir) => Some(Arc::new(RedbBlobStore::open(dir)?) as Arc<dyn BlobStore>),
        None => None,
    };

    let runtime = ForestRuntime::start(config, StaticTabSource::new(tabs), blobs).await;
    let mut changed = 0_usize;
    for event in &events {
        if runtime.handle().apply_event(event.clone()).await? {
            changed += 1;
        }
    }
    info!("replay: {changed} of {} event(s) changed the forest", events.len());

    let service = runtime.service();
    let outcome = match service.repair_hierarchy().await? {
        SyncReport::Completed(outcome) => json!(outcome),
        SyncReport::Coalesced => json!(null),
    };
    let output = json!({
        "events": events.len(),
        "changed": changed,
        "sync": outcome,
        "diagnostics": service.get_diagnostics().await?,
        "hierarchy": service.get_hierarchy(None).await?,
    });
    runtime.shutdown().await?;
    Ok(output)
}

async fn run(options: Options, config: ForestConfig) -> CliResult<serde_json::Value> {
    match options.command {
        Command::Inspect { store, window } => inspect(&store, window.map(WindowId)),
        Command::Replay {
            events,
            tabs,
            store,
        } => {
            let store_dir = store.or_else(|| config.store_dir.clone());
            replay(&config, &events, &tabs, store_dir.as_deref()).await
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let options = options().run();
    let config = match &options.config {
        Some(path) => match ForestConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("tabforest: {e}");
                return ExitCode::FAILURE;
            },
        },
        None => ForestConfig::default(),
    };
    init_tracing(options.log_filter.as_deref().or(config.log_filter.as_deref()));

    match run(options, config).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            },
            Err(e) => {
                error!("Failed to render output: {e}");
                ExitCode::FAILURE
            },
        },
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        },
    }
}
