// # listsyncd - List Item Reconciler
//
// This binary is a THIN integration layer:
// - DO NOT add reconciliation, validation or remote API logic here
// - All list item logic lives in listsync-core
// - Configuration is via environment variables ONLY
//
// The binary is responsible for:
// 1. Reading configuration from environment variables
// 2. Loading declared items from a JSON file
// 3. Registering the list API client and state stores
// 4. Running one plan, apply or destroy pass and reporting the result
//
// ## Configuration
//
// ### List API
// - `LISTSYNC_PROVIDER_TYPE`: Provider type (cloudflare)
// - `LISTSYNC_API_TOKEN`: API token
// - `LISTSYNC_BASE_URL`: API base URL override (optional)
//
// ### Items
// - `LISTSYNC_ITEMS_FILE`: Path to a JSON array of declared items
//
// ### State Store
// - `LISTSYNC_STATE_STORE_TYPE`: Type of state store (file, memory)
// - `LISTSYNC_STATE_STORE_PATH`: Path to state file (for file store)
//
// ### Pass
// - `LISTSYNC_MODE`: plan, apply or destroy (default: plan)
// - `LISTSYNC_PRUNE`: Delete tracked items that are no longer declared (default: false)
// - `LISTSYNC_CALL_TIMEOUT_SECS`: Deadline for a single remote call
// - `LISTSYNC_MAX_CONCURRENCY`: Items reconciled at once
// - `LISTSYNC_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export LISTSYNC_API_TOKEN=your_token
// export LISTSYNC_ITEMS_FILE=/etc/listsync/items.json
// export LISTSYNC_STATE_STORE_TYPE=file
// export LISTSYNC_STATE_STORE_PATH=/var/lib/listsync/state.json
// export LISTSYNC_MODE=apply
//
// listsyncd
// ```

use anyhow::{Context, Result};
use listsync_core::{
    ApiRegistry, DesiredItem, EngineConfig, ItemConfig, ListApi, PassReport, PlanReport,
    ProviderConfig, ReconcileEvent, Reconciler, StateStore, StateStoreConfig,
};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Pass completed and every item succeeded
/// - 1: Configuration or startup error
/// - 2: Runtime error, or at least one item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListsyncExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ListsyncExitCode> for ExitCode {
    fn from(code: ListsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// What a run does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Report what would change, mutate nothing
    Plan,
    /// Converge remote lists on the declared items
    Apply,
    /// Delete every tracked item
    Destroy,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "plan" => Ok(Mode::Plan),
            "apply" => Ok(Mode::Apply),
            "destroy" => Ok(Mode::Destroy),
            other => anyhow::bail!(
                "LISTSYNC_MODE '{}' is not valid. Valid modes: plan, apply, destroy",
                other
            ),
        }
    }
}

/// Application configuration
struct Config {
    provider_type: String,
    api_token: String,
    base_url: Option<String>,
    items_file: String,
    state_store_type: String,
    state_store_path: Option<String>,
    mode: Mode,
    prune: bool,
    call_timeout_secs: Option<u64>,
    max_concurrency: Option<usize>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            provider_type: get("LISTSYNC_PROVIDER_TYPE").unwrap_or_else(|| "cloudflare".to_string()),
            api_token: get("LISTSYNC_API_TOKEN").unwrap_or_default(),
            base_url: get("LISTSYNC_BASE_URL").filter(|s| !s.is_empty()),
            items_file: get("LISTSYNC_ITEMS_FILE").unwrap_or_default(),
            state_store_type: get("LISTSYNC_STATE_STORE_TYPE").unwrap_or_else(|| "file".to_string()),
            state_store_path: get("LISTSYNC_STATE_STORE_PATH"),
            mode: get("LISTSYNC_MODE")
                .map(|s| s.parse::<Mode>())
                .transpose()?
                .unwrap_or(Mode::Plan),
            prune: get("LISTSYNC_PRUNE")
                .map(|s| parse_bool("LISTSYNC_PRUNE", &s))
                .transpose()?
                .unwrap_or(false),
            call_timeout_secs: get("LISTSYNC_CALL_TIMEOUT_SECS")
                .map(|s| {
                    s.parse::<u64>()
                        .with_context(|| format!("LISTSYNC_CALL_TIMEOUT_SECS is not a number: {}", s))
                })
                .transpose()?,
            max_concurrency: get("LISTSYNC_MAX_CONCURRENCY")
                .map(|s| {
                    s.parse::<usize>()
                        .with_context(|| format!("LISTSYNC_MAX_CONCURRENCY is not a number: {}", s))
                })
                .transpose()?,
            log_level: get("LISTSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.api_token.is_empty() {
            anyhow::bail!(
                "LISTSYNC_API_TOKEN is required. \
                Set it via: export LISTSYNC_API_TOKEN=your_token"
            );
        }

        // Check for obvious placeholder tokens (common mistake)
        let token_lower = self.api_token.to_lowercase();
        if token_lower.contains("your_token") || token_lower.contains("replace_me") || token_lower == "token" {
            anyhow::bail!(
                "LISTSYNC_API_TOKEN appears to be a placeholder. \
                Use an actual API token with Account Filter Lists Edit permission."
            );
        }

        match self.provider_type.as_str() {
            "cloudflare" => {}
            _ => anyhow::bail!(
                "LISTSYNC_PROVIDER_TYPE '{}' is not supported. \
                Supported providers: cloudflare",
                self.provider_type
            ),
        }

        if let Some(base_url) = &self.base_url
            && !base_url.starts_with("https://")
            && !base_url.starts_with("http://")
        {
            anyhow::bail!("LISTSYNC_BASE_URL must use HTTP or HTTPS scheme. Got: {}", base_url);
        }

        if self.mode != Mode::Destroy && self.items_file.is_empty() {
            anyhow::bail!(
                "LISTSYNC_ITEMS_FILE is required in {:?} mode. \
                Set it via: export LISTSYNC_ITEMS_FILE=/etc/listsync/items.json",
                self.mode
            );
        }

        match self.state_store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "LISTSYNC_STATE_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.state_store_type
            ),
        }

        if self.state_store_type == "file" {
            match self.state_store_path.as_deref() {
                None | Some("") => anyhow::bail!(
                    "LISTSYNC_STATE_STORE_PATH is required when LISTSYNC_STATE_STORE_TYPE=file. \
                    Set it via: export LISTSYNC_STATE_STORE_PATH=/var/lib/listsync/state.json"
                ),
                Some(path) => {
                    if let Some(parent) = Path::new(path).parent()
                        && !parent.as_os_str().is_empty()
                        && !parent.exists()
                    {
                        anyhow::bail!(
                            "LISTSYNC_STATE_STORE_PATH parent directory does not exist: {}. \
                            Create it first: mkdir -p {}",
                            parent.display(),
                            parent.display()
                        );
                    }
                }
            }
        }

        if let Some(timeout) = self.call_timeout_secs
            && !(1..=600).contains(&timeout)
        {
            anyhow::bail!(
                "LISTSYNC_CALL_TIMEOUT_SECS must be between 1 and 600 seconds. Got: {}",
                timeout
            );
        }

        if let Some(concurrency) = self.max_concurrency
            && !(1..=64).contains(&concurrency)
        {
            anyhow::bail!(
                "LISTSYNC_MAX_CONCURRENCY must be between 1 and 64. Got: {}",
                concurrency
            );
        }

        parse_log_level(&self.log_level)?;

        Ok(())
    }

    fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::Cloudflare {
            api_token: self.api_token.clone(),
            base_url: self.base_url.clone(),
        }
    }

    fn state_store_config(&self) -> StateStoreConfig {
        match (self.state_store_type.as_str(), &self.state_store_path) {
            ("file", Some(path)) => StateStoreConfig::File { path: path.clone() },
            _ => StateStoreConfig::Memory,
        }
    }

    fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            call_timeout_secs: self.call_timeout_secs.unwrap_or(defaults.call_timeout_secs),
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency),
            ..defaults
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => anyhow::bail!("{} must be true or false. Got: {}", key, value),
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "LISTSYNC_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

/// Read the declared items file
///
/// Structural problems (unreadable file, invalid JSON, duplicate names) are
/// configuration errors. Per-item payload problems are not: they are reported
/// by [`convert_items`] and fail only that item.
fn load_items(path: &str) -> Result<Vec<ItemConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read LISTSYNC_ITEMS_FILE {}", path))?;
    let items: Vec<ItemConfig> = serde_json::from_str(&content)
        .with_context(|| format!("LISTSYNC_ITEMS_FILE {} is not a JSON array of items", path))?;

    let mut names = HashSet::new();
    for item in &items {
        if item.name.is_empty() {
            anyhow::bail!("Every item in {} needs a non-empty name", path);
        }
        if !names.insert(item.name.as_str()) {
            anyhow::bail!("Item name '{}' is declared more than once in {}", item.name, path);
        }
    }

    Ok(items)
}

/// Validate declared items, splitting them into usable items and failures
fn convert_items(items: &[ItemConfig]) -> (Vec<DesiredItem>, Vec<(String, String)>) {
    let mut desired = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();

    for item in items {
        match DesiredItem::from_config(item) {
            Ok(d) => desired.push(d),
            Err(e) => rejected.push((item.name.clone(), e.to_string())),
        }
    }

    (desired, rejected)
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ListsyncExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return ListsyncExitCode::ConfigError.into();
    }

    let log_level = parse_log_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ListsyncExitCode::ConfigError.into();
    }

    info!("Starting listsyncd in {:?} mode", config.mode);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ListsyncExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run(config)).into()
}

/// Build the components and run one pass
async fn run(config: Config) -> ListsyncExitCode {
    let items = if config.mode == Mode::Destroy {
        Vec::new()
    } else {
        match load_items(&config.items_file) {
            Ok(items) => items,
            Err(e) => {
                error!("{:#}", e);
                return ListsyncExitCode::ConfigError;
            }
        }
    };

    let registry = ApiRegistry::with_builtin_state_stores();

    #[cfg(feature = "cloudflare")]
    {
        debug!("Registering Cloudflare list API");
        listsync_provider_cloudflare::register(&registry);
    }

    let api: Arc<dyn ListApi> = match registry.create_api(&config.provider_config()) {
        Ok(api) => Arc::from(api),
        Err(e) => {
            error!("Failed to create list API client: {}", e);
            return ListsyncExitCode::ConfigError;
        }
    };

    let store: Arc<dyn StateStore> = match registry.create_state_store(&config.state_store_config()).await {
        Ok(store) => Arc::from(store),
        Err(e) => {
            error!("Failed to open state store: {}", e);
            return ListsyncExitCode::ConfigError;
        }
    };

    let (reconciler, events) = match Reconciler::new(api, &config.engine_config()) {
        Ok(pair) => pair,
        Err(e) => {
            error!("Invalid engine configuration: {}", e);
            return ListsyncExitCode::ConfigError;
        }
    };

    let event_logger = tokio::spawn(log_events(ReceiverStream::new(events)));

    let cancel = reconciler.cancel_handle();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => {
                warn!("Received {}, cancelling in-flight work", signal);
                cancel.cancel();
            }
            Err(e) => warn!("Shutdown signal handling unavailable: {}", e),
        }
    });

    let (desired, rejected) = convert_items(&items);
    for (name, reason) in &rejected {
        error!("Item {} is invalid: {}", name, reason);
    }

    let outcome = match config.mode {
        Mode::Plan => reconciler
            .plan_all(&desired, store.as_ref(), config.prune)
            .await
            .map(|report| log_plan(&report)),
        Mode::Apply => reconciler
            .reconcile_all(desired, store, config.prune)
            .await
            .map(|report| log_pass(&report)),
        Mode::Destroy => reconciler.destroy_all(store).await.map(|report| log_pass(&report)),
    };

    // Closing the channel lets the logger drain and stop
    drop(reconciler);
    if let Err(e) = event_logger.await {
        warn!("Event logger stopped abnormally: {}", e);
    }

    match outcome {
        Ok(true) if rejected.is_empty() => ListsyncExitCode::Success,
        Ok(_) => ListsyncExitCode::RuntimeError,
        Err(e) => {
            error!("Pass aborted: {}", e);
            ListsyncExitCode::RuntimeError
        }
    }
}

async fn log_events(mut events: ReceiverStream<ReconcileEvent>) {
    while let Some(event) = events.next().await {
        match event {
            ReconcileEvent::PassStarted { items } => info!("Pass started for {} item(s)", items),
            ReconcileEvent::PhaseChanged { name, phase } => debug!("{}: {:?}", name, phase),
            ReconcileEvent::DriftDetected { name, item_id, drift } => {
                info!("{} ({}) drifted: {}", name, item_id, drift)
            }
            ReconcileEvent::TrackingDropped { name, item_id } => {
                warn!("{}: tracked item {} no longer exists remotely", name, item_id)
            }
            ReconcileEvent::ItemReconciled { name, applied } => info!("{}: {}", name, applied),
            ReconcileEvent::ItemFailed { name, error } => error!("{}: {}", name, error),
            ReconcileEvent::PassFinished { succeeded, failed } => {
                info!("Pass finished: {} succeeded, {} failed", succeeded, failed)
            }
        }
    }
}

/// Returns whether planning succeeded for every item
fn log_plan(report: &PlanReport) -> bool {
    for (name, action) in &report.actions {
        info!("plan {}: {}", name, action);
    }
    for name in &report.removals {
        info!("plan {}: delete (no longer declared)", name);
    }
    for (name, e) in &report.failed {
        error!("plan {}: {}", name, e);
    }
    if !report.has_changes() {
        info!("No changes. Remote lists match the declared items.");
    }
    report.failed.is_empty()
}

/// Returns whether every item succeeded
fn log_pass(report: &PassReport) -> bool {
    info!(
        "{} item(s) changed, {} unchanged, {} failed",
        report.changed(),
        report.applied.len() - report.changed(),
        report.failed.len()
    );
    report.is_success()
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
