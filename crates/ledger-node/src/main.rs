//! ledgerd — the ledger service binary.
//!
//! Startup sequence:
//!   1. Resolve config: built-in defaults, overridden by an optional config
//!      file (`--config`/`LEDGERD_CONFIG`), overridden by environment
//!      variables, overridden by CLI flags (§9.1)
//!   2. Open the store
//!   3. Start the Expiry Monitor and Notification Worker pool
//!   4. Build the HTTP router and serve it
//!   5. On SIGINT/SIGTERM, flip the shutdown signal and drain both tasks

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::info;

use ledger_api::AppState;
use ledger_auth::{AuthGate, AuthScheme};
use ledger_notify::NotifyConfig;
use ledger_store::Store;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AuthSchemeArg {
    Basic,
    Signature,
    TlsClientCert,
}

impl From<AuthSchemeArg> for AuthScheme {
    fn from(value: AuthSchemeArg) -> Self {
        match value {
            AuthSchemeArg::Basic => AuthScheme::Basic,
            AuthSchemeArg::Signature => AuthScheme::Signature,
            AuthSchemeArg::TlsClientCert => AuthScheme::TlsClientCert,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "ledgerd",
    version,
    about = "Authenticated, transactional ledger service"
)]
struct Args {
    /// Path to a TOML config file layered between built-in defaults and
    /// environment variables (§9.1). Consumed ahead of parsing via
    /// `config_path_from_raw_args`; kept here only so it appears in `--help`.
    #[arg(long, env = "LEDGERD_CONFIG")]
    #[allow(dead_code)]
    config: Option<PathBuf>,

    /// Directory for the persistent sled store.
    #[arg(long, env = "LEDGERD_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// HTTP listen address.
    #[arg(long, env = "LEDGERD_BIND_ADDR", default_value = "127.0.0.1:8080")]
    bind_addr: SocketAddr,

    /// Absolute base URI used to render resource ids (e.g. `http://localhost:8080`).
    #[arg(long, env = "LEDGERD_BASE_URI", default_value = "http://127.0.0.1:8080")]
    base_uri: String,

    /// Authentication scheme enforced on non-public endpoints.
    #[arg(long, env = "LEDGERD_AUTH_SCHEME", value_enum, default_value_t = AuthSchemeArg::Basic)]
    auth_scheme: AuthSchemeArg,

    /// Number of notification worker tasks.
    #[arg(long, env = "LEDGERD_NOTIFY_POOL_SIZE", default_value_t = ledger_core::DEFAULT_NOTIFICATION_POOL_SIZE)]
    notify_pool_size: usize,

    /// Per-attempt HTTP timeout for notification delivery, in seconds.
    #[arg(long, env = "LEDGERD_NOTIFY_TIMEOUT_SECS", default_value_t = ledger_core::DEFAULT_NOTIFICATION_TIMEOUT_SECS)]
    notify_timeout_secs: u64,

    /// Exponential backoff ceiling for notification retries, in seconds.
    #[arg(long, env = "LEDGERD_NOTIFY_BACKOFF_CEILING_SECS", default_value_t = ledger_core::NOTIFICATION_BACKOFF_CEILING_SECS)]
    notify_backoff_ceiling_secs: u64,

    /// Maximum delivery attempts before a notification is abandoned.
    #[arg(long, env = "LEDGERD_NOTIFY_MAX_ATTEMPTS", default_value_t = ledger_core::NOTIFICATION_MAX_ATTEMPTS)]
    notify_max_attempts: u32,
}

/// Optional TOML config file, every field optional so a file only needs to
/// set what it wants to override. Sits between built-in defaults and
/// environment variables in the precedence chain (§9.1).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    bind_addr: Option<String>,
    base_uri: Option<String>,
    auth_scheme: Option<String>,
    notify_pool_size: Option<usize>,
    notify_timeout_secs: Option<u64>,
    notify_backoff_ceiling_secs: Option<u64>,
    notify_max_attempts: Option<u32>,
}

/// Extracts `--config <path>`/`--config=<path>` from the raw process
/// arguments, falling back to `LEDGERD_CONFIG`. Done ahead of
/// [`Args::parse`] so the file's values can be injected as environment
/// variables that `clap`'s own `env = "..."` fallback then picks up — giving
/// defaults < file < env < CLI without a third-party layered-config crate.
fn config_path_from_raw_args() -> Option<PathBuf> {
    let mut raw = std::env::args().skip(1);
    while let Some(arg) = raw.next() {
        if let Some(value) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(value));
        }
        if arg == "--config" {
            return raw.next().map(PathBuf::from);
        }
    }
    std::env::var_os("LEDGERD_CONFIG").map(PathBuf::from)
}

/// Loads `path` and sets each configured field as an environment variable,
/// but only where that variable isn't already set — so a real environment
/// variable still outranks the config file.
fn apply_config_file(path: &Path) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let file: FileConfig = toml::from_str(&contents)
        .with_context(|| format!("parsing config file {}", path.display()))?;

    set_env_if_absent("LEDGERD_DATA_DIR", file.data_dir.map(|p| p.display().to_string()));
    set_env_if_absent("LEDGERD_BIND_ADDR", file.bind_addr);
    set_env_if_absent("LEDGERD_BASE_URI", file.base_uri);
    set_env_if_absent("LEDGERD_AUTH_SCHEME", file.auth_scheme);
    set_env_if_absent("LEDGERD_NOTIFY_POOL_SIZE", file.notify_pool_size.map(|v| v.to_string()));
    set_env_if_absent("LEDGERD_NOTIFY_TIMEOUT_SECS", file.notify_timeout_secs.map(|v| v.to_string()));
    set_env_if_absent(
        "LEDGERD_NOTIFY_BACKOFF_CEILING_SECS",
        file.notify_backoff_ceiling_secs.map(|v| v.to_string()),
    );
    set_env_if_absent("LEDGERD_NOTIFY_MAX_ATTEMPTS", file.notify_max_attempts.map(|v| v.to_string()));
    Ok(())
}

fn set_env_if_absent(name: &str, value: Option<String>) {
    if let Some(value) = value {
        if std::env::var_os(name).is_none() {
            std::env::set_var(name, value);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ledger=debug".parse().unwrap()),
        )
        .init();

    if let Some(config_path) = config_path_from_raw_args() {
        apply_config_file(&config_path)?;
    }

    let args = Args::parse();
    info!("ledgerd starting");

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data dir {}", args.data_dir.display()))?;
    let store = Arc::new(Store::open(&args.data_dir).context("opening store")?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let (expiry_handle, expiry_tx) = ledger_expiry::spawn(Arc::clone(&store), shutdown_rx.clone());

    let notify_config = NotifyConfig {
        pool_size: args.notify_pool_size,
        per_attempt_timeout: Duration::from_secs(args.notify_timeout_secs),
        backoff_ceiling_secs: args.notify_backoff_ceiling_secs,
        max_attempts: args.notify_max_attempts,
    };
    let notify_handles = ledger_notify::spawn(Arc::clone(&store), notify_config, shutdown_rx.clone());

    let auth_gate = Arc::new(AuthGate::new(args.auth_scheme.into()));
    let state = AppState {
        store: Arc::clone(&store),
        expiry_tx,
        auth_gate,
        base_uri: args.base_uri.clone(),
    };
    let app = ledger_api::build(state);

    let listener = tokio::net::TcpListener::bind(args.bind_addr)
        .await
        .with_context(|| format!("binding {}", args.bind_addr))?;
    info!(addr = %args.bind_addr, base_uri = %args.base_uri, "ledgerd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("shutting down background tasks");
    let _ = shutdown_tx.send(true);
    let _ = expiry_handle.await;
    for handle in notify_handles {
        let _ = handle.await;
    }
    store.flush().context("flushing store on shutdown")?;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
