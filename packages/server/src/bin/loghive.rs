//! Loghive server binary.
//!
//! Assembles a [`ServerConfig`] from CLI flags and environment variables,
//! then runs the app until SIGINT/SIGTERM. Exits 0 on a clean drain and
//! non-zero on a fatal startup error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use loghive_core::SystemClock;
use loghive_server::{App, ServerConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "loghive", about = "Centralized log ingestion and retrieval service")]
struct Cli {
    /// Bind host for both listeners.
    #[arg(long, env = "LOGHIVE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Ingest HTTP port.
    #[arg(long, env = "LOGHIVE_HTTP_PORT", default_value_t = 8080)]
    http_port: u16,

    /// MCP TCP port.
    #[arg(long, env = "LOGHIVE_MCP_PORT", default_value_t = 9090)]
    mcp_port: u16,

    /// SQLite database path.
    #[arg(long, env = "LOGHIVE_DB_PATH", default_value = "loghive.db")]
    db_path: PathBuf,

    /// Search index directory; omit to disable full-text search.
    #[arg(long, env = "LOGHIVE_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Recovery directory for pending-record spill files.
    #[arg(long, env = "LOGHIVE_RECOVERY_DIR", default_value = "recovery")]
    recovery_dir: PathBuf,

    /// Buffer capacity in records.
    #[arg(long, env = "LOGHIVE_BUFFER_SIZE", default_value_t = 10_000)]
    buffer_size: usize,

    /// Flush batch size.
    #[arg(long, env = "LOGHIVE_MAX_BATCH_SIZE", default_value_t = 100)]
    max_batch_size: usize,

    /// Flush interval in seconds.
    #[arg(long, env = "LOGHIVE_FLUSH_INTERVAL_SECS", default_value_t = 5)]
    flush_interval_secs: u64,

    /// Default retention in days; 0 retains indefinitely.
    #[arg(long, env = "LOGHIVE_RETENTION_DAYS", default_value_t = 30)]
    retention_days: u32,

    /// API keys in `key:perm[+perm...][:rpm]` form; auth is enabled when at
    /// least one key is given. Example: `secret:write+read:120`.
    #[arg(long = "api-key", env = "LOGHIVE_API_KEYS", value_delimiter = ',')]
    api_keys: Vec<String>,

    /// Metadata keys scrubbed at ingest.
    #[arg(long = "protect-key", env = "LOGHIVE_PROTECTED_KEYS", value_delimiter = ',')]
    protected_keys: Vec<String>,

    /// Route buffer flush writes through the circuit breaker.
    #[arg(long, env = "LOGHIVE_GUARD_WRITES")]
    guard_writes: bool,

    /// Emit logs as JSON.
    #[arg(long, env = "LOGHIVE_LOG_JSON")]
    log_json: bool,
}

fn parse_api_key(spec: &str) -> Result<loghive_server::network::ApiKeyConfig, String> {
    use loghive_server::network::{ApiKeyConfig, Permission};

    let mut parts = spec.splitn(3, ':');
    let key = parts
        .next()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| format!("empty key in {spec:?}"))?;
    let perms = parts.next().unwrap_or("write");
    let rpm = parts
        .next()
        .map(str::parse::<u32>)
        .transpose()
        .map_err(|e| format!("bad rpm in {spec:?}: {e}"))?;

    let permissions = perms
        .split('+')
        .map(|p| match p {
            "write" => Ok(Permission::Write),
            "read" => Ok(Permission::Read),
            "admin" => Ok(Permission::Admin),
            other => Err(format!("unknown permission {other:?} in {spec:?}")),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ApiKeyConfig {
        key: key.to_string(),
        permissions,
        requests_per_minute: rpm,
    })
}

fn build_config(cli: &Cli) -> Result<ServerConfig, String> {
    let mut config = ServerConfig::default();

    config.http.host.clone_from(&cli.host);
    config.http.port = cli.http_port;
    config.mcp.host.clone_from(&cli.host);
    config.mcp.port = cli.mcp_port;
    config.storage.path.clone_from(&cli.db_path);
    config.index_dir.clone_from(&cli.index_dir);
    config.recovery.dir.clone_from(&cli.recovery_dir);
    config.buffer.capacity = cli.buffer_size;
    config.buffer.max_batch_size = cli.max_batch_size;
    config.buffer.flush_interval = Duration::from_secs(cli.flush_interval_secs);
    config.retention.default_days = cli.retention_days;
    config.protected_metadata_keys.clone_from(&cli.protected_keys);
    config.guard_writes_with_breaker = cli.guard_writes;

    if !cli.api_keys.is_empty() {
        config.http.auth.enabled = true;
        config.http.auth.keys = cli
            .api_keys
            .iter()
            .map(|spec| parse_api_key(spec))
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let app = match App::build(config, Arc::new(SystemClock)).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match app.run(shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}
