//! telelog CLI - forward lines of a log file to Telegram
//!
//! Token, app name, debug mode and recipients come from the environment
//! (or an optional YAML config file), never from flags.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use telelog::config::{ENV_APP_NAME, ENV_VARS};
use telelog::{metrics, Config, Logger, Severity, Tail, TailOptions};

const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "telelog")]
#[command(about = "Follow a log file and forward each line to Telegram", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the file to follow
    #[arg(long)]
    file: PathBuf,

    /// Severity used for every forwarded line
    #[arg(long, value_enum, default_value_t = Level::Debug)]
    level: Level,

    /// Optional YAML config file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start at the end of the file instead of the beginning
    #[arg(long, default_value_t = false)]
    from_end: bool,

    /// How often to check the file for new data
    #[arg(long, default_value = "250")]
    poll_interval_ms: u64,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Level {
    Error,
    #[value(alias = "warning")]
    Warn,
    Info,
    Debug,
}

impl From<Level> for Severity {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => Severity::Error,
            Level::Warn => Severity::Warn,
            Level::Info => Severity::Info,
            Level::Debug => Severity::Debug,
        }
    }
}

fn print_env_banner() {
    println!("telelog reads these environment variables:");
    for var in ENV_VARS {
        println!("  {}", var);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    config.apply_env();

    if config.app_name.is_empty() {
        config.app_name = cli.file.display().to_string();
    }
    if cli.level == Level::Debug {
        config.debug = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telelog=info".parse()?))
        .init();

    let cli = Cli::parse();
    print_env_banner();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = load_config(&cli)?;
    if std::env::var(ENV_APP_NAME).map_or(true, |v| v.is_empty()) {
        info!(app = %config.app_name, "{} not set, using file path", ENV_APP_NAME);
    }

    let mut logger = Logger::telegram(&config)
        .await
        .context("Failed to connect to Telegram")?;
    if logger.recipients().is_empty() {
        warn!("No recipients configured, lines will not be delivered");
    }

    let options = TailOptions {
        from_end: cli.from_end,
        poll_interval: Duration::from_millis(cli.poll_interval_ms.max(1)),
        ..TailOptions::default()
    };
    let mut tail = Tail::follow(&cli.file, options)
        .await
        .with_context(|| format!("Failed to open {}", cli.file.display()))?;

    let interrupted = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Cannot listen for ctrl-c");
        }
    };
    let forwarded = forward_lines(&mut tail, &logger, Severity::from(cli.level), interrupted).await;
    info!(forwarded, "Stopped following {}", cli.file.display());

    if let Err(err) = logger.shutdown(SHUTDOWN_FLUSH_TIMEOUT).await {
        warn!(error = %err, "Shutdown did not complete cleanly");
    }
    Ok(())
}

/// Forward followed lines until the follower stops or `shutdown` completes.
/// Returns the number of lines forwarded.
async fn forward_lines(
    tail: &mut Tail,
    logger: &Logger,
    severity: Severity,
    shutdown: impl Future<Output = ()>,
) -> usize {
    tokio::pin!(shutdown);
    let mut forwarded = 0;
    loop {
        tokio::select! {
            line = tail.next_line() => match line {
                Some(line) => {
                    forward(logger, severity, &line);
                    forwarded += 1;
                }
                None => {
                    warn!("Follower stopped");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Interrupted, flushing pending deliveries");
                break;
            }
        }
    }
    forwarded
}

fn forward(logger: &Logger, severity: Severity, line: &str) {
    match severity {
        Severity::Error => logger.error(line),
        Severity::Warn => logger.warn(line),
        Severity::Info => logger.info(line),
        _ => logger.debug(line),
    }
}
