//! Redis Embedded CLI - run a disposable redis-server until interrupted.
//!
//! Starts one embedded redis-server, prints a single line describing it on
//! stdout for the parent process to read, then waits for Ctrl-C or SIGTERM and
//! stops the server. Logs go to stderr.

mod info;

use anyhow::{Context, Result};
use clap::Parser;
use info::ServerInfo;
use redis_embedded::{DirectorySource, RedisServer, LATEST_REDIS_VERSION};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "redis-embedded")]
#[command(about = "Run a disposable embedded redis-server")]
struct Args {
    /// Port to listen on (omit for a free port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Redis version to extract
    #[arg(long = "redis-version", default_value = LATEST_REDIS_VERSION)]
    redis_version: String,

    /// Password clients must authenticate with
    #[arg(long)]
    password: Option<String>,

    /// Resource root holding redis/<version>/<platform>/<executable>
    /// (defaults to $REDIS_EMBEDDED_RESOURCES or the bundled resources)
    #[arg(long)]
    resources: Option<PathBuf>,

    /// Seconds to wait for the ready line (0 = wait forever)
    #[arg(long, default_value = "30")]
    startup_timeout: u64,

    /// Print a JSON object instead of REDIS_PORT=<port>
    #[arg(long)]
    json: bool,

    /// Enable debug logging (includes the server's own output)
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; stdout is reserved for the announcement line
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut builder = RedisServer::builder().version(&args.redis_version);
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(password) = &args.password {
        builder = builder.password(password);
    }
    builder = match args.startup_timeout {
        0 => builder.wait_for_ready_indefinitely(),
        secs => builder.startup_timeout(Duration::from_secs(secs)),
    };
    let source = match args.resources {
        Some(root) => DirectorySource::new(root),
        None => DirectorySource::from_env(),
    };
    info!("Resource root: {}", source.root().display());
    builder = builder.artifact_source(source);

    let server = builder.build().context("failed to prepare redis-server")?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("failed to install signal handler")?;

    server.start().context("failed to start redis-server")?;

    // Intentional stdout for the parent process
    println!("{}", ServerInfo::from_server(&server).announcement(args.json)?);

    info!("redis-server running on {}", server.addr());

    let _ = shutdown_rx.recv();
    info!("Shutdown signal received, stopping redis-server");

    server.stop().context("failed to stop redis-server")?;
    Ok(())
}
