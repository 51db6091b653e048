//! filedrop server entry point.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use filedrop_data_channel::{Listener, SessionEvent, WorkDir};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Receives single-file uploads into a working directory.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// TCP port to listen on
    port: u16,

    /// Directory received files are written into
    work_dir: PathBuf,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting filedrop server"
    );

    let config = Config::load(cli.config.as_deref())?;

    std::fs::create_dir_all(&cli.work_dir).with_context(|| {
        format!("couldn't create working directory {}", cli.work_dir.display())
    })?;

    // Single-threaded event loop; sessions interleave on one thread.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(cli, config))?;

    tracing::info!("server stopped");
    Ok(())
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let addr = SocketAddr::new(config.bind_address, cli.port);
    let storage = WorkDir::new(&cli.work_dir);
    let work_dir = storage.base_path().display().to_string();
    let listener = Listener::bind(addr, storage, config.session_config())
        .await
        .with_context(|| format!("couldn't listen on {addr}"))?;
    eprintln!("Server started");
    tracing::info!(%work_dir, "serving uploads");

    let cancel = CancellationToken::new();
    let (events_tx, mut events_rx) = mpsc::channel(64);

    let server = tokio::spawn(listener.listen(cancel.clone(), events_tx));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested");
                cancel.cancel();
                break;
            }
            Some(event) = events_rx.recv() => match event {
                SessionEvent::Completed { file_name, .. } => {
                    eprintln!("Received file: {file_name}");
                }
                SessionEvent::Failed { peer, error } => {
                    tracing::debug!(%peer, "upload failed: {error}");
                }
            },
        }
    }

    server.await??;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM / SIGHUP on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (Ok(mut term), Ok(mut hup)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) else {
            let _ = tokio::signal::ctrl_c().await;
            return;
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
            _ = hup.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_and_work_dir() {
        let cli = Cli::try_parse_from(["filedrop-server", "9000", "/tmp/work"]).unwrap();
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.work_dir, PathBuf::from("/tmp/work"));
        assert!(cli.config.is_none());
    }

    #[test]
    fn rejects_wrong_argument_count() {
        assert!(Cli::try_parse_from(["filedrop-server", "9000"]).is_err());
        assert!(Cli::try_parse_from(["filedrop-server", "9000", "/tmp/a", "/tmp/b"]).is_err());
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(Cli::try_parse_from(["filedrop-server", "http", "/tmp/work"]).is_err());
    }
}
