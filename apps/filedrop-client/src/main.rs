//! filedrop client entry point.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use filedrop_data_channel::{CHUNK_SIZE, TransferError, Uploader, UploaderConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Uploads a single file to a filedrop server.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Server host name or address
    host: String,

    /// Server port
    port: u16,

    /// File to upload
    file: PathBuf,

    /// Bytes per file read / socket write
    #[arg(long, default_value_t = CHUNK_SIZE)]
    chunk_size: usize,

    /// Seconds to wait for the connection
    #[arg(long, default_value_t = 30)]
    connect_timeout_secs: u64,
}

impl Cli {
    fn target(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            // Bare IPv6 literal.
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn uploader_config(&self) -> UploaderConfig {
        UploaderConfig {
            chunk_size: self.chunk_size.max(1),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
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

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    match upload(&cli, cancel).await {
        Ok(_) => Ok(()),
        Err(e) if is_connect_failure(&e) => {
            eprintln!("Couldn't connect to host. Please run server or check network connection.");
            tracing::error!("{e}");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

/// Opens, connects and sends; the status line is printed once sending began.
async fn upload(cli: &Cli, cancel: CancellationToken) -> Result<u64, TransferError> {
    let uploader = Uploader::open(&cli.target(), &cli.file, cli.uploader_config()).await?;
    let connected = uploader.connect(&cancel).await?;
    let status = connected.status();

    eprintln!("Send...");
    let result = connected.send(&cancel).await;
    eprintln!("{status}");
    result
}

fn is_connect_failure(e: &TransferError) -> bool {
    matches!(e, TransferError::Connect { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn parses_positional_arguments() {
        let cli = Cli::try_parse_from(["filedrop-client", "localhost", "9000", "a.bin"]).unwrap();
        assert_eq!(cli.target(), "localhost:9000");
        assert_eq!(cli.file, PathBuf::from("a.bin"));
        assert_eq!(cli.chunk_size, CHUNK_SIZE);
        assert_eq!(
            cli.uploader_config().connect_timeout,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn wraps_ipv6_hosts() {
        let cli = Cli::try_parse_from(["filedrop-client", "::1", "9000", "a.bin"]).unwrap();
        assert_eq!(cli.target(), "[::1]:9000");
    }

    #[tokio::test]
    async fn unresolvable_host_is_a_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"abc").unwrap();

        let cli = Cli::try_parse_from([
            OsStr::new("filedrop-client"),
            OsStr::new("host.invalid"),
            OsStr::new("9000"),
            file.as_os_str(),
        ])
        .unwrap();
        let err = upload(&cli, CancellationToken::new()).await.unwrap_err();
        assert!(is_connect_failure(&err), "got {err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"abc").unwrap();

        let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = reserved.local_addr().unwrap().port().to_string();
        drop(reserved);

        let cli = Cli::try_parse_from([
            OsStr::new("filedrop-client"),
            OsStr::new("127.0.0.1"),
            OsStr::new(&port),
            file.as_os_str(),
        ])
        .unwrap();
        let err = upload(&cli, CancellationToken::new()).await.unwrap_err();
        assert!(is_connect_failure(&err), "got {err:?}");
    }

    #[test]
    fn rejects_missing_file_argument() {
        assert!(Cli::try_parse_from(["filedrop-client", "localhost", "9000"]).is_err());
    }
}
