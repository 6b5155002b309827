use std::path::PathBuf;
use std::sync::Arc;

use prekey_server::{InMemoryStorage, PrekeyServer, ServerConfig};
use rand::rngs::OsRng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the server.
struct Args {
    config_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;

    while let Some(arg) = args.next() {
        if arg.as_str() == "--config" {
            config_path = args.next().map(PathBuf::from);
        }
    }

    Args { config_path }
}

/// Periodically expire idle sessions and fragment contexts.
async fn sweep_loop(
    server: Arc<PrekeyServer>,
    interval: std::time::Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => server.cleanup_after(),
            _ = shutdown_rx.recv() => {
                tracing::info!("sweep loop shutting down");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    let Some(config_path) = args.config_path else {
        tracing::error!("usage: prekey-server --config <path>");
        std::process::exit(2);
    };

    let config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, path = %config_path.display(), "failed to load config");
            std::process::exit(1);
        }
    };
    let storage = Arc::new(InMemoryStorage::new());
    let server = match PrekeyServer::new(&config, storage, Box::new(OsRng)) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(sweep_loop(Arc::clone(&server), config.sweep_interval(), shutdown_rx));

    tracing::info!(
        identity = %config.identity,
        "prekey-server ready, reading <identity> <message> lines"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "failed to read stdin");
                break;
            }
        };
        let Some((from, raw)) = line.trim_end().split_once(' ') else {
            tracing::warn!("ignoring line without an identity");
            continue;
        };

        match server.handle(from, raw) {
            Ok(replies) => {
                for reply in replies {
                    let out = format!("{from} {reply}\n");
                    if let Err(e) = stdout.write_all(out.as_bytes()).await {
                        tracing::error!(error = %e, "failed to write reply");
                    }
                }
                if let Err(e) = stdout.flush().await {
                    tracing::error!(error = %e, "failed to flush stdout");
                }
            }
            Err(e) => tracing::warn!(identity = %from, error = %e, "message not handled"),
        }
    }

    tracing::info!("prekey-server shutting down");
    let _ = shutdown_tx.send(()).await;
}
