use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

use dapmux_config::DapmuxConfig;
use dapmux_session::SessionManager;

mod server;

use server::ToolServer;

fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("DAPMUX_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dapmux")
}

async fn run() -> Result<()> {
    let config_dir = config_dir();

    // Direct tracing output to a log file; stdout carries the protocol.
    std::fs::create_dir_all(&config_dir).ok();
    let log_file = std::fs::File::create(config_dir.join("dapmux.log"))
        .context("failed to open log file")?;
    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let config = dapmux_config::load_config(&config_dir).unwrap_or_else(|e| {
        error!("config load failed, using defaults: {e}");
        DapmuxConfig::default()
    });

    let manager = SessionManager::new(config);
    let server = ToolServer::new(manager);

    info!("dapmux ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = server.handle_line(&line).await;
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    info!("stdin closed, shutting down");
    server.manager().shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("dapmux: {e:#}");
        std::process::exit(1);
    }
}
