//! Standalone board server.
//!
//! Environment:
//! - `GRIDSYNC_BIND`: listen address (default `0.0.0.0:8080`)
//! - `GRIDSYNC_BOARD_SIZE`: cells per side, a multiple of 8 (default 512)
//! - `GRIDSYNC_ACTION_LOG`: append applied mutations to this file
//! - `RUST_LOG`: tracing filter (default `info,gridsync=debug`)

use std::path::PathBuf;

use gridsync::prelude::*;

#[derive(Debug, PartialEq)]
struct Settings {
    bind: String,
    board_size: u16,
    action_log: Option<PathBuf>,
}

fn settings(var: impl Fn(&str) -> Option<String>) -> Result<Settings, String> {
    let board_size = match var("GRIDSYNC_BOARD_SIZE") {
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|e| format!("GRIDSYNC_BOARD_SIZE={raw}: {e}"))?,
        None => BoardConfig::default().size,
    };
    if board_size == 0 || board_size % 8 != 0 {
        return Err(format!(
            "GRIDSYNC_BOARD_SIZE must be a positive multiple of 8, got {board_size}"
        ));
    }
    Ok(Settings {
        bind: var("GRIDSYNC_BIND").unwrap_or_else(|| "0.0.0.0:8080".into()),
        board_size,
        action_log: var("GRIDSYNC_ACTION_LOG").map(PathBuf::from),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,gridsync=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = settings(|key| std::env::var(key).ok())?;
    tracing::info!(?settings, "starting board server");

    let mut builder = GridServer::builder()
        .bind(&settings.bind)
        .board_config(BoardConfig {
            size: settings.board_size,
            ..BoardConfig::default()
        });
    if let Some(path) = settings.action_log {
        builder = builder.action_log(path);
    }
    let server = builder.build().await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("ctrl-c received");
        })
        .await?;
    Ok(())
}
