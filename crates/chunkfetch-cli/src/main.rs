//! `chunkfetch` command-line entry point.

mod app;
mod tracker;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use chunkfetch::{Checksum, DownloadTask, ReqwestClient, Settings, TransferOrchestrator};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::tracker::ProgressTracker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let app = App::parse();
    let mut settings = load_settings(&app)?;

    let tracker = (!app.no_progress).then(ProgressTracker::new);
    if let Some(tracker) = &tracker {
        settings = settings.on_progress(tracker.callback());
    }

    let mut task = DownloadTask::new(&app.url, &app.output, app.file_name());
    if let Some(hex) = &app.checksum {
        task = task.checksum(Checksum::from_hex(app.algorithm, hex).context("invalid --checksum")?);
    }

    let orchestrator = TransferOrchestrator::new(ReqwestClient::new()?, settings)?;
    tracing::info!(url = %task.url, destination = %task.destination().display(), "downloading");
    let completion = orchestrator.download(&task).await;

    match completion.into_result() {
        Ok(speed) => {
            if let Some(tracker) = &tracker {
                tracker.finish(Some(format!("done, {}/s", indicatif::HumanBytes(speed as u64))));
            }
            println!("{}", task.destination().display());
            Ok(())
        }
        Err(errors) => {
            if let Some(tracker) = &tracker {
                tracker.finish(Some("failed".to_string()));
            }
            bail!("{errors}")
        }
    }
}

/// Config file first, then command-line overrides.
fn load_settings(app: &App) -> Result<Settings> {
    let mut settings = match &app.config {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Settings::from_toml_str(&source).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => Settings::default(),
    };

    if let Some(parallelism) = app.parallelism {
        settings = settings.parallelism(parallelism);
    }
    if let Some(retries) = app.retries {
        settings = settings.retry_count(retries);
    }
    if let Some(secs) = app.timeout {
        settings = settings.timeout(Duration::from_secs(secs));
    }
    if let Some(auth) = &app.auth {
        settings = settings.authorization(auth);
    }
    if let Some(host) = &app.host {
        settings = settings.host_override(host);
    }
    for (key, value) in &app.headers {
        settings = settings.header(key, value);
    }
    if app.no_progress {
        settings = settings.emit_progress(false);
    }
    Ok(settings)
}
