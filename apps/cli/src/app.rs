//! Command implementations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chunkup_transfer::{ResumeStore, default_store_path};
use chunkup_tus::{ListingClient, TusClient};
use chunkup_uploader::{TaskId, UploadEvent, UploadSupervisor};
use tracing::{info, warn};

use crate::args::Command;
use crate::config::Config;

/// Runs a command. Returns `false` if anything failed.
pub async fn run(config: Config, command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Upload { files } => upload(&config, files).await,
        Command::List => list(&config).await.map(|()| true),
    }
}

async fn upload(config: &Config, files: Vec<PathBuf>) -> anyhow::Result<bool> {
    let transport = Arc::new(TusClient::new(&config.endpoint, config.request_timeout())?);
    let mut supervisor = UploadSupervisor::new(transport, config.uploader_config());

    if config.resume {
        match default_store_path().map(ResumeStore::new) {
            Some(Ok(store)) => {
                supervisor = supervisor.with_resume_store(Arc::new(store), &config.endpoint);
            }
            Some(Err(e)) => warn!(error = %e, "resume store unavailable, uploads start fresh"),
            None => warn!("no config directory, uploads start fresh"),
        }
    }

    let mut events = supervisor
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;

    let mut names = HashMap::new();
    let mut failed = 0usize;
    for path in &files {
        match supervisor.enqueue_path(path) {
            Ok(id) => {
                names.insert(id, path.display().to_string());
            }
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                failed += 1;
            }
        }
    }

    let mut remaining = names.len();
    while remaining > 0 {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, cancelling {remaining} upload(s)");
                for id in names.keys() {
                    let _ = supervisor.cancel(*id);
                }
                return Ok(false);
            }
        };

        if let Some(line) = describe(&event, &names) {
            println!("{line}");
        }
        if let UploadEvent::Failed { .. } = event {
            failed += 1;
        }
        if event.is_terminal() {
            remaining -= 1;
        }
    }

    if failed > 0 {
        eprintln!("{failed} of {} upload(s) failed", files.len());
    }
    Ok(failed == 0)
}

async fn list(config: &Config) -> anyhow::Result<()> {
    let client = ListingClient::new(&config.listing_url, config.request_timeout())?;
    let objects = client.list().await?;
    if objects.is_empty() {
        println!("no uploads");
        return Ok(());
    }
    for object in &objects {
        match &object.key {
            Some(key) if key != &object.name => {
                println!("{:>10}  {} ({key})", human_bytes(object.size), object.name)
            }
            _ => println!("{:>10}  {}", human_bytes(object.size), object.name),
        }
    }
    Ok(())
}

fn describe(event: &UploadEvent, names: &HashMap<TaskId, String>) -> Option<String> {
    let name = names.get(&event.task_id())?;
    let line = match event {
        UploadEvent::Created { .. } => format!("{name}: started"),
        UploadEvent::Progress {
            bytes_sent,
            total_size,
            speed_bytes_per_sec,
            ..
        } => {
            let pct = if *total_size == 0 {
                100.0
            } else {
                *bytes_sent as f64 / *total_size as f64 * 100.0
            };
            format!(
                "{name}: {pct:5.1}% {} / {} at {}/s",
                human_bytes(*bytes_sent),
                human_bytes(*total_size),
                human_bytes(*speed_bytes_per_sec as u64)
            )
        }
        UploadEvent::Paused { .. } => format!("{name}: paused"),
        UploadEvent::Resumed { .. } => format!("{name}: resuming"),
        UploadEvent::Completed {
            remote_location, ..
        } => format!("{name}: done -> {remote_location}"),
        UploadEvent::Failed {
            kind,
            bytes_sent,
            message,
            ..
        } => format!(
            "{name}: failed ({kind}) after {}: {message}",
            human_bytes(*bytes_sent)
        ),
    };
    Some(line)
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
