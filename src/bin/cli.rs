// Dwn Core - Media download orchestration for mobile
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dwn_core::download::models::{CompleteCallback, ProgressCallback};
use dwn_core::{DownloadConfig, DownloadManager, MediaType, NetworkMonitor, QueueStatus, SettingsManager};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "dwn-cli")]
#[command(about = "Dwn CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// Data root holding the database, settings, scratch and media folders
    #[arg(short, long, default_value = "./dwn-data")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one URL directly, bypassing the queue
    Download {
        url: String,
        /// AUDIO or VIDEO
        #[arg(short, long, default_value = "AUDIO")]
        media_type: String,
    },
    /// Queue several URLs and wait until the queue settles
    Queue {
        urls: Vec<String>,
        #[arg(short, long, default_value = "AUDIO")]
        media_type: String,
    },
    /// Restart a paused or failed download
    Resume { id: String },
    /// List download records
    List {
        /// Filter by title or URL
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Mark a download as cancelled and drop its scratch data
    Cancel { id: String },
    /// Delete a download record
    Delete { id: String },
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        let config = DownloadConfig::rooted_at(&cli.root);
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    std::fs::create_dir_all(&cli.root)
        .with_context(|| format!("cannot create data root {}", cli.root.display()))?;
    let config = DownloadConfig::rooted_at(&cli.root);
    let network = Arc::new(NetworkMonitor::default());
    let settings = Arc::new(SettingsManager::load(&config.settings_path, network));
    let manager = DownloadManager::open(config, settings).await?;

    match cli.command {
        Commands::Download { url, media_type } => {
            let media_type = MediaType::from_str(&media_type)?;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let on_progress: ProgressCallback = Arc::new(|fraction, message| {
                println!("{:>3}% {}", (fraction * 100.0) as u32, message);
            });
            let on_complete: CompleteCallback = Arc::new(move |outcome| {
                let _ = tx.send(outcome);
            });

            match manager.start_download(&url, media_type, on_progress, on_complete).await? {
                Some(id) => println!("Started {}", id),
                None => println!("Not started"),
            }
            let outcome = rx.recv().await.context("download ended without an outcome")?;
            println!("{:?}: {}", outcome.kind, outcome.message);
            if !outcome.success() {
                manager.shutdown().await;
                bail!("download did not complete");
            }
        }
        Commands::Queue { urls, media_type } => {
            let media_type = MediaType::from_str(&media_type)?;
            let mut updates = manager.subscribe_queue();
            for url in &urls {
                let id = manager.add_to_queue(url, media_type)?;
                println!("Queued {} as {}", url, id);
            }

            loop {
                let entries = updates.borrow_and_update().clone();
                for entry in &entries {
                    println!(
                        "  [{}] {:>3}% {} - {}",
                        entry.status.as_str(),
                        (entry.progress * 100.0) as u32,
                        entry.title,
                        entry.status_message
                    );
                }
                let settled = entries.iter().all(|e| {
                    matches!(
                        e.status,
                        QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled | QueueStatus::Paused
                    )
                });
                if settled || updates.changed().await.is_err() {
                    break;
                }
            }
        }
        Commands::Resume { id } => {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let on_complete: CompleteCallback = Arc::new(move |outcome| {
                let _ = tx.send(outcome);
            });
            let on_progress: ProgressCallback = Arc::new(|fraction, message| {
                println!("{:>3}% {}", (fraction * 100.0) as u32, message);
            });
            manager.resume_download(&id, on_progress, on_complete).await?;
            if let Some(outcome) = rx.recv().await {
                println!("{:?}: {}", outcome.kind, outcome.message);
            }
        }
        Commands::List { query } => {
            let records = match query {
                Some(q) => manager.search_downloads(&q).await?,
                None => manager.list_downloads().await?,
            };
            if records.is_empty() {
                println!("No downloads");
            }
            for record in records {
                println!(
                    "{}  {:<11} {:<5} {:>3}%  {}",
                    record.id,
                    record.status.as_str(),
                    record.media_type.as_str(),
                    (record.progress * 100.0) as u32,
                    record.display_title()
                );
            }
        }
        Commands::Cancel { id } => {
            manager.cancel_download(&id).await?;
            println!("Cancelled {}", id);
        }
        Commands::Delete { id } => {
            if manager.delete_download(&id).await? {
                println!("Deleted {}", id);
            } else {
                println!("No download with id {}", id);
            }
        }
        Commands::Config => unreachable!(),
    }

    manager.shutdown().await;
    Ok(())
}
