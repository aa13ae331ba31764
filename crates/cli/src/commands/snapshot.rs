//! Snapshot Commands

use anyhow::{bail, Result};
use clap::{Subcommand, ValueEnum};
use fieldcheck_engine::{
    snapshot::IntegrityReport, CreateSnapshotOptions, ImportOptions, RestoreOptions, Snapshot,
    SnapshotFormat,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::context::{read_dataset, Context};
use crate::output::{human_size, print_item, print_list, print_success, TableDisplay};
use crate::store::JsonFileStore;

/// Payload format flag
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PayloadFormat {
    Sql,
    Json,
}

impl From<PayloadFormat> for SnapshotFormat {
    fn from(format: PayloadFormat) -> Self {
        match format {
            PayloadFormat::Sql => SnapshotFormat::Sql,
            PayloadFormat::Json => SnapshotFormat::Json,
        }
    }
}

#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// List all snapshots
    List {
        /// Only snapshots carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Get snapshot details
    Get {
        /// Snapshot ID
        id: String,
    },

    /// Snapshot a dataset file
    Create {
        /// Dataset JSON file
        #[arg(long)]
        dataset: PathBuf,

        /// Snapshot name
        #[arg(short, long)]
        name: String,

        /// Description
        #[arg(short, long)]
        description: Option<String>,

        /// Payload format (defaults to the configured format)
        #[arg(long, value_enum)]
        payload: Option<PayloadFormat>,

        /// Tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Only these tables (repeatable)
        #[arg(long)]
        include: Vec<String>,

        /// Skip these tables (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Restore a snapshot into a dataset file
    Restore {
        /// Snapshot ID
        id: String,

        /// Dataset JSON file to restore into
        #[arg(long)]
        into: PathBuf,

        /// Clear existing tables first
        #[arg(long)]
        drop_existing: bool,

        /// Compare row counts after restoring
        #[arg(long)]
        validate: bool,

        /// Restore timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Delete a snapshot
    Delete {
        /// Snapshot ID
        id: String,
    },

    /// Copy a snapshot payload to a file
    Export {
        /// Snapshot ID
        id: String,

        /// Destination file
        dest: PathBuf,
    },

    /// Register an existing payload file
    Import {
        /// Payload file (.sql or .json)
        file: PathBuf,

        /// Snapshot name
        #[arg(short, long)]
        name: String,

        /// Description
        #[arg(short, long)]
        description: Option<String>,

        /// Payload format (inferred from the extension when omitted)
        #[arg(long, value_enum)]
        payload: Option<PayloadFormat>,

        /// Tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Verify payload checksums
    Verify {
        /// Snapshot ID (all snapshots when omitted)
        id: Option<String>,
    },

    /// Delete all but the newest snapshots
    Prune {
        /// Number of snapshots to keep
        #[arg(long)]
        keep: usize,

        /// Only prune snapshots carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Remove payload files no snapshot references
    Gc,
}

/// Snapshot display wrapper for serialization
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDisplay {
    pub id: String,
    pub name: String,
    pub format: String,
    pub size: u64,
    pub tables: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: String,
}

impl From<Snapshot> for SnapshotDisplay {
    fn from(snap: Snapshot) -> Self {
        Self {
            id: snap.id,
            name: snap.name,
            format: snap.format.to_string(),
            size: snap.size,
            tables: snap.metadata.tables,
            tags: snap.metadata.tags,
            created_at: snap.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl TableDisplay for SnapshotDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Format", "Size", "Tables", "Tags", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.format.clone(),
            human_size(self.size),
            self.tables.join(", "),
            self.tags.join(", "),
            self.created_at.clone(),
        ]
    }
}

impl TableDisplay for IntegrityReport {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Valid"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            if self.valid { "yes" } else { "NO" }.to_string(),
        ]
    }
}

pub async fn execute(cmd: SnapshotCommands, ctx: &Context) -> Result<()> {
    let snapshots = ctx.snapshots().await?;

    match cmd {
        SnapshotCommands::List { tag } => {
            let list = match tag {
                Some(tag) => snapshots.find_by_tag(&tag).await?,
                None => snapshots.list_snapshots().await?,
            };
            let displays: Vec<SnapshotDisplay> = list.into_iter().map(SnapshotDisplay::from).collect();
            print_list(&displays, ctx.format);
        }

        SnapshotCommands::Get { id } => match snapshots.get_snapshot(&id).await? {
            Some(snap) => print_item(&SnapshotDisplay::from(snap), ctx.format),
            None => bail!("Snapshot '{}' not found", id),
        },

        SnapshotCommands::Create {
            dataset,
            name,
            description,
            payload,
            tags,
            include,
            exclude,
        } => {
            let data = read_dataset(&dataset).await?;
            let options = CreateSnapshotOptions {
                name,
                description,
                format: payload.map(SnapshotFormat::from),
                tags,
                include_tables: include,
                exclude_tables: exclude,
            };

            let snap = snapshots.create_snapshot(&data, options).await?;
            let display = SnapshotDisplay::from(snap);
            print_success(&format!(
                "Snapshot '{}' created from {}",
                display.name,
                dataset.display()
            ));
            print_item(&display, ctx.format);
        }

        SnapshotCommands::Restore {
            id,
            into,
            drop_existing,
            validate,
            timeout_secs,
        } => {
            let store = JsonFileStore::new(&into, ctx.current_version());
            let options = RestoreOptions {
                drop_existing,
                validate_after_restore: validate,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            snapshots.restore_snapshot(&id, &store, options).await?;
            print_success(&format!("Snapshot '{}' restored into {}", id, into.display()));
        }

        SnapshotCommands::Delete { id } => {
            snapshots.delete_snapshot(&id).await?;
            print_success(&format!("Snapshot '{}' deleted", id));
        }

        SnapshotCommands::Export { id, dest } => {
            snapshots.export_snapshot(&id, &dest).await?;
            print_success(&format!("Snapshot '{}' exported to {}", id, dest.display()));
        }

        SnapshotCommands::Import {
            file,
            name,
            description,
            payload,
            tags,
        } => {
            let options = ImportOptions {
                name,
                description,
                format: payload.map(SnapshotFormat::from),
                tags,
            };
            let snap = snapshots.import_snapshot(&file, options).await?;
            let display = SnapshotDisplay::from(snap);
            print_success(&format!("Imported {} as '{}'", file.display(), display.name));
            print_item(&display, ctx.format);
        }

        SnapshotCommands::Verify { id } => {
            let reports = match id {
                Some(id) => {
                    let Some(snap) = snapshots.get_snapshot(&id).await? else {
                        bail!("Snapshot '{}' not found", id);
                    };
                    let valid = snapshots.validate_snapshot_integrity(&snap).await;
                    vec![IntegrityReport {
                        id: snap.id,
                        name: snap.name,
                        valid,
                    }]
                }
                None => snapshots.verify_all().await?,
            };
            print_list(&reports, ctx.format);

            let invalid = reports.iter().filter(|r| !r.valid).count();
            if invalid > 0 {
                bail!("{} snapshot(s) failed verification", invalid);
            }
        }

        SnapshotCommands::Prune { keep, tag } => {
            let deleted = snapshots.prune(keep, tag.as_deref()).await?;
            let displays: Vec<SnapshotDisplay> =
                deleted.into_iter().map(SnapshotDisplay::from).collect();
            print_success(&format!("Pruned {} snapshot(s)", displays.len()));
            print_list(&displays, ctx.format);
        }

        SnapshotCommands::Gc => {
            let stats = snapshots.collect_orphans().await?;
            print_success(&format!(
                "Removed {}/{} payload files ({} freed)",
                stats.removed_files,
                stats.scanned_files,
                human_size(stats.removed_bytes)
            ));
        }
    }

    Ok(())
}
