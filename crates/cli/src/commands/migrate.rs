//! Migrate Command

use anyhow::{bail, Result};
use clap::Args;
use fieldcheck_engine::{ExecuteOptions, MigrationResult};
use std::path::PathBuf;
use std::time::Duration;

use crate::commands::plan::print_plan;
use crate::context::{read_dataset, write_dataset, Context};
use crate::output::{print_error, print_json, print_success, print_warning, OutputFormat};

#[derive(Args)]
pub struct MigrateArgs {
    /// Dataset JSON file
    #[arg(long)]
    pub dataset: PathBuf,

    /// Target version (defaults to the current version)
    #[arg(long)]
    pub to: Option<String>,

    /// Validate the plan without running migrations
    #[arg(long)]
    pub dry_run: bool,

    /// Back up the dataset even when the plan does not require it
    #[arg(long)]
    pub backup: bool,

    /// Write the migrated dataset back to the file
    #[arg(long)]
    pub write: bool,

    /// Write the migrated dataset here instead of in place
    #[arg(long, conflicts_with = "write")]
    pub output: Option<PathBuf>,

    /// Overall time limit in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

fn print_result(result: &MigrationResult, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(result);
        return;
    }

    for warning in &result.warnings {
        print_warning(warning);
    }
    for error in &result.errors {
        print_error(error);
    }
    if let Some(path) = &result.backup_path {
        println!("Backup: {}", path.display());
    }
    if result.success {
        print_success(&format!(
            "Migrated {} -> {} ({} migration(s), {:?})",
            result.from_version,
            result.to_version,
            result.applied_migrations.len(),
            result.duration
        ));
    }
}

pub async fn execute(args: MigrateArgs, ctx: &Context) -> Result<()> {
    let mut dataset = read_dataset(&args.dataset).await?;
    let target = args.to.unwrap_or_else(|| ctx.current_version());

    let plan = ctx
        .planner()
        .try_create_migration_plan(dataset.version(), &target)?;
    if ctx.format != OutputFormat::Json {
        print_plan(&plan.summary(), ctx.format);
    }

    let options = ExecuteOptions {
        dry_run: args.dry_run,
        create_backup: args.backup,
        timeout: args.timeout_secs.map(Duration::from_secs),
    };
    let result = ctx
        .executor()
        .await?
        .execute_migration(&mut dataset, &plan, options)
        .await?;
    print_result(&result, ctx.format);

    if !result.success {
        bail!(
            "Migration {} -> {} failed",
            result.from_version,
            result.to_version
        );
    }

    if !args.dry_run {
        let destination = match (args.output, args.write) {
            (Some(output), _) => Some(output),
            (None, true) => Some(args.dataset.clone()),
            (None, false) => None,
        };
        if let Some(destination) = destination {
            write_dataset(&destination, &dataset).await?;
            if ctx.format != OutputFormat::Json {
                println!("Wrote {}", destination.display());
            }
        }
    }

    Ok(())
}
