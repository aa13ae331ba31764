//! Version Commands

use anyhow::Result;
use clap::Subcommand;
use fieldcheck_engine::version::VersionSummary;

use crate::context::Context;
use crate::output::{print_json, print_list, print_warning, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum VersionCommands {
    /// List known dataset versions
    List,

    /// Check whether data at one version satisfies another
    Check {
        /// Version the data is at
        current: String,

        /// Version the consumer requires
        required: String,
    },
}

impl TableDisplay for VersionSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Version", "Released", "Breaking", "Migrations", "Description"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.version.clone(),
            self.release_date.to_string(),
            if self.breaking { "yes" } else { "" }.to_string(),
            self.migrations.join(", "),
            self.description.clone(),
        ]
    }
}

pub async fn execute(cmd: VersionCommands, ctx: &Context) -> Result<()> {
    match cmd {
        VersionCommands::List => {
            let versions: Vec<VersionSummary> = ctx
                .versions
                .available_versions()
                .iter()
                .map(|v| v.summary())
                .collect();
            print_list(&versions, ctx.format);
            if ctx.format != OutputFormat::Json {
                if let Some(current) = ctx.versions.current_version() {
                    println!("Current: {}", current);
                }
            }
        }

        VersionCommands::Check { current, required } => {
            let report = ctx.versions.check_compatibility(&current, &required);
            if ctx.format == OutputFormat::Json {
                print_json(&report);
                return Ok(());
            }

            if report.is_compatible {
                println!("✅ {} is compatible with {}", current, required);
            } else {
                println!("❌ {} is not compatible with {}", current, required);
            }
            for issue in &report.issues {
                print_warning(issue);
            }
            for recommendation in &report.recommendations {
                println!("  → {}", recommendation);
            }
        }
    }

    Ok(())
}
