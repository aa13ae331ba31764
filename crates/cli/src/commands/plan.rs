//! Plan Command

use anyhow::Result;
use clap::Args;
use fieldcheck_engine::planner::{PlanStepSummary, PlanSummary};
use fieldcheck_engine::StepDirection;

use crate::context::Context;
use crate::output::{print_json, print_list, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct PlanArgs {
    /// Version to migrate from
    pub from: String,

    /// Version to migrate to
    pub to: String,
}

impl TableDisplay for PlanStepSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Migration", "Name", "From", "To", "Direction"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.from_version.clone(),
            self.to_version.clone(),
            match self.direction {
                StepDirection::Forward => "forward",
                StepDirection::Reverse => "rollback",
            }
            .to_string(),
        ]
    }
}

/// Print a plan summary in the requested format
pub fn print_plan(summary: &PlanSummary, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(summary);
        return;
    }

    println!(
        "Plan {} -> {}: {} step(s), ~{}s",
        summary.from_version,
        summary.to_version,
        summary.steps.len(),
        summary.estimated_duration_ms / 1000
    );
    if !summary.steps.is_empty() {
        print_list(&summary.steps, format);
    }
    for risk in &summary.risks {
        print_warning(risk);
    }
    if summary.backup_required {
        println!("A backup will be taken before executing.");
    }
    if !summary.executable {
        println!("❌ Plan is not executable");
    }
}

pub async fn execute(args: PlanArgs, ctx: &Context) -> Result<()> {
    let plan = ctx.planner().try_create_migration_plan(&args.from, &args.to)?;
    print_plan(&plan.summary(), ctx.format);
    Ok(())
}
