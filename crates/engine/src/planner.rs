//! Migration planning
//!
//! Plans walk the registered version sequence between two endpoints and
//! collect the migrations attached to every version on the way. Planning is
//! fail-soft: unknown endpoints, missing steps and branching definitions are
//! reported as risks and gaps on a partial plan instead of errors. Callers
//! that want a hard failure for unknown endpoints use
//! [`MigrationPlanner::try_create_migration_plan`].

use crate::config::EngineConfig;
use crate::migration::MigrationRef;
use crate::version::{Version, VersionInfo, VersionRegistry};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// When a plan demands a backup before executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupPolicy {
    /// Only when a traversed version is marked breaking
    #[default]
    OnBreaking,
    /// Breaking versions, major version changes and downgrades
    OnMajorOrDowngrade,
    /// Every plan that changes the version
    Always,
}

/// Whether a step applies a migration or undoes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDirection {
    Forward,
    Reverse,
}

/// One step of a plan
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub migration: MigrationRef,
    pub direction: StepDirection,
}

impl PlanStep {
    pub fn id(&self) -> &str {
        self.migration.id()
    }

    /// Version the dataset is at before this step
    pub fn source_version(&self) -> &str {
        match self.direction {
            StepDirection::Forward => self.migration.from_version(),
            StepDirection::Reverse => self.migration.to_version(),
        }
    }

    /// Version the dataset is at after this step
    pub fn target_version(&self) -> &str {
        match self.direction {
            StepDirection::Forward => self.migration.to_version(),
            StepDirection::Reverse => self.migration.from_version(),
        }
    }
}

/// An ordered sequence of migrations between two versions.
///
/// Only valid for the version catalog as it was when the plan was computed.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub from_version: String,
    pub to_version: String,
    pub migrations: Vec<PlanStep>,
    pub estimated_duration: Duration,
    pub risks: Vec<String>,
    pub backup_required: bool,
    /// Steps of the path that could not be planned
    pub gaps: Vec<String>,
}

impl MigrationPlan {
    fn empty(from: &str, to: &str) -> Self {
        Self {
            from_version: from.to_string(),
            to_version: to.to_string(),
            migrations: Vec::new(),
            estimated_duration: Duration::ZERO,
            risks: Vec::new(),
            backup_required: false,
            gaps: Vec::new(),
        }
    }

    /// Whether executing this plan can reach the target version
    pub fn is_executable(&self) -> bool {
        self.gaps.is_empty() && (self.is_noop() || !self.migrations.is_empty())
    }

    pub fn is_noop(&self) -> bool {
        match (
            self.from_version.parse::<Version>(),
            self.to_version.parse::<Version>(),
        ) {
            (Ok(from), Ok(to)) => from == to,
            _ => false,
        }
    }

    pub fn is_downgrade(&self) -> bool {
        matches!(
            (self.from_version.parse::<Version>(), self.to_version.parse::<Version>()),
            (Ok(from), Ok(to)) if to < from
        )
    }

    pub fn migration_ids(&self) -> Vec<String> {
        self.migrations.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            from_version: self.from_version.clone(),
            to_version: self.to_version.clone(),
            steps: self
                .migrations
                .iter()
                .map(|s| PlanStepSummary {
                    id: s.id().to_string(),
                    name: s.migration.name().to_string(),
                    from_version: s.source_version().to_string(),
                    to_version: s.target_version().to_string(),
                    direction: s.direction,
                })
                .collect(),
            estimated_duration_ms: self.estimated_duration.as_millis() as u64,
            risks: self.risks.clone(),
            backup_required: self.backup_required,
            executable: self.is_executable(),
        }
    }
}

/// Serializable view of a [`MigrationPlan`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub from_version: String,
    pub to_version: String,
    pub steps: Vec<PlanStepSummary>,
    pub estimated_duration_ms: u64,
    pub risks: Vec<String>,
    pub backup_required: bool,
    pub executable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStepSummary {
    pub id: String,
    pub name: String,
    pub from_version: String,
    pub to_version: String,
    pub direction: StepDirection,
}

/// Computes migration plans against a version catalog
#[derive(Debug, Clone)]
pub struct MigrationPlanner {
    versions: Arc<VersionRegistry>,
    policy: BackupPolicy,
    step_cost: Duration,
}

impl MigrationPlanner {
    pub fn new(versions: Arc<VersionRegistry>) -> Self {
        let defaults = EngineConfig::default();
        Self {
            versions,
            policy: defaults.migration.backup_policy,
            step_cost: defaults.step_cost(),
        }
    }

    pub fn from_config(versions: Arc<VersionRegistry>, config: &EngineConfig) -> Self {
        Self {
            versions,
            policy: config.migration.backup_policy,
            step_cost: config.step_cost(),
        }
    }

    pub fn with_policy(mut self, policy: BackupPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_step_cost(mut self, step_cost: Duration) -> Self {
        self.step_cost = step_cost;
        self
    }

    pub fn versions(&self) -> &Arc<VersionRegistry> {
        &self.versions
    }

    /// Like [`create_migration_plan`](Self::create_migration_plan) but fails
    /// when either endpoint is not registered
    pub fn try_create_migration_plan(&self, from: &str, to: &str) -> Result<MigrationPlan> {
        for endpoint in [from, to] {
            if !self.versions.is_known(endpoint) {
                return Err(Error::UnknownVersion(endpoint.to_string()));
            }
        }
        Ok(self.create_migration_plan(from, to))
    }

    /// Compute the plan from `from` to `to`. Never fails; problems are
    /// reported through `risks` and `gaps`.
    pub fn create_migration_plan(&self, from: &str, to: &str) -> MigrationPlan {
        let mut plan = MigrationPlan::empty(from, to);

        let mut endpoints = Vec::new();
        for (label, endpoint) in [("source", from), ("target", to)] {
            match endpoint.parse::<Version>() {
                Ok(v) if self.versions.is_known(endpoint) => endpoints.push(v),
                Ok(_) => {
                    let note = format!("Unknown {} version {}", label, endpoint);
                    plan.risks.push(note.clone());
                    plan.gaps.push(note);
                }
                Err(e) => {
                    let note = format!("Invalid {} version: {}", label, e);
                    plan.risks.push(note.clone());
                    plan.gaps.push(note);
                }
            }
        }
        let (from_v, to_v) = match endpoints.as_slice() {
            [a, b] => (*a, *b),
            _ => {
                warn!("Cannot plan {} -> {}: {}", from, to, plan.gaps.join("; "));
                plan.backup_required = self.policy == BackupPolicy::Always;
                return plan;
            }
        };

        if from_v == to_v {
            return plan;
        }

        let catalog: Vec<(Version, VersionInfo)> = self
            .versions
            .available_versions()
            .into_iter()
            .filter_map(|info| info.parsed().ok().map(|v| (v, info)))
            .collect();

        let downgrade = to_v < from_v;
        let mut breaking = false;

        if downgrade {
            plan.risks.push(format!(
                "Downgrade from {} to {}: data introduced after {} may be lost",
                from_v, to_v, to_v
            ));
            // Walk down from the source, undoing the steps that led into each version.
            for index in (0..catalog.len()).rev() {
                let (version, info) = &catalog[index];
                if *version > from_v || *version <= to_v || index == 0 {
                    continue;
                }
                let previous = catalog[index - 1].0;
                breaking |= info.breaking;

                let step = self.adjacent_migrations(&mut plan, info, previous, *version);
                if step.is_empty() {
                    continue;
                }
                for migration in step.into_iter().rev() {
                    if migration.can_rollback() {
                        plan.migrations.push(PlanStep {
                            migration,
                            direction: StepDirection::Reverse,
                        });
                    } else {
                        let note = format!(
                            "Migration {} ({} -> {}) has no rollback; cannot downgrade past {}",
                            migration.id(),
                            previous,
                            version,
                            version
                        );
                        plan.risks.push(note.clone());
                        plan.gaps.push(note);
                    }
                }
            }
        } else {
            let mut previous = from_v;
            for (version, info) in catalog.iter().filter(|(v, _)| *v > from_v && *v <= to_v) {
                breaking |= info.breaking;
                let step = self.adjacent_migrations(&mut plan, info, previous, *version);
                for migration in step {
                    if !migration.can_rollback() {
                        plan.risks.push(format!(
                            "Migration {} has no rollback; a later failure cannot undo it",
                            migration.id()
                        ));
                    }
                    plan.migrations.push(PlanStep {
                        migration,
                        direction: StepDirection::Forward,
                    });
                }
                previous = *version;
            }
        }

        if breaking {
            plan.risks.push(format!(
                "Path {} -> {} crosses a breaking version",
                from_v, to_v
            ));
        }
        let major = from_v.major != to_v.major;
        if major {
            plan.risks.push(format!(
                "Major version change: {} -> {}",
                from_v, to_v
            ));
        }

        plan.backup_required = match self.policy {
            BackupPolicy::OnBreaking => breaking,
            BackupPolicy::OnMajorOrDowngrade => breaking || major || downgrade,
            BackupPolicy::Always => true,
        };
        plan.estimated_duration = self.step_cost * plan.migrations.len() as u32;

        debug!(
            "Planned {} -> {}: {} step(s), {} risk(s), backup_required={}",
            from_v,
            to_v,
            plan.migrations.len(),
            plan.risks.len(),
            plan.backup_required
        );
        plan
    }

    /// Migrations of `info` that step from `previous` into `version`.
    ///
    /// Anything attached to the version that starts elsewhere indicates a
    /// branching version graph; it is excluded and reported.
    fn adjacent_migrations(
        &self,
        plan: &mut MigrationPlan,
        info: &VersionInfo,
        previous: Version,
        version: Version,
    ) -> Vec<MigrationRef> {
        let mut adjacent = Vec::new();

        for migration in &info.migrations {
            let source = migration.from_version().parse::<Version>().ok();
            let target = migration.to_version().parse::<Version>().ok();
            if source == Some(previous) && target == Some(version) {
                adjacent.push(migration.clone());
            } else {
                plan.risks.push(format!(
                    "Migration {} ({} -> {}) is attached to {} but does not step from {}; excluded",
                    migration.id(),
                    migration.from_version(),
                    migration.to_version(),
                    version,
                    previous
                ));
            }
        }

        if adjacent.is_empty() {
            let note = format!("No migration registered from {} to {}", previous, version);
            plan.risks.push(note.clone());
            plan.gaps.push(note);
        }

        adjacent
    }
}
