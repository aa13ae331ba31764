//! Version compatibility checks

use crate::version::{Version, VersionInfo};
use serde::{Deserialize, Serialize};

/// Outcome of comparing a dataset version with a required version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    pub is_compatible: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Compare `current` against `required`.
///
/// Pure: the known versions are only consulted for breaking-change notes on
/// the versions an upgrade would pass through. Malformed input yields an
/// incompatible report naming the parse failure.
pub fn check_compatibility(
    current: &str,
    required: &str,
    known: &[VersionInfo],
) -> CompatibilityReport {
    let mut report = CompatibilityReport {
        is_compatible: true,
        ..Default::default()
    };

    let (from, to) = match (current.parse::<Version>(), required.parse::<Version>()) {
        (Ok(from), Ok(to)) => (from, to),
        (from, to) => {
            report.is_compatible = false;
            for err in [from.err(), to.err()].into_iter().flatten() {
                report.issues.push(format!("Cannot parse version: {}", err));
            }
            return report;
        }
    };

    if to < from {
        report.is_compatible = false;
        report
            .issues
            .push(format!("Version downgrade: {} -> {}", from, to));
        report.recommendations.push(format!(
            "Restore a snapshot taken at {} or run a downgrade plan with reversible migrations",
            to
        ));
        return report;
    }

    if to.major != from.major {
        report.is_compatible = false;
        report
            .issues
            .push(format!("Major version upgrade: {} -> {}", from, to));
        report.recommendations.push(format!(
            "Review the migration guide for {} before upgrading",
            to
        ));

        for info in known {
            let Ok(version) = info.parsed() else { continue };
            if info.breaking && version > from && version <= to {
                report.recommendations.push(format!(
                    "Consult the breaking-change notes for {}: {}",
                    version, info.description
                ));
            }
        }
    } else if to.minor != from.minor {
        report
            .issues
            .push(format!("Minor version upgrade: {} -> {}", from, to));
        report
            .recommendations
            .push("Run the migration plan to pick up new fields".to_string());
    } else if to.patch != from.patch {
        report
            .issues
            .push(format!("Patch version upgrade: {} -> {}", from, to));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn known() -> Vec<VersionInfo> {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        vec![
            VersionInfo::new("1.0.0", date, "baseline"),
            VersionInfo::new("1.1.0", date, "ticket priority"),
            VersionInfo::new("2.0.0", date, "contact details restructured").breaking(),
        ]
    }

    #[test]
    fn test_identical_versions() {
        let report = check_compatibility("1.1.0", "1.1.0", &known());
        assert!(report.is_compatible);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_minor_upgrade_is_compatible() {
        let report = check_compatibility("1.0.0", "1.1.0", &known());
        assert!(report.is_compatible);
        assert!(report.issues[0].starts_with("Minor version upgrade"));
    }

    #[test]
    fn test_major_upgrade() {
        let report = check_compatibility("1.0.0", "2.0.0", &known());
        assert!(!report.is_compatible);
        assert!(report.issues[0].contains("Major version upgrade"));
        assert!(report.recommendations.iter().any(|r| r.contains("migration guide")));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("contact details restructured")));
    }

    #[test]
    fn test_downgrade() {
        let report = check_compatibility("2.0.0", "1.1.0", &known());
        assert!(!report.is_compatible);
        assert!(report.issues[0].contains("Version downgrade"));
    }

    #[test]
    fn test_malformed_input() {
        let report = check_compatibility("1.0", "banana", &known());
        assert!(!report.is_compatible);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(|i| i.contains("Cannot parse version")));
    }
}
