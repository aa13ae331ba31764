//! Built-in dispatch dataset versions
//!
//! | Version | Change |
//! |---------|--------|
//! | 1.0.0   | baseline: `customers`, `technicians`, `routes`, `tickets` |
//! | 1.1.0   | tickets gain `priority` (default `"normal"`) |
//! | 1.2.0   | routes gain `estimatedMinutes` derived from their stops |
//! | 2.0.0   | breaking: customer `phone`/`email` move into a `contact` object |

use crate::error::MigrationError;
use crate::migration::Migration;
use crate::types::Dataset;
use crate::version::{VersionInfo, VersionRegistry};
use chrono::NaiveDate;
use serde_json::{Map, Value};

/// Minutes budgeted per route stop
pub const MINUTES_PER_STOP: u64 = 15;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// Register the built-in version chain
pub fn register_builtin_versions(registry: &VersionRegistry) -> crate::Result<()> {
    let versions = [
        VersionInfo::new("1.0.0", date(2024, 1, 15), "Baseline dispatch dataset"),
        VersionInfo::new("1.1.0", date(2024, 4, 2), "Ticket priorities")
            .with_migration(AddTicketPriority),
        VersionInfo::new("1.2.0", date(2024, 7, 9), "Route duration estimates")
            .with_migration(AddRouteEstimate),
        VersionInfo::new("2.0.0", date(2024, 11, 20), "Customer contact details restructured")
            .breaking()
            .with_migration(NestCustomerContact)
            .with_deprecation("customers.phone and customers.email replaced by customers.contact"),
    ];

    for info in versions {
        registry.register_version(info)?;
    }
    Ok(())
}

/// Apply `f` to every record of a table, requiring object records
fn map_records(
    dataset: &Dataset,
    table: &str,
    mut f: impl FnMut(&mut Map<String, Value>) -> Result<(), MigrationError>,
) -> Result<Dataset, MigrationError> {
    let mut next = dataset.clone();
    if let Some(records) = next.table_mut(table) {
        for (index, record) in records.iter_mut().enumerate() {
            let object = record.as_object_mut().ok_or_else(|| {
                MigrationError::new(format!("{} record {} is not an object", table, index))
            })?;
            f(object)?;
        }
    }
    Ok(next)
}

pub struct AddTicketPriority;

impl Migration for AddTicketPriority {
    fn id(&self) -> &str {
        "1.1.0-ticket-priority"
    }

    fn name(&self) -> &str {
        "Add ticket priority"
    }

    fn description(&self) -> &str {
        "Default every ticket without a priority to \"normal\""
    }

    fn from_version(&self) -> &str {
        "1.0.0"
    }

    fn to_version(&self) -> &str {
        "1.1.0"
    }

    fn migrate(&self, dataset: &Dataset) -> Result<Dataset, MigrationError> {
        map_records(dataset, "tickets", |ticket| {
            ticket
                .entry("priority")
                .or_insert_with(|| Value::String("normal".to_string()));
            Ok(())
        })
    }

    fn can_rollback(&self) -> bool {
        true
    }

    fn rollback(&self, dataset: &Dataset) -> Result<Dataset, MigrationError> {
        map_records(dataset, "tickets", |ticket| {
            ticket.remove("priority");
            Ok(())
        })
    }
}

pub struct AddRouteEstimate;

impl Migration for AddRouteEstimate {
    fn id(&self) -> &str {
        "1.2.0-route-estimate"
    }

    fn name(&self) -> &str {
        "Add route duration estimate"
    }

    fn description(&self) -> &str {
        "Derive estimatedMinutes from the number of stops on each route"
    }

    fn from_version(&self) -> &str {
        "1.1.0"
    }

    fn to_version(&self) -> &str {
        "1.2.0"
    }

    fn migrate(&self, dataset: &Dataset) -> Result<Dataset, MigrationError> {
        map_records(dataset, "routes", |route| {
            let stops = match route.get("stops") {
                None | Some(Value::Null) => 0,
                Some(Value::Array(stops)) => stops.len() as u64,
                Some(other) => {
                    return Err(MigrationError::new(format!(
                        "route stops must be a list, found {}",
                        other
                    )))
                }
            };
            route.insert(
                "estimatedMinutes".to_string(),
                Value::from(stops * MINUTES_PER_STOP),
            );
            Ok(())
        })
    }

    fn can_rollback(&self) -> bool {
        true
    }

    fn rollback(&self, dataset: &Dataset) -> Result<Dataset, MigrationError> {
        map_records(dataset, "routes", |route| {
            route.remove("estimatedMinutes");
            Ok(())
        })
    }
}

pub struct NestCustomerContact;

impl Migration for NestCustomerContact {
    fn id(&self) -> &str {
        "2.0.0-customer-contact"
    }

    fn name(&self) -> &str {
        "Nest customer contact details"
    }

    fn description(&self) -> &str {
        "Move customer phone and email into a contact object"
    }

    fn from_version(&self) -> &str {
        "1.2.0"
    }

    fn to_version(&self) -> &str {
        "2.0.0"
    }

    fn migrate(&self, dataset: &Dataset) -> Result<Dataset, MigrationError> {
        map_records(dataset, "customers", |customer| {
            if customer.contains_key("contact") {
                return Err(MigrationError::new(
                    "customer already has a contact object",
                ));
            }
            let mut contact = Map::new();
            for field in ["phone", "email"] {
                if let Some(value) = customer.remove(field) {
                    contact.insert(field.to_string(), value);
                }
            }
            customer.insert("contact".to_string(), Value::Object(contact));
            Ok(())
        })
    }

    fn can_rollback(&self) -> bool {
        true
    }

    fn rollback(&self, dataset: &Dataset) -> Result<Dataset, MigrationError> {
        map_records(dataset, "customers", |customer| {
            match customer.remove("contact") {
                Some(Value::Object(contact)) => {
                    for (field, value) in contact {
                        customer.insert(field, value);
                    }
                    Ok(())
                }
                Some(other) => Err(MigrationError::new(format!(
                    "customer contact must be an object, found {}",
                    other
                ))),
                None => Ok(()),
            }
        })
    }
}
