//! Field-service dispatch test datasets
//!
//! Every record id carries the `e2e-<run>-` prefix so fixture data stays
//! identifiable when it is written into a shared environment.

use chrono::{TimeZone, Utc};
use fieldcheck_engine::Dataset;
use serde_json::{json, Value};
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// Prefix shared by all fixture record ids
pub const FIXTURE_PREFIX: &str = "e2e";

/// Dataset version the fixtures are shaped for
pub const FIXTURE_VERSION: &str = "1.0.0";

const CITIES: [&str; 3] = ["Springfield", "Riverton", "Lakeside"];
const SKILLS: [&str; 3] = ["hvac", "electrical", "plumbing"];

/// Builder for a dispatch dataset at version 1.0.0
#[derive(Debug, Clone)]
pub struct DispatchFixture {
    run_id: String,
    customers: usize,
    technicians: usize,
    tickets_per_customer: usize,
}

impl DispatchFixture {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            customers: 3,
            technicians: 2,
            tickets_per_customer: 2,
        }
    }

    /// A fixture with a fresh random run id
    pub fn random() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::new(&id[..8])
    }

    pub fn customers(mut self, count: usize) -> Self {
        self.customers = count;
        self
    }

    pub fn technicians(mut self, count: usize) -> Self {
        self.technicians = count;
        self
    }

    pub fn tickets_per_customer(mut self, count: usize) -> Self {
        self.tickets_per_customer = count;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn id(&self, kind: &str, n: usize) -> String {
        format!("{}-{}-{}-{}", FIXTURE_PREFIX, self.run_id, kind, n)
    }

    pub fn build(&self) -> Dataset {
        let customers: Vec<Value> = (1..=self.customers)
            .map(|n| {
                json!({
                    "id": self.id("cust", n),
                    "name": format!("E2E Customer {} ({})", n, self.run_id),
                    "phone": format!("555-01{:02}", n % 100),
                    "email": format!("cust{}+{}@fieldcheck.test", n, self.run_id),
                    "address": {
                        "street": format!("{} Test Lane", 100 + n),
                        "city": CITIES[n % CITIES.len()],
                    },
                })
            })
            .collect();

        let technicians: Vec<Value> = (1..=self.technicians)
            .map(|n| {
                json!({
                    "id": self.id("tech", n),
                    "name": format!("E2E Technician {}", n),
                    "skills": [SKILLS[n % SKILLS.len()], SKILLS[(n + 1) % SKILLS.len()]],
                    "active": true,
                    "hourlyRate": 42.5 + n as f64,
                })
            })
            .collect();

        let mut tickets = Vec::new();
        let mut stops: Vec<Vec<String>> = vec![Vec::new(); self.technicians];
        for c in 1..=self.customers {
            for t in 1..=self.tickets_per_customer {
                let n = (c - 1) * self.tickets_per_customer + t;
                let id = self.id("ticket", n);
                let mut ticket = json!({
                    "id": id,
                    "customerId": self.id("cust", c),
                    "status": if n % 3 == 0 { "scheduled" } else { "open" },
                    "summary": format!("Service call #{} for customer {}", n, c),
                    "estimatedHours": (n % 4) + 1,
                });
                if self.technicians > 0 {
                    let tech = n % self.technicians;
                    ticket["technicianId"] = json!(self.id("tech", tech + 1));
                    stops[tech].push(id);
                }
                tickets.push(ticket);
            }
        }

        let routes: Vec<Value> = stops
            .into_iter()
            .enumerate()
            .map(|(i, stops)| {
                json!({
                    "id": self.id("route", i + 1),
                    "technicianId": self.id("tech", i + 1),
                    "date": "2024-06-03",
                    "stops": stops,
                })
            })
            .collect();

        let mut dataset = Dataset::new(FIXTURE_VERSION)
            .with_test_run_id(self.run_id.clone())
            .with_table("customers", customers)
            .with_table("technicians", technicians)
            .with_table("tickets", tickets)
            .with_table("routes", routes);
        dataset.metadata.created_at = Utc
            .with_ymd_and_hms(2024, 6, 1, 8, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        dataset
    }
}

/// Whether a record belongs to the fixture run
pub fn is_fixture_record(record: &Value, run_id: &str) -> bool {
    record
        .get("id")
        .and_then(Value::as_str)
        .map_or(false, |id| id.starts_with(&format!("{}-{}-", FIXTURE_PREFIX, run_id)))
}

/// Read a dataset from a JSON file
pub fn load_dataset(path: impl AsRef<Path>) -> E2eResult<Dataset> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(E2eError::FixtureNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| E2eError::FixtureParse(format!("{}: {}", path.display(), e)))
}

/// Write a dataset to a JSON file
pub fn save_dataset(path: impl AsRef<Path>, dataset: &Dataset) -> E2eResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(dataset)?)?;
    Ok(())
}
