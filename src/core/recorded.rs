//! Replays outputs recorded from the external calculator.
//!
//! A recorded dataset carries the population (static household fields and persons)
//! and one scenario per cumulative reform stack that was evaluated. Scenarios are
//! matched on the composite reform definition and period only; nothing inside a
//! definition is interpreted.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::error::AggregateError;
use super::population::{EntityFrame, EntityTable, PolicyEngine};
use super::reform::Reform;
use super::types::{HouseholdId, Period};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedHousehold {
    pub id: HouseholdId,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedMember {
    #[serde(default)]
    pub id: Option<i64>,
    pub household_id: HouseholdId,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedScenario {
    #[serde(default)]
    pub reform: Reform,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub households: Vec<RecordedHousehold>,
    #[serde(default)]
    pub tax_units: Vec<RecordedMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedDataset {
    #[serde(default)]
    pub households: Vec<RecordedHousehold>,
    #[serde(default)]
    pub persons: Vec<RecordedMember>,
    #[serde(default)]
    pub scenarios: Vec<RecordedScenario>,
}

#[derive(Debug, Clone)]
pub struct RecordedEngine {
    dataset: RecordedDataset,
    persons: EntityTable,
}

impl RecordedEngine {
    pub fn open(path: &Path) -> Result<Self, AggregateError> {
        let unavailable = |reason: String| AggregateError::DatasetUnavailable {
            path: path.to_path_buf(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
        let dataset = serde_json::from_str::<RecordedDataset>(&raw)
            .map_err(|e| unavailable(format!("invalid dataset JSON: {e}")))?;
        Self::from_dataset(dataset).map_err(|e| unavailable(e.to_string()))
    }

    pub fn from_dataset(dataset: RecordedDataset) -> Result<Self, AggregateError> {
        let persons = member_table(&dataset.persons)?;
        Ok(Self { dataset, persons })
    }

    pub fn dataset(&self) -> &RecordedDataset {
        &self.dataset
    }

    fn find_scenario(&self, reform: &Reform, period: Period) -> Option<&RecordedScenario> {
        self.dataset
            .scenarios
            .iter()
            .find(|s| s.reform == *reform && s.period.is_none_or(|p| p == period))
    }
}

impl PolicyEngine for RecordedEngine {
    fn evaluate(&self, reform: &Reform, period: Period) -> Result<EntityFrame, AggregateError> {
        let scenario =
            self.find_scenario(reform, period)
                .ok_or_else(|| AggregateError::Evaluation {
                    stack: String::new(),
                    reason: format!(
                        "no recorded scenario matches the composite reform for period {period}"
                    ),
                })?;

        let statics: HashMap<HouseholdId, &BTreeMap<String, Value>> = self
            .dataset
            .households
            .iter()
            .map(|h| (h.id, &h.fields))
            .collect();

        let ids: Vec<HouseholdId> = scenario.households.iter().map(|h| h.id).collect();
        let rows: Vec<BTreeMap<String, Value>> = scenario
            .households
            .iter()
            .map(|h| {
                let mut merged = statics.get(&h.id).map(|f| (*f).clone()).unwrap_or_default();
                merged.extend(h.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                merged
            })
            .collect();
        let households = fill_columns(EntityTable::households(ids), &rows)?;
        let tax_units = member_table(&scenario.tax_units)?;

        Ok(EntityFrame::new(households, tax_units, self.persons.clone()))
    }
}

fn member_table(members: &[RecordedMember]) -> Result<EntityTable, AggregateError> {
    let ids = members
        .iter()
        .enumerate()
        .map(|(row, m)| m.id.unwrap_or(row as i64))
        .collect();
    let household_ids = members.iter().map(|m| m.household_id).collect();
    let rows: Vec<BTreeMap<String, Value>> = members.iter().map(|m| m.fields.clone()).collect();
    fill_columns(EntityTable::members(ids, household_ids)?, &rows)
}

/// Numbers and booleans become numeric columns, strings become label columns. A column
/// that is missing or mistyped in any row is left out.
fn fill_columns(
    mut table: EntityTable,
    rows: &[BTreeMap<String, Value>],
) -> Result<EntityTable, AggregateError> {
    let mut numeric: BTreeMap<&str, Vec<Option<f64>>> = BTreeMap::new();
    let mut text: BTreeMap<&str, Vec<Option<String>>> = BTreeMap::new();

    for (row, fields) in rows.iter().enumerate() {
        for (key, value) in fields {
            match value {
                Value::Number(n) => {
                    numeric
                        .entry(key.as_str())
                        .or_insert_with(|| vec![None; rows.len()])[row] = n.as_f64();
                }
                Value::Bool(flag) => {
                    numeric
                        .entry(key.as_str())
                        .or_insert_with(|| vec![None; rows.len()])[row] =
                        Some(if *flag { 1.0 } else { 0.0 });
                }
                Value::String(s) => {
                    text.entry(key.as_str())
                        .or_insert_with(|| vec![None; rows.len()])[row] = Some(s.clone());
                }
                _ => {}
            }
        }
    }

    for (name, column) in numeric {
        match column.into_iter().collect::<Option<Vec<f64>>>() {
            Some(values) => table = table.with_values(name, values)?,
            None => debug!(column = name, "skipping incomplete numeric column"),
        }
    }
    for (name, column) in text {
        match column.into_iter().collect::<Option<Vec<String>>>() {
            Some(labels) => table = table.with_labels(name, labels)?,
            None => debug!(column = name, "skipping incomplete text column"),
        }
    }
    Ok(table)
}
