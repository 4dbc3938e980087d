//! Boundary to the external tax/benefit calculation engine.
//!
//! An engine evaluation returns an [`EntityFrame`]: household, tax-unit and person
//! tables keyed by stable ids. The aggregator only reads named numeric columns out of
//! it and, when a quantity is not computed at household level, sums it up from the
//! member entities.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::config::QuantityNames;
use super::error::AggregateError;
use super::reform::Reform;
use super::types::{HouseholdId, Period, Snapshot};

/// Opaque `(reform, period) -> outcomes` evaluation.
///
/// Implementations must return the same household ids for every reform evaluated
/// against the same population.
pub trait PolicyEngine: Send + Sync {
    fn evaluate(&self, reform: &Reform, period: Period) -> Result<EntityFrame, AggregateError>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntityLevel {
    Household,
    TaxUnit,
    Person,
}

impl EntityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityLevel::Household => "household",
            EntityLevel::TaxUnit => "tax_unit",
            EntityLevel::Person => "person",
        }
    }
}

/// Columnar values for one entity level. Row `i` belongs to household `household_ids[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityTable {
    ids: Vec<i64>,
    household_ids: Vec<HouseholdId>,
    values: BTreeMap<String, Vec<f64>>,
    labels: BTreeMap<String, Vec<String>>,
}

impl EntityTable {
    /// Household-level table: every row is its own household.
    pub fn households(ids: Vec<HouseholdId>) -> Self {
        Self {
            household_ids: ids.clone(),
            ids,
            ..Self::default()
        }
    }

    /// Member-level table (tax units or persons).
    pub fn members(
        ids: Vec<i64>,
        household_ids: Vec<HouseholdId>,
    ) -> Result<Self, AggregateError> {
        if ids.len() != household_ids.len() {
            return Err(AggregateError::MalformedFrame {
                reason: format!(
                    "{} member ids but {} household links",
                    ids.len(),
                    household_ids.len()
                ),
            });
        }
        Ok(Self {
            ids,
            household_ids,
            ..Self::default()
        })
    }

    pub fn with_values(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, AggregateError> {
        let name = name.into();
        self.check_len(&name, values.len())?;
        self.values.insert(name, values);
        Ok(self)
    }

    pub fn with_labels(
        mut self,
        name: impl Into<String>,
        labels: Vec<String>,
    ) -> Result<Self, AggregateError> {
        let name = name.into();
        self.check_len(&name, labels.len())?;
        self.labels.insert(name, labels);
        Ok(self)
    }

    fn check_len(&self, name: &str, len: usize) -> Result<(), AggregateError> {
        if len != self.ids.len() {
            return Err(AggregateError::MalformedFrame {
                reason: format!(
                    "column '{name}' has {len} values for {} entities",
                    self.ids.len()
                ),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn household_ids(&self) -> &[HouseholdId] {
        &self.household_ids
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.values.get(name).map(Vec::as_slice)
    }

    pub fn labels(&self, name: &str) -> Option<&[String]> {
        self.labels.get(name).map(Vec::as_slice)
    }
}

/// Everything one engine evaluation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFrame {
    pub households: EntityTable,
    pub tax_units: EntityTable,
    pub persons: EntityTable,
}

impl EntityFrame {
    pub fn new(households: EntityTable, tax_units: EntityTable, persons: EntityTable) -> Self {
        Self {
            households,
            tax_units,
            persons,
        }
    }

    pub fn household_ids(&self) -> &[HouseholdId] {
        self.households.ids()
    }

    pub fn table(&self, level: EntityLevel) -> &EntityTable {
        match level {
            EntityLevel::Household => &self.households,
            EntityLevel::TaxUnit => &self.tax_units,
            EntityLevel::Person => &self.persons,
        }
    }

    /// Raw column at its own entity level.
    pub fn calculate(&self, name: &str, level: EntityLevel) -> Result<&[f64], AggregateError> {
        self.table(level)
            .values(name)
            .ok_or_else(|| AggregateError::unknown_quantity(name, level.as_str()))
    }

    /// Quantity mapped to household level, in household-table order.
    pub fn household_values(&self, name: &str) -> Result<Vec<f64>, AggregateError> {
        if let Some(values) = self.households.values(name) {
            return Ok(values.to_vec());
        }
        for level in [EntityLevel::TaxUnit, EntityLevel::Person] {
            let table = self.table(level);
            if let Some(values) = table.values(name) {
                return Ok(self.sum_to_households(table.household_ids(), values));
            }
        }
        Err(AggregateError::unknown_quantity(
            name,
            EntityLevel::Household.as_str(),
        ))
    }

    pub fn household_labels(&self, name: &str) -> Result<Vec<String>, AggregateError> {
        self.households
            .labels(name)
            .map(<[String]>::to_vec)
            .ok_or_else(|| AggregateError::unknown_quantity(name, EntityLevel::Household.as_str()))
    }

    /// Members linked to a household id outside the household table are skipped.
    fn sum_to_households(&self, member_households: &[HouseholdId], values: &[f64]) -> Vec<f64> {
        let index = household_index(self.household_ids());
        let mut totals = vec![0.0; self.household_ids().len()];
        for (household_id, value) in member_households.iter().zip(values) {
            if let Some(&position) = index.get(household_id) {
                totals[position] += value;
            }
        }
        totals
    }
}

pub(crate) fn household_index(ids: &[HouseholdId]) -> HashMap<HouseholdId, usize> {
    ids.iter()
        .enumerate()
        .map(|(position, id)| (*id, position))
        .collect()
}

/// Pulls the three tracked outcomes out of a frame. `stack_label` names the reform
/// stack in integrity errors.
pub fn snapshot_from_frame(
    frame: &EntityFrame,
    names: &QuantityNames,
    stack_label: &str,
) -> Result<Snapshot, AggregateError> {
    let household_ids = frame.household_ids().to_vec();
    let mut seen = HashSet::with_capacity(household_ids.len());
    if let Some(duplicate) = household_ids.iter().find(|id| !seen.insert(**id)) {
        return Err(AggregateError::IdentitySetMismatch {
            step: stack_label.to_string(),
            detail: format!("household {duplicate} appears more than once"),
        });
    }

    let income_tax = frame.household_values(&names.income_tax)?;
    let net_income = frame.household_values(&names.net_income)?;
    let mut benefits = vec![0.0; household_ids.len()];
    for component in &names.benefits {
        for (total, value) in benefits.iter_mut().zip(frame.household_values(component)?) {
            *total += value;
        }
    }

    Ok(Snapshot {
        household_ids,
        income_tax,
        net_income,
        benefits,
    })
}
