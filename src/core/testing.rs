//! In-crate stand-in for the external calculation engine.
//!
//! Households have a market income, dependents and a base benefit amount. Composite
//! reform parameters understood here:
//! - `rate`: flat tax rate on market income
//! - `credit`: credit per dependent, clamped at zero liability unless `refundable`
//! - `drop_household`: omit one household from the result
//! - `reverse_order`: return households in reverse order
//! - `omit_column`: leave one household-level column out of the frame
//! - `fail`: refuse to evaluate
//! - any other object: `{ "net_income" | "tax" | "benefits": { "<id>": amount } }`
//!   additive adjustments

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;

use super::error::AggregateError;
use super::population::{EntityFrame, EntityTable, PolicyEngine};
use super::reform::{Reform, ReformSequence, ReformStep};
use super::types::{HouseholdId, Period};

#[derive(Debug, Clone)]
pub struct SyntheticHousehold {
    pub id: HouseholdId,
    pub market_income: f64,
    pub dependents: u32,
    pub benefits: f64,
}

impl SyntheticHousehold {
    pub fn single(id: HouseholdId, market_income: f64) -> Self {
        Self {
            id,
            market_income,
            dependents: 0,
            benefits: 0.0,
        }
    }

    pub fn with_dependents(mut self, dependents: u32) -> Self {
        self.dependents = dependents;
        self
    }

    pub fn with_benefits(mut self, benefits: f64) -> Self {
        self.benefits = benefits;
        self
    }
}

#[derive(Debug, Default)]
pub struct SyntheticEngine {
    households: Vec<SyntheticHousehold>,
    evaluations: AtomicUsize,
}

impl SyntheticEngine {
    pub fn new(households: Vec<SyntheticHousehold>) -> Self {
        Self {
            households,
            evaluations: AtomicUsize::new(0),
        }
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

fn adjustment(params: &serde_json::Map<String, Value>, field: &str, id: HouseholdId) -> f64 {
    params
        .values()
        .filter_map(Value::as_object)
        .filter_map(|block| block.get(field))
        .filter_map(|amounts| amounts.get(id.to_string()))
        .filter_map(Value::as_f64)
        .sum()
}

impl PolicyEngine for SyntheticEngine {
    fn evaluate(&self, reform: &Reform, _period: Period) -> Result<EntityFrame, AggregateError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let empty = serde_json::Map::new();
        let params = reform.definition().as_object().unwrap_or(&empty);
        if params.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(AggregateError::Evaluation {
                stack: String::new(),
                reason: "synthetic failure".to_string(),
            });
        }

        let rate = params.get("rate").and_then(Value::as_f64).unwrap_or(0.0);
        let credit = params.get("credit").and_then(Value::as_f64).unwrap_or(0.0);
        let refundable = params
            .get("refundable")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let dropped = params.get("drop_household").and_then(Value::as_i64);

        let mut households: Vec<&SyntheticHousehold> = self
            .households
            .iter()
            .filter(|h| Some(h.id) != dropped)
            .collect();
        if params.get("reverse_order").and_then(Value::as_bool) == Some(true) {
            households.reverse();
        }

        let mut ids = Vec::new();
        let mut tax = Vec::new();
        let mut net = Vec::new();
        let mut benefits = Vec::new();
        for h in &households {
            let gross = h.market_income * rate - credit * f64::from(h.dependents);
            let liability = if refundable { gross } else { gross.max(0.0) };
            let liability = liability + adjustment(params, "tax", h.id);
            let benefit = h.benefits + adjustment(params, "benefits", h.id);
            ids.push(h.id);
            tax.push(liability);
            benefits.push(benefit);
            let extra = adjustment(params, "net_income", h.id);
            net.push(h.market_income - liability + benefit + extra);
        }

        let mut person_ids = Vec::new();
        let mut person_households = Vec::new();
        let mut ages = Vec::new();
        let mut heads = Vec::new();
        let mut dependents = Vec::new();
        for h in &households {
            for member in 0..=h.dependents {
                person_ids.push(h.id * 100 + i64::from(member));
                person_households.push(h.id);
                ages.push(if member == 0 { 45.0 } else { 10.0 });
                heads.push(if member == 0 { 1.0 } else { 0.0 });
                dependents.push(if member == 0 { 0.0 } else { 1.0 });
            }
        }
        let person_count = person_ids.len();

        let count = ids.len();
        let omitted = params.get("omit_column").and_then(Value::as_str);
        let columns = [
            ("income_tax", tax),
            ("household_net_income_including_health_benefits", net),
            ("household_benefits", benefits),
            ("chip", vec![0.0; count]),
            ("household_weight", vec![1.5; count]),
            (
                "irs_gross_income",
                households.iter().map(|h| h.market_income).collect(),
            ),
        ];
        let mut household_table = EntityTable::households(ids.clone())
            .with_labels("state_code", vec!["MA".to_string(); count])?;
        for (name, values) in columns {
            if Some(name) != omitted {
                household_table = household_table.with_values(name, values)?;
            }
        }
        let tax_units = EntityTable::members(ids.clone(), ids)?
            .with_values("aca_ptc", vec![0.0; count])?;
        let persons = EntityTable::members(person_ids, person_households)?
            .with_values("age", ages)?
            .with_values("is_tax_unit_head", heads)?
            .with_values("is_tax_unit_spouse", vec![0.0; person_count])?
            .with_values("is_tax_unit_dependent", dependents)?
            .with_values("medicaid", vec![0.0; person_count])?;

        Ok(EntityFrame::new(household_table, tax_units, persons))
    }
}

/// Same reforms with positions `a` and `b` exchanged.
pub fn swapped(sequence: &ReformSequence, a: usize, b: usize) -> ReformSequence {
    let mut steps = sequence.steps().to_vec();
    steps.swap(a, b);
    ReformSequence::new(steps).expect("swapping keeps names unique")
}

pub fn sequence(steps: &[(&str, Value)]) -> ReformSequence {
    ReformSequence::new(
        steps
            .iter()
            .map(|(name, definition)| ReformStep::new(*name, Reform::new(definition.clone())))
            .collect(),
    )
    .expect("test sequence names are unique")
}
