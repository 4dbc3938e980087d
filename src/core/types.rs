use serde::Serialize;

pub type HouseholdId = i64;

/// Tax year the engine evaluates.
pub type Period = u32;

/// Household outcomes under one cumulative reform stack, aligned by position with
/// `household_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub household_ids: Vec<HouseholdId>,
    pub income_tax: Vec<f64>,
    pub net_income: Vec<f64>,
    pub benefits: Vec<f64>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.household_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.household_ids.is_empty()
    }
}

/// Raw (unrounded, unfiltered) change of one step relative to the previous stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDelta {
    pub provision: String,
    pub household_ids: Vec<HouseholdId>,
    pub net_income: Vec<f64>,
    pub tax: Vec<f64>,
    pub benefits: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionImpact {
    pub household_id: HouseholdId,
    pub provision: String,
    pub net_income_change: f64,
    pub tax_change: f64,
    pub benefit_change: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseholdDemographics {
    pub household_size: u32,
    pub num_dependents: u32,
    pub age_head: i64,
    pub age_spouse: Option<i64>,
    pub is_married: bool,
}

/// One row of the wide households table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HouseholdRow {
    pub id: HouseholdId,
    pub state: String,
    pub household_weight: f64,
    pub market_income: i64,
    pub baseline_net_income: i64,
    pub total_change_net_income: i64,
    pub pct_change_net_income: f64,
    pub total_change_tax: i64,
    pub total_change_benefits: i64,
    pub household_size: u32,
    pub num_dependents: u32,
    pub age_head: i64,
    pub age_spouse: Option<i64>,
    pub is_married: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSummary {
    pub provision: String,
    pub affected_households: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub households: usize,
    pub provision_records: usize,
    pub affected_households: usize,
    pub avg_provisions_per_affected_household: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactTables {
    pub households: Vec<HouseholdRow>,
    pub provisions: Vec<ProvisionImpact>,
    pub steps: Vec<StepSummary>,
    pub summary: RunSummary,
}
