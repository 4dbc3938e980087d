use tracing::debug;

use super::config::AggregatorConfig;
use super::engine::{BaselineEvaluation, extract_deltas};
use super::error::AggregateError;
use super::types::{
    HouseholdDemographics, HouseholdRow, ImpactTables, ProvisionImpact, RunSummary, Snapshot,
    StepSummary,
};

/// Round-half-to-even at `decimals` places. Never returns negative zero.
pub fn round_decimals(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round_ties_even() / scale + 0.0
}

/// Nearest multiple of `unit`, round-half-to-even.
pub fn round_to_unit(value: f64, unit: f64) -> i64 {
    ((value / unit).round_ties_even() * unit).round() as i64
}

/// Percentage change against |baseline|; zero when the baseline itself is zero.
pub fn percent_change(change: f64, baseline: f64) -> f64 {
    if baseline == 0.0 {
        0.0
    } else {
        change / baseline.abs() * 100.0
    }
}

pub fn build_tables(
    baseline: &BaselineEvaluation,
    final_snapshot: &Snapshot,
    demographics: &[HouseholdDemographics],
    provisions: Vec<ProvisionImpact>,
    steps: Vec<StepSummary>,
    config: &AggregatorConfig,
) -> Result<ImpactTables, AggregateError> {
    let base = &baseline.snapshot;
    let totals = extract_deltas("final", base, final_snapshot)?;
    let unit = config.total_rounding_unit;
    let statics = &baseline.statics;

    let zero_baselines = base.net_income.iter().filter(|net| **net == 0.0).count();
    if zero_baselines > 0 {
        debug!(
            zero_baselines,
            "households with zero baseline net income report 0% change"
        );
    }

    let households: Vec<HouseholdRow> = base
        .household_ids
        .iter()
        .enumerate()
        .zip(demographics)
        .map(|((i, id), demo)| HouseholdRow {
            id: *id,
            state: statics.state[i].clone(),
            household_weight: round_decimals(statics.weight[i], config.weight_decimals),
            market_income: round_to_unit(statics.market_income[i], 1.0),
            baseline_net_income: round_to_unit(base.net_income[i], unit),
            total_change_net_income: round_to_unit(totals.net_income[i], unit),
            pct_change_net_income: round_decimals(
                percent_change(totals.net_income[i], base.net_income[i]),
                config.percent_decimals,
            ),
            total_change_tax: round_to_unit(totals.tax[i], unit),
            total_change_benefits: round_to_unit(totals.benefits[i], unit),
            household_size: demo.household_size,
            num_dependents: demo.num_dependents,
            age_head: demo.age_head,
            age_spouse: demo.age_spouse,
            is_married: demo.is_married,
        })
        .collect();

    let summary = summarize(&households, &provisions);
    Ok(ImpactTables {
        households,
        provisions,
        steps,
        summary,
    })
}

fn summarize(households: &[HouseholdRow], provisions: &[ProvisionImpact]) -> RunSummary {
    let affected_households = households
        .iter()
        .filter(|row| row.total_change_net_income != 0)
        .count();
    let avg_provisions_per_affected_household = if affected_households == 0 {
        0.0
    } else {
        provisions.len() as f64 / affected_households as f64
    };
    RunSummary {
        households: households.len(),
        provision_records: provisions.len(),
        affected_households,
        avg_provisions_per_affected_household,
    }
}
