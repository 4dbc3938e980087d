use tracing::{debug, info};

use super::config::AggregatorConfig;
use super::demographics::{PersonRecords, summarize_households};
use super::error::AggregateError;
use super::population::{EntityFrame, PolicyEngine, household_index, snapshot_from_frame};
use super::reform::{Reform, ReformSequence, ReformStack, ReformStep};
use super::results::{build_tables, round_decimals};
use super::types::{ImpactTables, Period, ProvisionImpact, Snapshot, StepDelta, StepSummary};

/// Reform-independent household columns taken from the baseline evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct HouseholdStatics {
    pub state: Vec<String>,
    pub weight: Vec<f64>,
    pub market_income: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaselineEvaluation {
    pub snapshot: Snapshot,
    pub statics: HouseholdStatics,
    pub persons: PersonRecords,
}

/// Evaluates the unreformed stack once. Any missing quantity here is fatal: without a
/// baseline there is nothing to difference against.
pub fn evaluate_baseline<E: PolicyEngine + ?Sized>(
    engine: &E,
    stack: &ReformStack,
    period: Period,
    config: &AggregatorConfig,
) -> Result<BaselineEvaluation, AggregateError> {
    let names = &config.quantities;
    let frame = evaluate_frame(engine, stack, period)?;
    let snapshot = snapshot_from_frame(&frame, names, &stack.label())?;
    let statics = HouseholdStatics {
        state: frame.household_labels(&names.state)?,
        weight: frame.household_values(&names.household_weight)?,
        market_income: frame.household_values(&names.market_income)?,
    };
    let persons = PersonRecords::from_frame(&frame, names)?;
    Ok(BaselineEvaluation {
        snapshot,
        statics,
        persons,
    })
}

pub fn evaluate_stack<E: PolicyEngine + ?Sized>(
    engine: &E,
    stack: &ReformStack,
    period: Period,
    config: &AggregatorConfig,
) -> Result<Snapshot, AggregateError> {
    let frame = evaluate_frame(engine, stack, period)?;
    snapshot_from_frame(&frame, &config.quantities, &stack.label())
}

fn evaluate_frame<E: PolicyEngine + ?Sized>(
    engine: &E,
    stack: &ReformStack,
    period: Period,
) -> Result<EntityFrame, AggregateError> {
    engine
        .evaluate(stack.composite(), period)
        .map_err(|err| match err {
            AggregateError::Evaluation { reason, .. } => AggregateError::Evaluation {
                stack: stack.label(),
                reason,
            },
            other => other,
        })
}

/// `current - previous` per household, in `previous` order.
///
/// A reordered but identical id set is realigned by id; any other difference in the
/// id sets is an integrity error.
pub fn extract_deltas(
    step: &str,
    previous: &Snapshot,
    current: &Snapshot,
) -> Result<StepDelta, AggregateError> {
    let mismatch = |detail: String| AggregateError::IdentitySetMismatch {
        step: step.to_string(),
        detail,
    };

    if previous.len() != current.len() {
        return Err(mismatch(format!(
            "{} households before, {} after",
            previous.len(),
            current.len()
        )));
    }

    let order: Vec<usize> = if previous.household_ids == current.household_ids {
        (0..current.len()).collect()
    } else {
        let index = household_index(&current.household_ids);
        previous
            .household_ids
            .iter()
            .map(|id| {
                index
                    .get(id)
                    .copied()
                    .ok_or_else(|| mismatch(format!("household {id} missing after the step")))
            })
            .collect::<Result<_, _>>()?
    };

    let diff = |after: &[f64], before: &[f64]| -> Vec<f64> {
        order
            .iter()
            .zip(before)
            .map(|(&position, before)| after[position] - before)
            .collect()
    };

    Ok(StepDelta {
        provision: step.to_string(),
        household_ids: previous.household_ids.clone(),
        net_income: diff(&current.net_income, &previous.net_income),
        tax: diff(&current.income_tax, &previous.income_tax),
        benefits: diff(&current.benefits, &previous.benefits),
    })
}

/// Sparse attribution for one step: a record for every household where any of the
/// three deltas is strictly above the threshold, carrying all three values rounded.
pub fn record_provisions(delta: &StepDelta, config: &AggregatorConfig) -> Vec<ProvisionImpact> {
    let threshold = config.materiality_threshold;
    let decimals = config.provision_decimals;
    delta
        .household_ids
        .iter()
        .enumerate()
        .filter(|&(i, _)| {
            delta.net_income[i].abs() > threshold
                || delta.tax[i].abs() > threshold
                || delta.benefits[i].abs() > threshold
        })
        .map(|(i, household_id)| ProvisionImpact {
            household_id: *household_id,
            provision: delta.provision.clone(),
            net_income_change: round_decimals(delta.net_income[i], decimals),
            tax_change: round_decimals(delta.tax[i], decimals),
            benefit_change: round_decimals(delta.benefits[i], decimals),
        })
        .collect()
}

/// Accumulator threaded through the fold over the reform sequence.
#[derive(Debug)]
struct SequencerState {
    stack: ReformStack,
    previous: Snapshot,
    provisions: Vec<ProvisionImpact>,
    steps: Vec<StepSummary>,
}

impl SequencerState {
    fn advance<E: PolicyEngine + ?Sized>(
        mut self,
        engine: &E,
        step: &ReformStep,
        period: Period,
        config: &AggregatorConfig,
    ) -> Result<Self, AggregateError> {
        info!(provision = %step.name, "processing reform");
        let stack = self.stack.push(step);
        let current = evaluate_stack(engine, &stack, period, config)?;
        let delta = extract_deltas(&step.name, &self.previous, &current)?;
        let recorded = record_provisions(&delta, config);
        debug!(
            provision = %step.name,
            affected = recorded.len(),
            "step deltas recorded"
        );

        self.steps.push(StepSummary {
            provision: step.name.clone(),
            affected_households: recorded.len(),
        });
        self.provisions.extend(recorded);
        self.stack = stack;
        self.previous = current;
        Ok(self)
    }
}

/// Applies `sequence` cumulatively on top of `baseline` and attributes each household's
/// change to the step that caused it.
///
/// Steps run strictly in order. The first failure aborts the whole run and no partial
/// tables are returned.
pub fn run_stacked_aggregation<E: PolicyEngine + ?Sized>(
    engine: &E,
    baseline: &Reform,
    sequence: &ReformSequence,
    period: Period,
    config: &AggregatorConfig,
) -> Result<ImpactTables, AggregateError> {
    config.validate()?;

    info!(reforms = sequence.len(), period, "analyzing reform components");
    for (position, name) in sequence.names().enumerate() {
        info!("  {}. {}", position + 1, name);
    }

    let baseline_stack = ReformStack::baseline(baseline);
    let baseline_eval = evaluate_baseline(engine, &baseline_stack, period, config)?;
    let demographics = summarize_households(
        &baseline_eval.snapshot.household_ids,
        &baseline_eval.persons,
        config.default_head_age,
    )?;

    let initial = SequencerState {
        stack: baseline_stack,
        previous: baseline_eval.snapshot.clone(),
        provisions: Vec::new(),
        steps: Vec::with_capacity(sequence.len()),
    };
    let finished = sequence
        .steps()
        .iter()
        .try_fold(initial, |state, step| {
            state.advance(engine, step, period, config)
        })?;

    let tables = build_tables(
        &baseline_eval,
        &finished.previous,
        &demographics,
        finished.provisions,
        finished.steps,
        config,
    )?;

    let summary = &tables.summary;
    info!(
        households = summary.households,
        provision_records = summary.provision_records,
        affected_households = summary.affected_households,
        avg_provisions = summary.avg_provisions_per_affected_household,
        "aggregation finished"
    );

    Ok(tables)
}
