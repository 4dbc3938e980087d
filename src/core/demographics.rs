use tracing::{debug, warn};

use super::config::QuantityNames;
use super::error::AggregateError;
use super::population::{EntityFrame, EntityLevel, household_index};
use super::types::{HouseholdDemographics, HouseholdId};

/// Person-level inputs to the demographic summary, in engine row order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonRecords {
    pub household_ids: Vec<HouseholdId>,
    pub ages: Vec<f64>,
    pub is_head: Vec<bool>,
    pub is_spouse: Vec<bool>,
    pub is_dependent: Vec<bool>,
}

impl PersonRecords {
    pub fn from_frame(frame: &EntityFrame, names: &QuantityNames) -> Result<Self, AggregateError> {
        let flag = |name: &str| -> Result<Vec<bool>, AggregateError> {
            Ok(frame
                .calculate(name, EntityLevel::Person)?
                .iter()
                .map(|value| *value > 0.5)
                .collect())
        };

        Ok(Self {
            household_ids: frame.persons.household_ids().to_vec(),
            ages: frame.calculate(&names.age, EntityLevel::Person)?.to_vec(),
            is_head: flag(&names.is_head)?,
            is_spouse: flag(&names.is_spouse)?,
            is_dependent: flag(&names.is_dependent)?,
        })
    }
}

#[derive(Debug, Default)]
struct HouseholdTally {
    size: u32,
    dependents: u32,
    head_age: Option<f64>,
    spouse_age: Option<f64>,
}

/// Groups persons by household id, ignoring tax-unit boundaries.
///
/// Head and spouse ages come from the first flagged person in row order. A household
/// without a flagged head gets `default_head_age`; one without any persons is an
/// integrity error.
pub fn summarize_households(
    household_ids: &[HouseholdId],
    persons: &PersonRecords,
    default_head_age: i64,
) -> Result<Vec<HouseholdDemographics>, AggregateError> {
    let index = household_index(household_ids);
    let mut tallies: Vec<HouseholdTally> = household_ids
        .iter()
        .map(|_| HouseholdTally::default())
        .collect();

    let mut orphans = 0usize;
    for (row, household_id) in persons.household_ids.iter().enumerate() {
        let Some(&position) = index.get(household_id) else {
            orphans += 1;
            continue;
        };
        let tally = &mut tallies[position];
        let age = persons.ages[row];
        tally.size += 1;
        if persons.is_dependent[row] {
            tally.dependents += 1;
        }
        if persons.is_head[row] && tally.head_age.is_none() {
            tally.head_age = Some(age);
        }
        if persons.is_spouse[row] && tally.spouse_age.is_none() {
            tally.spouse_age = Some(age);
        }
    }

    if orphans > 0 {
        warn!(orphans, "ignoring persons linked to households outside the population");
    }

    let mut missing_heads = 0usize;
    let summaries = household_ids
        .iter()
        .zip(tallies)
        .map(|(household_id, tally)| {
            if tally.size == 0 {
                return Err(AggregateError::DemographicIntegrity {
                    household_id: *household_id,
                });
            }
            let age_head = match tally.head_age {
                Some(age) => whole_years(age),
                None => {
                    missing_heads += 1;
                    default_head_age
                }
            };
            let age_spouse = tally.spouse_age.map(whole_years);
            Ok(HouseholdDemographics {
                household_size: tally.size,
                num_dependents: tally.dependents,
                age_head,
                age_spouse,
                is_married: age_spouse.is_some(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if missing_heads > 0 {
        debug!(
            missing_heads,
            default_head_age, "households without a flagged head use the default age"
        );
    }

    Ok(summaries)
}

fn whole_years(age: f64) -> i64 {
    age.trunc() as i64
}
