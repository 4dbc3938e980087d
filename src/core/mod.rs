mod config;
mod demographics;
mod engine;
mod error;
mod output;
mod population;
mod recorded;
mod reform;
mod results;
#[cfg(test)]
mod testing;
mod types;

pub use config::{AggregatorConfig, QuantityNames};
pub use demographics::{PersonRecords, summarize_households};
pub use engine::{
    BaselineEvaluation, HouseholdStatics, evaluate_baseline, evaluate_stack, extract_deltas,
    record_provisions, run_stacked_aggregation,
};
pub use error::AggregateError;
pub use output::{
    HOUSEHOLD_COLUMNS, OutputFormat, PROVISION_COLUMNS, households_csv, provisions_csv,
    write_tables,
};
pub use population::{EntityFrame, EntityLevel, EntityTable, PolicyEngine, snapshot_from_frame};
pub use recorded::{
    RecordedDataset, RecordedEngine, RecordedHousehold, RecordedMember, RecordedScenario,
};
pub use reform::{Reform, ReformSequence, ReformStack, ReformStep};
pub use results::{build_tables, percent_change, round_decimals, round_to_unit};
pub use types::{
    HouseholdDemographics, HouseholdId, HouseholdRow, ImpactTables, Period, ProvisionImpact,
    RunSummary, Snapshot, StepDelta, StepSummary,
};
