use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use super::config::AggregatorConfig;
use super::error::AggregateError;
use super::types::{HouseholdRow, ImpactTables, ProvisionImpact};

pub const HOUSEHOLD_COLUMNS: [&str; 14] = [
    "id",
    "state",
    "household_weight",
    "market_income",
    "baseline_net_income",
    "total_change_net_income",
    "pct_change_net_income",
    "total_change_tax",
    "total_change_benefits",
    "household_size",
    "num_dependents",
    "age_head",
    "age_spouse",
    "is_married",
];

pub const PROVISION_COLUMNS: [&str; 5] = [
    "household_id",
    "provision",
    "net_income_change",
    "tax_change",
    "benefit_change",
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    Csv,
    Json,
}

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn households_csv(rows: &[HouseholdRow], config: &AggregatorConfig) -> String {
    let weight = config.weight_decimals as usize;
    let pct = config.percent_decimals as usize;
    let mut out = HOUSEHOLD_COLUMNS.join(",");
    out.push('\n');
    for row in rows {
        let age_spouse = row.age_spouse.map(|age| age.to_string()).unwrap_or_default();
        // writing into a String cannot fail
        let _ = writeln!(
            out,
            "{},{},{:.weight$},{},{},{},{:.pct$},{},{},{},{},{},{},{}",
            row.id,
            csv_field(&row.state),
            row.household_weight,
            row.market_income,
            row.baseline_net_income,
            row.total_change_net_income,
            row.pct_change_net_income,
            row.total_change_tax,
            row.total_change_benefits,
            row.household_size,
            row.num_dependents,
            row.age_head,
            age_spouse,
            row.is_married,
        );
    }
    out
}

pub fn provisions_csv(records: &[ProvisionImpact], config: &AggregatorConfig) -> String {
    let dp = config.provision_decimals as usize;
    let mut out = PROVISION_COLUMNS.join(",");
    out.push('\n');
    for record in records {
        let _ = writeln!(
            out,
            "{},{},{:.dp$},{:.dp$},{:.dp$}",
            record.household_id,
            csv_field(&record.provision),
            record.net_income_change,
            record.tax_change,
            record.benefit_change,
        );
    }
    out
}

fn write_file(path: PathBuf, contents: &str) -> Result<PathBuf, AggregateError> {
    fs::write(&path, contents).map_err(|source| AggregateError::Output {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Persists one analysis. CSV yields `households_<label>.csv` and
/// `provisions_<label>.csv`; JSON yields a single `<label>.json`.
pub fn write_tables(
    out_dir: &Path,
    label: &str,
    tables: &ImpactTables,
    format: OutputFormat,
    config: &AggregatorConfig,
) -> Result<Vec<PathBuf>, AggregateError> {
    fs::create_dir_all(out_dir).map_err(|source| AggregateError::Output {
        path: out_dir.to_path_buf(),
        source,
    })?;

    match format {
        OutputFormat::Csv => Ok(vec![
            write_file(
                out_dir.join(format!("households_{label}.csv")),
                &households_csv(&tables.households, config),
            )?,
            write_file(
                out_dir.join(format!("provisions_{label}.csv")),
                &provisions_csv(&tables.provisions, config),
            )?,
        ]),
        OutputFormat::Json => {
            let path = out_dir.join(format!("{label}.json"));
            let json = serde_json::to_string_pretty(tables).map_err(|e| AggregateError::Output {
                path: path.clone(),
                source: e.into(),
            })?;
            Ok(vec![write_file(path, &json)?])
        }
    }
}
