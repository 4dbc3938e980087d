use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    AggregateError, AggregatorConfig, ImpactTables, OutputFormat, Period, QuantityNames,
    RecordedEngine, Reform, ReformSequence, run_stacked_aggregation, write_tables,
};

const DEFAULT_BASELINE_LABEL: &str = "baseline";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliOutputFormat {
    Csv,
    Json,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(value: CliOutputFormat) -> Self {
        match value {
            CliOutputFormat::Csv => OutputFormat::Csv,
            CliOutputFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "reform-impact",
    about = "Per-household impact of stacked policy reforms, attributed to each provision"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the stacked analysis for each baseline and write the tables
    Run(RunArgs),
    /// Serve the aggregation over HTTP
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, help = "Recorded population dataset (JSON), loaded once at startup")]
    pub dataset: PathBuf,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, help = "Recorded population dataset (JSON)")]
    pub dataset: PathBuf,
    #[arg(
        long,
        help = "JSON object of reform name -> definition, in stacking order"
    )]
    pub reforms: PathBuf,
    #[arg(
        long = "baseline",
        value_name = "LABEL=PATH",
        help = "Baseline reform definition; repeat to run several analyses"
    )]
    pub baselines: Vec<String>,
    #[arg(long, default_value_t = 2026)]
    pub period: Period,
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
    #[arg(long, value_enum, default_value_t = CliOutputFormat::Csv)]
    pub format: CliOutputFormat,

    #[arg(
        long,
        default_value_t = 0.5,
        help = "A provision is recorded when any |change| exceeds this amount"
    )]
    pub materiality_threshold: f64,
    #[arg(long, default_value_t = 2)]
    pub provision_decimals: u32,
    #[arg(
        long,
        default_value_t = 1.0,
        help = "Household totals are rounded to the nearest multiple of this unit"
    )]
    pub total_rounding_unit: f64,
    #[arg(long, default_value_t = 2)]
    pub percent_decimals: u32,
    #[arg(long, default_value_t = 2)]
    pub weight_decimals: u32,
    #[arg(
        long,
        default_value_t = 40,
        help = "Head age used when a household has no flagged head"
    )]
    pub default_head_age: i64,

    #[arg(
        long = "benefit-quantity",
        help = "Benefit component to sum into total benefits; repeat to replace the defaults"
    )]
    pub benefit_quantities: Vec<String>,
    #[arg(long)]
    pub income_tax_quantity: Option<String>,
    #[arg(long)]
    pub net_income_quantity: Option<String>,
    #[arg(long)]
    pub market_income_quantity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct AggregatePayload {
    baseline: Option<Value>,
    reforms: Option<Map<String, Value>>,
    period: Option<Period>,

    materiality_threshold: Option<f64>,
    provision_decimals: Option<u32>,
    total_rounding_unit: Option<f64>,
    percent_decimals: Option<u32>,
    weight_decimals: Option<u32>,
    default_head_age: Option<i64>,
    benefit_quantities: Option<Vec<String>>,
    income_tax_quantity: Option<String>,
    net_income_quantity: Option<String>,
    market_income_quantity: Option<String>,
}

#[derive(Debug)]
struct AggregateRequest {
    baseline: Reform,
    sequence: ReformSequence,
    period: Period,
    config: AggregatorConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateResponse {
    period: Period,
    reforms: Vec<String>,
    #[serde(flatten)]
    tables: ImpactTables,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_config(args: &RunArgs) -> Result<AggregatorConfig, String> {
    if !args.materiality_threshold.is_finite() || args.materiality_threshold < 0.0 {
        return Err("--materiality-threshold must be >= 0".to_string());
    }

    if !args.total_rounding_unit.is_finite() || args.total_rounding_unit <= 0.0 {
        return Err("--total-rounding-unit must be > 0".to_string());
    }

    if args.total_rounding_unit < 1.0 || args.total_rounding_unit.fract() != 0.0 {
        return Err("--total-rounding-unit must be a whole number >= 1".to_string());
    }

    if args.default_head_age < 0 {
        return Err("--default-head-age must be >= 0".to_string());
    }

    let defaults = QuantityNames::default();
    let quantities = QuantityNames {
        income_tax: args
            .income_tax_quantity
            .clone()
            .unwrap_or(defaults.income_tax),
        net_income: args
            .net_income_quantity
            .clone()
            .unwrap_or(defaults.net_income),
        benefits: if args.benefit_quantities.is_empty() {
            defaults.benefits
        } else {
            args.benefit_quantities.clone()
        },
        market_income: args
            .market_income_quantity
            .clone()
            .unwrap_or(defaults.market_income),
        ..defaults
    };

    let config = AggregatorConfig {
        materiality_threshold: args.materiality_threshold,
        provision_decimals: args.provision_decimals,
        total_rounding_unit: args.total_rounding_unit,
        percent_decimals: args.percent_decimals,
        weight_decimals: args.weight_decimals,
        default_head_age: args.default_head_age,
        quantities,
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Parses `LABEL=PATH`. The label names output files, so it is restricted to
/// ASCII letters, digits, `_` and `-`.
fn parse_baseline_arg(raw: &str) -> Result<(String, PathBuf), String> {
    let (label, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("--baseline '{raw}' must be LABEL=PATH"))?;
    let label = label.trim();
    if label.is_empty() {
        return Err(format!("--baseline '{raw}' has an empty label"));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!(
            "--baseline label '{label}' may only contain letters, digits, '_' and '-'"
        ));
    }
    if path.trim().is_empty() {
        return Err(format!("--baseline '{raw}' has an empty path"));
    }
    Ok((label.to_string(), PathBuf::from(path.trim())))
}

fn parse_baselines(raw: &[String]) -> Result<Vec<(String, Option<PathBuf>)>, String> {
    if raw.is_empty() {
        return Ok(vec![(DEFAULT_BASELINE_LABEL.to_string(), None)]);
    }

    let mut seen = HashSet::new();
    let mut baselines = Vec::with_capacity(raw.len());
    for arg in raw {
        let (label, path) = parse_baseline_arg(arg)?;
        if !seen.insert(label.clone()) {
            return Err(format!("--baseline label '{label}' is given more than once"));
        }
        baselines.push((label, Some(path)));
    }
    Ok(baselines)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {what} file {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("invalid {what} file {}: {e}", path.display()))
}

fn load_reform_sequence(path: &Path) -> Result<ReformSequence, String> {
    let definitions: Map<String, Value> = read_json(path, "reforms")?;
    ReformSequence::from_definitions(definitions).map_err(|e| e.to_string())
}

fn load_reform(path: &Path) -> Result<Reform, String> {
    read_json(path, "baseline")
}

/// Runs one analysis per baseline and writes the tables once every analysis has
/// succeeded. Returns the paths written.
pub fn run_analyses(args: &RunArgs) -> Result<Vec<PathBuf>, String> {
    let config = build_config(args)?;
    let baselines = parse_baselines(&args.baselines)?;
    let sequence = load_reform_sequence(&args.reforms)?;
    let engine = RecordedEngine::open(&args.dataset).map_err(|e| e.to_string())?;

    let mut analyses = Vec::with_capacity(baselines.len());
    for (label, path) in baselines {
        let baseline = match &path {
            Some(path) => load_reform(path)?,
            None => Reform::default(),
        };
        info!(baseline = %label, "running stacked analysis");
        let tables = run_stacked_aggregation(&engine, &baseline, &sequence, args.period, &config)
            .map_err(|e| format!("analysis '{label}' failed: {e}"))?;
        analyses.push((label, tables));
    }

    let mut written = Vec::new();
    for (label, tables) in &analyses {
        let paths = write_tables(&args.out_dir, label, tables, args.format.into(), &config)
            .map_err(|e| e.to_string())?;
        for path in &paths {
            info!(path = %path.display(), "saved");
        }
        written.extend(paths);
    }
    Ok(written)
}

#[derive(Clone)]
struct ServerState {
    engine: Arc<RecordedEngine>,
}

fn app(state: ServerState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/aggregate", post(aggregate_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16, dataset: &Path) -> std::io::Result<()> {
    let path = dataset.to_path_buf();
    let engine = tokio::task::spawn_blocking(move || RecordedEngine::open(&path))
        .await
        .map_err(std::io::Error::other)?
        .map_err(std::io::Error::other)?;
    info!(
        dataset = %dataset.display(),
        scenarios = engine.dataset().scenarios.len(),
        "population dataset loaded"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "reform impact HTTP API listening");

    let state = ServerState {
        engine: Arc::new(engine),
    };
    axum::serve(listener, app(state)).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn aggregate_handler(
    State(state): State<ServerState>,
    payload: Result<Json<AggregatePayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid API JSON payload: {}", rejection.body_text()),
            );
        }
    };
    let request = match aggregate_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let engine = Arc::clone(&state.engine);
    let outcome = tokio::task::spawn_blocking(move || {
        let tables = execute_aggregate(engine.as_ref(), &request)?;
        Ok::<_, AggregateError>(AggregateResponse {
            period: request.period,
            reforms: request.sequence.names().map(str::to_string).collect(),
            tables,
        })
    })
    .await;

    match outcome {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(e)) => error_response(status_for(&e), &e.to_string()),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("aggregation task failed: {e}"),
        ),
    }
}

fn execute_aggregate(
    engine: &RecordedEngine,
    request: &AggregateRequest,
) -> Result<ImpactTables, AggregateError> {
    run_stacked_aggregation(
        engine,
        &request.baseline,
        &request.sequence,
        request.period,
        &request.config,
    )
}

fn status_for(error: &AggregateError) -> StatusCode {
    match error {
        AggregateError::InvalidSequence { .. } | AggregateError::InvalidConfig { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn aggregate_request_from_json(json: &str) -> Result<AggregateRequest, String> {
    let payload = serde_json::from_str::<AggregatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    aggregate_request_from_payload(payload)
}

fn aggregate_request_from_payload(payload: AggregatePayload) -> Result<AggregateRequest, String> {
    let mut args = default_run_args_for_api();

    let reforms = payload
        .reforms
        .ok_or_else(|| "reforms is required".to_string())?;

    if let Some(v) = payload.period {
        args.period = v;
    }
    if let Some(v) = payload.materiality_threshold {
        args.materiality_threshold = v;
    }
    if let Some(v) = payload.provision_decimals {
        args.provision_decimals = v;
    }
    if let Some(v) = payload.total_rounding_unit {
        args.total_rounding_unit = v;
    }
    if let Some(v) = payload.percent_decimals {
        args.percent_decimals = v;
    }
    if let Some(v) = payload.weight_decimals {
        args.weight_decimals = v;
    }
    if let Some(v) = payload.default_head_age {
        args.default_head_age = v;
    }
    if let Some(v) = payload.benefit_quantities {
        if v.is_empty() {
            return Err("benefitQuantities must not be empty".to_string());
        }
        args.benefit_quantities = v;
    }
    args.income_tax_quantity = payload.income_tax_quantity;
    args.net_income_quantity = payload.net_income_quantity;
    args.market_income_quantity = payload.market_income_quantity;

    let config = build_config(&args)?;
    let sequence = ReformSequence::from_definitions(reforms).map_err(|e| e.to_string())?;

    Ok(AggregateRequest {
        baseline: Reform::new(payload.baseline.unwrap_or(Value::Null)),
        sequence,
        period: args.period,
        config,
    })
}

fn default_run_args_for_api() -> RunArgs {
    RunArgs {
        dataset: PathBuf::new(),
        reforms: PathBuf::new(),
        baselines: Vec::new(),
        period: 2026,
        out_dir: PathBuf::from("."),
        format: CliOutputFormat::Json,
        materiality_threshold: 0.5,
        provision_decimals: 2,
        total_rounding_unit: 1.0,
        percent_decimals: 2,
        weight_decimals: 2,
        default_head_age: 40,
        benefit_quantities: Vec::new(),
        income_tax_quantity: None,
        net_income_quantity: None,
        market_income_quantity: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_args() -> RunArgs {
        default_run_args_for_api()
    }

    fn dataset_json() -> Value {
        json!({
            "households": [
                {"id": 1, "state_code": "MA", "household_weight": 812.25, "irs_gross_income": 61000},
                {"id": 2, "state_code": "TX", "household_weight": 90.5, "irs_gross_income": 0}
            ],
            "persons": [
                {"id": 11, "household_id": 1, "age": 44, "is_tax_unit_head": true, "is_tax_unit_spouse": false, "is_tax_unit_dependent": false},
                {"id": 12, "household_id": 1, "age": 42, "is_tax_unit_head": false, "is_tax_unit_spouse": true, "is_tax_unit_dependent": false},
                {"id": 13, "household_id": 1, "age": 9, "is_tax_unit_head": false, "is_tax_unit_spouse": false, "is_tax_unit_dependent": true},
                {"id": 21, "household_id": 2, "age": 70, "is_tax_unit_head": true, "is_tax_unit_spouse": false, "is_tax_unit_dependent": false}
            ],
            "scenarios": [
                {
                    "reform": null,
                    "households": [
                        {"id": 1, "income_tax": 5000.0, "household_net_income_including_health_benefits": 56000.0, "household_benefits": 0.0},
                        {"id": 2, "income_tax": 0.0, "household_net_income_including_health_benefits": 4000.0, "household_benefits": 4000.0}
                    ]
                },
                {
                    "reform": {"gov.irs.credits.ctc.amount": 2200},
                    "households": [
                        {"id": 1, "income_tax": 4000.0, "household_net_income_including_health_benefits": 57000.0, "household_benefits": 0.0},
                        {"id": 2, "income_tax": 0.0, "household_net_income_including_health_benefits": 4000.2, "household_benefits": 4000.2}
                    ]
                }
            ]
        })
    }

    fn write_inputs(dir: &Path) -> RunArgs {
        let dataset = dir.join("population.json");
        let reforms = dir.join("reforms.json");
        fs::write(&dataset, dataset_json().to_string()).expect("write dataset");
        fs::write(
            &reforms,
            json!({"CTC": {"gov.irs.credits.ctc.amount": 2200}}).to_string(),
        )
        .expect("write reforms");

        let mut args = sample_args();
        args.dataset = dataset;
        args.reforms = reforms;
        args.out_dir = dir.join("out");
        args.format = CliOutputFormat::Csv;
        args.benefit_quantities = vec!["household_benefits".to_string()];
        args
    }

    #[test]
    fn build_config_applies_flags_over_defaults() {
        let mut args = sample_args();
        args.materiality_threshold = 1.0;
        args.total_rounding_unit = 10.0;
        args.benefit_quantities = vec!["snap".to_string(), "ssi".to_string()];
        args.income_tax_quantity = Some("federal_income_tax".to_string());

        let config = build_config(&args).expect("valid config");
        assert_approx(config.materiality_threshold, 1.0);
        assert_approx(config.total_rounding_unit, 10.0);
        assert_eq!(config.quantities.benefits, vec!["snap", "ssi"]);
        assert_eq!(config.quantities.income_tax, "federal_income_tax");
        assert_eq!(
            config.quantities.net_income,
            QuantityNames::default().net_income
        );
    }

    #[test]
    fn build_config_defaults_match_aggregator_defaults() {
        let mut args = sample_args();
        args.format = CliOutputFormat::Csv;
        assert_eq!(
            build_config(&args).expect("valid config"),
            AggregatorConfig::default()
        );
    }

    #[test]
    fn build_config_rejects_negative_threshold() {
        let mut args = sample_args();
        args.materiality_threshold = -0.5;

        let err = build_config(&args).expect_err("must reject negative threshold");
        assert!(err.contains("--materiality-threshold"));
    }

    #[test]
    fn build_config_rejects_zero_rounding_unit() {
        let mut args = sample_args();
        args.total_rounding_unit = 0.0;

        let err = build_config(&args).expect_err("must reject zero unit");
        assert!(err.contains("--total-rounding-unit"));
    }

    #[test]
    fn build_config_rejects_fractional_rounding_unit() {
        let mut args = sample_args();
        args.total_rounding_unit = 0.5;

        let err = build_config(&args).expect_err("must reject fractional unit");
        assert!(err.contains("whole number"));
    }

    #[test]
    fn build_config_rejects_excessive_decimals() {
        let mut args = sample_args();
        args.provision_decimals = 11;

        let err = build_config(&args).expect_err("must reject 11 decimals");
        assert!(err.contains("provision decimals"));
    }

    #[test]
    fn parse_baseline_arg_splits_label_and_path() {
        let (label, path) =
            parse_baseline_arg("tcja_extension=reforms/tcja.json").expect("valid baseline");
        assert_eq!(label, "tcja_extension");
        assert_eq!(path, PathBuf::from("reforms/tcja.json"));

        assert!(parse_baseline_arg("no-separator").is_err());
        assert!(parse_baseline_arg("=path.json").is_err());
        assert!(parse_baseline_arg("label=").is_err());
        let err = parse_baseline_arg("../up=path.json").expect_err("unsafe label");
        assert!(err.contains("may only contain"));
    }

    #[test]
    fn parse_baselines_defaults_and_rejects_duplicates() {
        assert_eq!(
            parse_baselines(&[]).expect("default"),
            vec![(DEFAULT_BASELINE_LABEL.to_string(), None)]
        );

        let err = parse_baselines(&["a=x.json".to_string(), "a=y.json".to_string()])
            .expect_err("duplicate labels");
        assert!(err.contains("more than once"));
    }

    fn recorded_engine() -> RecordedEngine {
        let dataset = serde_json::from_value(dataset_json()).expect("valid dataset");
        RecordedEngine::from_dataset(dataset).expect("engine")
    }

    fn test_app() -> Router {
        app(ServerState {
            engine: Arc::new(recorded_engine()),
        })
    }

    async fn post_aggregate(body: Value) -> (StatusCode, Value) {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/aggregate")
                    .method("POST")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
            .unwrap_or_else(|err| panic!("router request failed: {err}"));
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap_or_else(|err| panic!("failed to read response body: {err}"));
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|err| panic!("response body is not JSON: {err}"));
        (status, value)
    }

    #[test]
    fn aggregate_request_from_json_parses_web_keys() {
        let json = r#"{
            "baseline": {"gov.contrib.tcja.extension": true},
            "reforms": {"Rates": {"gov.irs.rates": 1}, "CTC": {"gov.irs.ctc": 2}},
            "period": 2027,
            "materialityThreshold": 2.0,
            "totalRoundingUnit": 100.0,
            "benefitQuantities": ["household_benefits"],
            "netIncomeQuantity": "household_net_income"
        }"#;

        let request = aggregate_request_from_json(json).expect("valid payload");
        assert_eq!(request.period, 2027);
        assert_eq!(
            request.sequence.names().collect::<Vec<_>>(),
            vec!["Rates", "CTC"]
        );
        assert_eq!(
            request.baseline.definition(),
            &json!({"gov.contrib.tcja.extension": true})
        );
        assert_approx(request.config.materiality_threshold, 2.0);
        assert_approx(request.config.total_rounding_unit, 100.0);
        assert_eq!(request.config.quantities.benefits, vec!["household_benefits"]);
        assert_eq!(request.config.quantities.net_income, "household_net_income");
        assert_eq!(request.config.quantities.income_tax, "income_tax");
    }

    #[test]
    fn aggregate_request_requires_reforms() {
        let err = aggregate_request_from_json(r#"{"period": 2026}"#).expect_err("no reforms");
        assert!(err.contains("reforms"));
    }

    #[test]
    fn aggregate_request_rejects_dataset_paths() {
        let err = aggregate_request_from_json(r#"{"dataset": "/etc/passwd", "reforms": {}}"#)
            .expect_err("dataset is fixed at startup");
        assert!(err.contains("unknown field `dataset`"));
    }

    #[test]
    fn aggregate_request_rejects_blank_reform_name() {
        let err = aggregate_request_from_json(r#"{"reforms": {" ": {}}}"#)
            .expect_err("blank name");
        assert!(err.contains("reform names must not be empty"));
    }

    #[test]
    fn validation_errors_map_to_bad_request() {
        assert_eq!(
            status_for(&AggregateError::InvalidConfig {
                reason: "x".to_string()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AggregateError::IdentitySetMismatch {
                step: "CTC".to_string(),
                detail: "x".to_string()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn aggregate_response_serialization_contains_expected_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = write_inputs(dir.path());
        let request = AggregateRequest {
            baseline: Reform::default(),
            sequence: load_reform_sequence(&args.reforms).expect("reforms"),
            period: 2026,
            config: build_config(&args).expect("config"),
        };

        let tables = execute_aggregate(&recorded_engine(), &request).expect("aggregation succeeds");
        let response = AggregateResponse {
            period: request.period,
            reforms: request.sequence.names().map(str::to_string).collect(),
            tables,
        };
        let json = serde_json::to_value(&response).expect("response should serialize");
        assert_eq!(json["period"], 2026);
        assert_eq!(json["reforms"], json!(["CTC"]));
        assert_eq!(json["households"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["provisions"][0]["provision"], "CTC");
        assert_eq!(json["summary"]["affected_households"], 1);
        assert_eq!(json["steps"][0]["affected_households"], 1);
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
            .unwrap_or_else(|err| panic!("router request failed: {err}"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
    }

    #[tokio::test]
    async fn aggregate_endpoint_returns_tables_for_recorded_stack() {
        let (status, body) = post_aggregate(json!({
            "reforms": {"CTC": {"gov.irs.credits.ctc.amount": 2200}},
            "benefitQuantities": ["household_benefits"]
        }))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reforms"], json!(["CTC"]));
        assert_eq!(body["provisions"][0]["household_id"], 1);
        assert_eq!(body["households"][0]["total_change_net_income"], 1000);
    }

    #[tokio::test]
    async fn aggregate_endpoint_rejects_client_supplied_dataset_path() {
        let (status, body) = post_aggregate(json!({
            "dataset": "../../etc/passwd",
            "reforms": {"CTC": {"gov.irs.credits.ctc.amount": 2200}}
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["error"]
                .as_str()
                .is_some_and(|msg| msg.contains("dataset"))
        );
    }

    #[tokio::test]
    async fn aggregate_endpoint_maps_invalid_config_and_unrecorded_stack() {
        let (status, _) = post_aggregate(json!({
            "reforms": {"CTC": {}},
            "totalRoundingUnit": 0.5
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post_aggregate(json!({
            "reforms": {"Unrecorded": {"gov.irs.rates": 1}},
            "benefitQuantities": ["household_benefits"]
        }))
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(
            body["error"]
                .as_str()
                .is_some_and(|msg| msg.contains("baseline + Unrecorded"))
        );
    }

    #[test]
    fn run_analyses_writes_both_tables_per_baseline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = write_inputs(dir.path());

        let written = run_analyses(&args).expect("analysis succeeds");
        assert_eq!(
            written,
            vec![
                args.out_dir.join("households_baseline.csv"),
                args.out_dir.join("provisions_baseline.csv"),
            ]
        );

        let households = fs::read_to_string(&written[0]).expect("households written");
        let lines: Vec<&str> = households.lines().collect();
        assert_eq!(lines[1], "1,MA,812.25,61000,56000,1000,1.79,-1000,0,3,1,44,42,true");
        assert_eq!(lines[2], "2,TX,90.50,0,4000,0,0.00,0,0,1,0,70,,false");

        // household 2 moved by 0.2, below the threshold
        let provisions = fs::read_to_string(&written[1]).expect("provisions written");
        assert_eq!(
            provisions,
            "household_id,provision,net_income_change,tax_change,benefit_change\n\
             1,CTC,1000.00,-1000.00,0.00\n"
        );
    }

    #[test]
    fn run_analyses_writes_nothing_when_any_baseline_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut args = write_inputs(dir.path());
        let current_law = dir.path().join("current_law.json");
        let unrecorded = dir.path().join("extension.json");
        fs::write(&current_law, "null").expect("write");
        fs::write(&unrecorded, r#"{"gov.contrib.tcja.extension": true}"#).expect("write");
        args.baselines = vec![
            format!("current_law={}", current_law.display()),
            format!("tcja_extension={}", unrecorded.display()),
        ];

        let err = run_analyses(&args).expect_err("extension baseline is not recorded");
        assert!(err.contains("tcja_extension"));
        assert!(!args.out_dir.join("households_current_law.csv").exists());
    }
}
