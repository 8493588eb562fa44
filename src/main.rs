use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use clap::{Args, Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusHandle;
use rubric_scoring::config::AppConfig;
use rubric_scoring::error::AppError;
use rubric_scoring::scoring::{
    MissingPolicy, ScoredValue, ScoringConfig, ScoringEngine, ScoringSummary,
};
use rubric_scoring::tables::{
    write_scores_csv, write_scores_json, ResponseTable, RubricTable, TableError,
};
use rubric_scoring::telemetry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: Option<PrometheusHandle>,
    scoring: ScoringConfig,
}

#[derive(Parser, Debug)]
#[command(
    name = "Rubric Scorer",
    about = "Score long-format questionnaire responses against data-driven rubrics",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Score a response table against one or more rubric tables
    Score(ScoreArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// Long-format response CSV (subject_id, survey_name, item_id, value)
    #[arg(long)]
    responses: PathBuf,
    /// Rubric CSV; repeat to concatenate several measures
    #[arg(long = "rubric", required = true)]
    rubrics: Vec<PathBuf>,
    /// Output encoding
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
    /// Write scores to a file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
    /// Missing-value policy for mean-tagged scales
    #[arg(long, value_enum)]
    mean_missing: Option<PolicyArg>,
    /// Missing-value policy for every other aggregation tag
    #[arg(long, value_enum)]
    aggregate_missing: Option<PolicyArg>,
    /// Aggregate groups on the worker pool
    #[arg(long)]
    parallel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    Exclude,
    Propagate,
}

impl From<PolicyArg> for MissingPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Exclude => MissingPolicy::Exclude,
            PolicyArg::Propagate => MissingPolicy::Propagate,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScoreRequest {
    responses_csv: String,
    rubric_csv: Vec<String>,
    #[serde(default)]
    mean_missing: Option<MissingPolicy>,
    #[serde(default)]
    aggregate_missing: Option<MissingPolicy>,
}

#[derive(Debug, Serialize)]
struct ScoreResponse {
    summary: ScoringSummary,
    scores: Vec<ScoredValue>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Score(args) => run_score(args),
    }
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Some(prometheus_handle),
        scoring: config.scoring,
    };

    let app = router(state).layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "rubric scoring service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/scores", post(score_endpoint))
        .with_state(state)
}

fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let ScoreArgs {
        responses,
        rubrics,
        format,
        output,
        mean_missing,
        aggregate_missing,
        parallel,
    } = args;

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let mut scoring = config.scoring;
    if let Some(policy) = mean_missing {
        scoring.mean_missing = policy.into();
    }
    if let Some(policy) = aggregate_missing {
        scoring.aggregate_missing = policy.into();
    }
    scoring.parallel |= parallel;

    let responses = ResponseTable::from_path(&responses)?;
    let rubric = RubricTable::from_paths(&rubrics)?;
    info!(
        responses = responses.len(),
        rubric_rows = rubric.len(),
        rubric_files = rubrics.len(),
        "tables loaded"
    );

    let table = ScoringEngine::new(scoring).score(&responses, &rubric)?;

    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    match format {
        OutputFormat::Csv => write_scores_csv(writer, &table)?,
        OutputFormat::Json => write_scores_json(writer, &table)?,
    }

    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn score_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ScoreRequest>,
) -> Result<Json<ScoreResponse>, AppError> {
    // Parsing and aggregation are CPU-bound and may fan out onto rayon.
    let response = tokio::task::spawn_blocking(move || score_request(payload, state.scoring))
        .await
        .map_err(|err| AppError::Io(io::Error::other(err)))??;

    Ok(Json(response))
}

fn score_request(payload: ScoreRequest, defaults: ScoringConfig) -> Result<ScoreResponse, AppError> {
    let ScoreRequest {
        responses_csv,
        rubric_csv,
        mean_missing,
        aggregate_missing,
    } = payload;

    let mut scoring = defaults;
    if let Some(policy) = mean_missing {
        scoring.mean_missing = policy;
    }
    if let Some(policy) = aggregate_missing {
        scoring.aggregate_missing = policy;
    }

    let responses = ResponseTable::from_reader(Cursor::new(responses_csv.into_bytes()))?;
    let rubric = rubric_csv
        .into_iter()
        .map(|csv| RubricTable::from_reader(Cursor::new(csv.into_bytes()), ""))
        .collect::<Result<Vec<_>, TableError>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    let table = ScoringEngine::new(scoring).score(&responses, &rubric)?;

    Ok(ScoreResponse {
        summary: table.summary,
        scores: table.rows,
    })
}
