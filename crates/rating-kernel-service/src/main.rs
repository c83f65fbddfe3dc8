use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use rating_kernel_api::{CompareRequest, CompareResponse, ScoreApi, API_CONTRACT_VERSION};
use rating_kernel_core::KernelError;
use rating_kernel_ingest::load_ratings;
use serde::{Deserialize, Serialize};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const SESSION_COOKIE: &str = "voter_id";

#[derive(Debug, Clone)]
struct ServiceState {
    api: ScoreApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceErrorBody {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone)]
struct ServiceError {
    status: StatusCode,
    body: ServiceErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct CompareBody {
    left: String,
    right: String,
}

#[derive(Debug, Clone, Serialize)]
struct SessionResponse {
    session_token: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "rating-kernel-service")]
#[command(about = "Local HTTP service for the rating similarity kernel")]
struct Args {
    #[arg(long, default_value = "./ratings.csv")]
    ratings: PathBuf,
    #[arg(long, default_value = "./score_queue.sqlite3")]
    queue_db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ServiceErrorBody {
                service_contract_version: SERVICE_CONTRACT_VERSION,
                error: message.into(),
            },
        }
    }
}

impl From<KernelError> for ServiceError {
    fn from(err: KernelError) -> Self {
        let status = match err {
            KernelError::EntityNotFound { .. } => StatusCode::NOT_FOUND,
            KernelError::InsufficientOverlap => StatusCode::UNPROCESSABLE_ENTITY,
            KernelError::SinkWrite(_) | KernelError::Serialize(_) => StatusCode::BAD_GATEWAY,
            KernelError::DataLoad(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn cookie_session_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?.to_str().ok()?;
    header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

fn with_session_cookie<T>(token: &str, payload: ServiceEnvelope<T>) -> Response
where
    T: Serialize,
{
    (
        StatusCode::OK,
        [(SET_COOKIE, format!("{SESSION_COOKIE}={token}; Path=/"))],
        Json(payload),
    )
        .into_response()
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/session", get(session))
        .route("/v1/compare", post(compare))
        .with_state(state)
}

fn init_tracing() -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing()?;

    // Refuse to serve without a dataset: load failures abort before binding.
    let (store, summary) = load_ratings(&args.ratings)?;
    tracing::info!(
        entities = summary.entities,
        ratings = summary.ratings,
        skipped_rows = summary.skipped_rows,
        digest = %summary.content_digest,
        "rating dataset loaded"
    );

    let state = ServiceState { api: ScoreApi::new(Arc::new(store), args.queue_db) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "serving");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn session(State(state): State<ServiceState>, headers: HeaderMap) -> Response {
    let token = state.api.session(cookie_session_token(&headers).as_deref());
    with_session_cookie(&token, envelope(SessionResponse { session_token: token.clone() }))
}

async fn compare(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(body): Json<CompareBody>,
) -> Result<Response, ServiceError> {
    let request = CompareRequest {
        left: body.left,
        right: body.right,
        session_token: cookie_session_token(&headers),
    };
    let response: CompareResponse = state.api.compare(&request)?;
    let token = response.session_token.clone();
    Ok(with_session_cookie(&token, envelope(response)))
}
