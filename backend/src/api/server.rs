//! HTTP server for the step engine.
//!
//! Workflows are not stored: every request carries the steps or workflow it
//! is about. Entity definitions are loaded once from the registry directory
//! and entities live in an in-memory store for the lifetime of the process.
//!
//! # API Endpoints
//!
//! | Method | Path                       | Description                          |
//! |--------|----------------------------|--------------------------------------|
//! | GET    | `/health`                  | Health check                         |
//! | POST   | `/api/validate`            | Validate steps or a workflow         |
//! | POST   | `/api/run`                 | Run a workflow                       |
//! | POST   | `/api/run/upload`          | Run a workflow on an uploaded file   |
//! | GET    | `/api/shapes`              | Step parts with a shape preview      |
//! | GET    | `/api/shapes/{step_type}`  | JSON Schema of one step part         |
//! | GET    | `/api/entities`            | Registered entity definitions        |
//! | GET    | `/api/logs`                | SSE stream for real-time logs        |
//! | GET    | `/downloads/{file}`        | Saved download outputs               |

use axum::{
    extract::{Multipart, Path, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use super::logs::{log_error, log_info, LOG_BROADCASTER};
use super::types::{error_response, rejected_response, RunRequestBody, RunResponse, ValidateRequest};
use crate::config::EngineConfig;
use crate::dsl::{preview_step_shape, STEP_TYPES};
use crate::error::{PipelineError, ServerError};
use crate::parser::{decode_content, detect_encoding, encoding_for_label};
use crate::pipeline::{Pipeline, RunRequest, RunTrigger};
use crate::registry::RegistrySnapshot;
use crate::source::ApiPayload;
use crate::store::MemoryStore;
use crate::validation::{decode_workflow, validate, validate_raw, validate_workflow_value, ValidationReport};

const DOWNLOAD_PREFIX: &str = "/downloads";

type ApiError = (StatusCode, Json<Value>);

/// Shared server state.
pub struct AppState {
    pub registry: Arc<RegistrySnapshot>,
    pub store: MemoryStore,
    pub config: EngineConfig,
}

impl AppState {
    pub fn new(registry: RegistrySnapshot, config: EngineConfig) -> Self {
        let registry = Arc::new(registry);
        Self {
            store: MemoryStore::new(registry.clone()),
            registry,
            config,
        }
    }
}

impl From<ServerError> for ApiError {
    fn from(e: ServerError) -> Self {
        let status = match &e {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(PipelineError::Disabled(_)) => StatusCode::CONFLICT,
            ServerError::Pipeline(PipelineError::Rejected(_))
            | ServerError::Pipeline(PipelineError::InvalidWorkflow(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Pipeline(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(error_response(&e.to_string())))
    }
}

/// Build the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    let downloads = ServeDir::new(&state.config.output_dir);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/validate", post(validate_steps))
        .route("/api/run", post(run_workflow))
        .route("/api/run/upload", post(run_upload))
        .route("/api/shapes", get(list_shapes))
        .route("/api/shapes/{step_type}", get(step_shape))
        .route("/api/entities", get(list_entities))
        .route("/api/logs", get(sse_logs))
        .nest_service(DOWNLOAD_PREFIX, downloads)
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = RegistrySnapshot::with_dir(&config.registry_dir);
    let port = config.port;
    println!(
        "📚 {} entity definition(s) from {}",
        registry.len(),
        config.registry_dir.display()
    );

    let app = router(Arc::new(AppState::new(registry, config)));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 Stepflow server running on http://localhost:{}", port);
    println!("   POST /api/validate      - Validate steps or a workflow");
    println!("   POST /api/run           - Run a workflow");
    println!("   POST /api/run/upload    - Run a workflow on an uploaded file");
    println!("   GET  /api/shapes/{{type}} - Step part schema");
    println!("   GET  /api/logs          - SSE log stream");
    println!("   GET  /health            - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "stepflow",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "validate": "POST /api/validate",
            "run": "POST /api/run",
            "upload": "POST /api/run/upload",
            "shapes": "GET /api/shapes/{step_type}",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    // Lagged receivers skip the entries they missed
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn validate_steps(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<ValidationReport>, ApiError> {
    let report = match (&body.workflow, &body.steps) {
        (Some(workflow), _) => validate_workflow_value(workflow, state.registry.as_ref()),
        (None, Some(steps)) => validate_raw(steps, state.registry.as_ref()),
        (None, None) => {
            return Err(ServerError::BadRequest("Provide 'steps' or 'workflow'".into()).into())
        }
    };
    Ok(Json(report))
}

async fn run_workflow(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunRequestBody>,
) -> Result<Json<RunResponse>, ApiError> {
    let payload = body.payload.map(ApiPayload::from_value);
    execute(&state, &body.workflow, body.trigger, payload).await
}

/// Multipart run: a `workflow` JSON field and a `file` field used as the payload.
async fn run_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<RunResponse>, ApiError> {
    let mut workflow: Option<Value> = None;
    let mut file_data: Option<Vec<u8>> = None;
    let mut trigger = RunTrigger::Manual;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "workflow" => {
                let text = field.text().await.map_err(|e| bad_request(format!("Read error: {}", e)))?;
                workflow = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| bad_request(format!("Invalid workflow JSON: {}", e)))?,
                );
            }
            "file" => {
                let bytes = field.bytes().await.map_err(|e| bad_request(format!("Read error: {}", e)))?;
                file_data = Some(bytes.to_vec());
            }
            "trigger" => {
                let text = field.text().await.map_err(|e| bad_request(format!("Read error: {}", e)))?;
                trigger = text.parse().map_err(bad_request)?;
            }
            _ => {}
        }
    }

    let workflow = workflow.ok_or_else(|| bad_request("No workflow provided".into()))?;
    let bytes = file_data.ok_or_else(|| bad_request("No file provided".into()))?;

    let encoding = encoding_for_label(&detect_encoding(&bytes)).unwrap_or(encoding_rs::UTF_8);
    let payload = ApiPayload::Text(decode_content(&bytes, encoding));
    log_info(format!("📄 Upload of {} bytes ({})", bytes.len(), encoding.name()));

    execute(&state, &workflow, trigger, Some(payload)).await
}

async fn execute(
    state: &AppState,
    raw: &Value,
    trigger: RunTrigger,
    payload: Option<ApiPayload>,
) -> Result<Json<RunResponse>, ApiError> {
    let workflow = decode_workflow(raw)
        .map_err(|e| ApiError::from(ServerError::Pipeline(PipelineError::InvalidWorkflow(e.to_string()))))?;

    if let Err(violations) = validate(&workflow.config.steps, state.registry.as_ref()) {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, Json(rejected_response(&violations))));
    }

    let mut request = RunRequest::new(trigger);
    if let Some(payload) = payload {
        request = request.with_payload(payload);
    }

    let result = Pipeline::new(state.registry.as_ref(), &state.store)
        .with_config(&state.config)
        .save_downloads_to(state.config.output_dir.clone())
        .run(&workflow, request)
        .await
        .map_err(|e| {
            log_error(format!("Run of '{}' aborted: {}", workflow.name, e));
            ApiError::from(ServerError::Pipeline(e))
        })?;

    Ok(Json(RunResponse::new(result, DOWNLOAD_PREFIX)))
}

async fn list_shapes() -> Json<Value> {
    Json(json!({ "step_types": STEP_TYPES }))
}

async fn step_shape(Path(step_type): Path<String>) -> Result<Json<Value>, ApiError> {
    preview_step_shape(&step_type).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(error_response(&format!(
                "Unknown step type '{}'; expected one of: {}",
                step_type,
                STEP_TYPES.join(", ")
            ))),
        )
    })
}

async fn list_entities(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "entities": state.registry.list() }))
}

fn bad_request(message: String) -> ApiError {
    ServerError::BadRequest(message).into()
}
