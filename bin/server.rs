// Claims Export Validator - Web Server
// Thin HTTP transport over the validation pipeline (Axum)

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use claims_validator::{
    ingest, unique_patients, BillingCode, CompanionCodeRule, ContextEntry, DailyPatientReport,
    Establishment, IngestReport, InputError, RawUpload, RequiredHeadersParams, RuleStore, Settings,
    ValidatorError,
};

/// Shared application state (read-only; each request opens its own store connection)
#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
}

/// Error body: `{ "filename": ..., "error": ... }`
#[derive(Serialize)]
struct ErrorBody {
    filename: Option<String>,
    error: String,
}

struct ApiError {
    status: StatusCode,
    filename: Option<String>,
    message: String,
}

impl ApiError {
    fn bad_request(filename: Option<String>, message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            filename,
            message: message.into(),
        }
    }

    fn internal(filename: Option<String>, message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            filename,
            message: message.into(),
        }
    }

    fn from_validator(filename: Option<String>, err: ValidatorError) -> Self {
        if err.is_client_error() {
            Self::bad_request(filename, err.to_string())
        } else {
            error!("request failed: {}", err);
            Self::internal(filename, err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            filename: self.filename,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

// ============================================================================
// Upload handling
// ============================================================================

/// Room left in the body limit for multipart boundaries and part headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Read the multipart field `file` in one shot.
async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<RawUpload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(None, format!("Could not read upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            ApiError::bad_request(filename.clone(), format!("Could not read upload: {}", e))
        })?;
        if bytes.len() > max_bytes {
            return Err(ApiError::from_validator(
                filename,
                InputError::TooLarge { max_bytes }.into(),
            ));
        }
        return Ok(RawUpload::new(bytes.to_vec(), filename));
    }

    Err(ApiError::bad_request(None, "Missing multipart field 'file'"))
}

/// Run blocking store/CPU work off the async runtime.
async fn run_blocking<T, F>(filename: Option<String>, job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ValidatorError> + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ApiError::from_validator(filename, e)),
        Err(e) => Err(ApiError::internal(filename, format!("worker failed: {}", e))),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": claims_validator::VERSION }))
}

/// POST /api/ingest - Upload a CSV and run every validation rule
async fn ingest_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IngestReport>, ApiError> {
    let upload = read_upload(multipart, state.settings.max_upload_bytes).await?;
    let filename = upload.filename.clone();
    let span = info_span!("ingest", request_id = %Uuid::new_v4(), filename = ?filename);

    let settings = state.settings.clone();
    let report = run_blocking(filename, move || {
        let _guard = span.enter();
        let (params, index) = {
            let store = RuleStore::open(&settings.database_path)?;
            (store.load_required_headers()?, store.load_companion_index()?)
        };
        ingest(&upload, &params, &index, &settings.fields)
    })
    .await?;

    info!(valid = report.valid, findings = report.errors.len(), "ingest complete");
    Ok(Json(report))
}

/// POST /api/metrics/unique-patients-by-day - Unique patients per service date
async fn unique_patients_by_day(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DailyPatientReport>, ApiError> {
    let upload = read_upload(multipart, state.settings.max_upload_bytes).await?;
    let filename = upload.filename.clone();
    let span = info_span!("metrics", request_id = %Uuid::new_v4(), filename = ?filename);

    let settings = state.settings.clone();
    let report = run_blocking(filename, move || {
        let _guard = span.enter();
        unique_patients(&upload, &settings.fields)
    })
    .await?;

    Ok(Json(report))
}

/// GET /api/rules/required-headers - Current required-headers params
async fn get_required_headers(
    State(state): State<AppState>,
) -> Result<Json<RequiredHeadersParams>, ApiError> {
    let settings = state.settings.clone();
    let params = run_blocking(None, move || {
        RuleStore::open(&settings.database_path)?.load_required_headers()
    })
    .await?;
    Ok(Json(params))
}

/// GET /api/rules/companions - All companion-code rules (active and inactive)
async fn get_companions(
    State(state): State<AppState>,
) -> Result<Json<Vec<CompanionCodeRule>>, ApiError> {
    let settings = state.settings.clone();
    let rules = run_blocking(None, move || {
        RuleStore::open(&settings.database_path)?.load_companion_rules(false)
    })
    .await?;
    Ok(Json(rules))
}

/// GET /api/codes - Billing codes
async fn get_codes(State(state): State<AppState>) -> Result<Json<Vec<BillingCode>>, ApiError> {
    let settings = state.settings.clone();
    let codes = run_blocking(None, move || RuleStore::open(&settings.database_path)?.list_codes()).await?;
    Ok(Json(codes))
}

/// GET /api/establishments - Establishments
async fn get_establishments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Establishment>>, ApiError> {
    let settings = state.settings.clone();
    let establishments = run_blocking(None, move || {
        RuleStore::open(&settings.database_path)?.list_establishments()
    })
    .await?;
    Ok(Json(establishments))
}

/// GET /api/contexts - Context elements
async fn get_contexts(State(state): State<AppState>) -> Result<Json<Vec<ContextEntry>>, ApiError> {
    let settings = state.settings.clone();
    let contexts =
        run_blocking(None, move || RuleStore::open(&settings.database_path)?.list_contexts()).await?;
    Ok(Json(contexts))
}

fn router(state: AppState) -> Router {
    let settings = state.settings.clone();

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest_upload))
        .route("/metrics/unique-patients-by-day", post(unique_patients_by_day))
        .route("/rules/required-headers", get(get_required_headers))
        .route("/rules/companions", get(get_companions))
        .route("/codes", get(get_codes))
        .route("/establishments", get(get_establishments))
        .route("/contexts", get(get_contexts))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(settings.request_timeout))
            .layer(CorsLayer::permissive())
            .layer(DefaultBodyLimit::max(settings.max_upload_bytes + MULTIPART_OVERHEAD)),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let settings = Settings::from_env().context("Invalid environment settings")?;
    info!(db = %settings.database_path.display(), "claims validator server starting");

    // Tables are created up front; a missing rule row stays a per-request error
    {
        let store = RuleStore::open(&settings.database_path)
            .with_context(|| format!("Failed to open rule store: {}", settings.database_path.display()))?;
        store.setup_database()?;
        if let Err(e) = store.load_required_headers() {
            warn!("required_headers rule not usable yet: {}", e);
        }
    }

    let addr = settings.bind_addr.clone();
    let state = AppState {
        settings: Arc::new(settings),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
