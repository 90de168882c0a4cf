//! REST API for microsearch.
//!
//! Exposes the active similarity index to the web layer. The index lives in
//! a shared [`SearchService`] handed to every handler through `web::Data`.
//!
//! ## Endpoints
//!
//! - `GET /health` - Index readiness, version and size
//! - `GET /visual_query/{entry_id}?n=16` - Items most similar to an entry
//! - `POST /search` - Batch of similarity queries
//! - `POST /admin/rebuild` - Rebuild the index from the configured container
//!
//! ## Usage
//!
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use microsearch::{Config, server::AppState};
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let state = web::Data::new(AppState::new(Config::default()));
//!     HttpServer::new(move || App::new().app_data(state.clone()).configure(microsearch::server::config))
//!         .bind("0.0.0.0:7878")?
//!         .run()
//!         .await
//! }
//! ```

use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use serde::{Serialize, Deserialize};
use crate::{Config, SearchError, SearchService};
use tracing::{info, warn};

/// Shared state of the HTTP handlers.
pub struct AppState {
    pub service: SearchService,
    pub config: Config,
}

impl AppState {
    /// State with an empty service; call [`SearchService::rebuild`] or
    /// `POST /admin/rebuild` before querying.
    pub fn new(config: Config) -> Self {
        AppState { service: SearchService::new(), config }
    }

    pub fn with_service(service: SearchService, config: Config) -> Self {
        AppState { service, config }
    }
}

// --- Request structs ---

#[derive(Deserialize)]
struct VisualQueryParams {
    n: Option<usize>,
}

#[derive(Deserialize)]
struct Query {
    id: i64,
    n: Option<usize>,
}

#[derive(Deserialize)]
struct SearchRequest {
    queries: Vec<Query>,
}

// --- Response structs ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: u64,
    items: usize,
}

#[derive(Serialize)]
struct VisualQueryResponse {
    query: i64,
    scores: Vec<String>,
    results: Vec<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultGroup>,
}

#[derive(Serialize)]
struct SearchResultGroup {
    query: i64,
    matches: Vec<MatchResult>,
    message: String,
}

#[derive(Serialize)]
struct MatchResult {
    id: i64,
    score: String,
    distance: f32,
}

#[derive(Serialize)]
struct RebuildResponse {
    version: u64,
    items: usize,
}

/// Load and build failures are server faults; the rest concern one request.
fn status_for(error: &SearchError) -> StatusCode {
    if !error.is_recoverable() {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    match error {
        SearchError::UnknownIdentifier(_) => StatusCode::NOT_FOUND,
        SearchError::IndexNotReady => StatusCode::SERVICE_UNAVAILABLE,
        SearchError::BuildInProgress => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn error_response(error: &SearchError) -> HttpResponse {
    HttpResponse::build(status_for(error)).json(serde_json::json!({"error": error.to_string()}))
}

// --- Handlers ---

async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    let body = match state.service.snapshot() {
        Ok(snapshot) => HealthResponse { status: "ok", version: snapshot.version, items: snapshot.index.len() },
        Err(_) => HealthResponse { status: "building", version: 0, items: 0 },
    };

    HttpResponse::Ok().json(body)
}

async fn visual_query_handler(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    params: web::Query<VisualQueryParams>,
) -> impl Responder {
    let entry_id = path.into_inner();
    let n = params.n.unwrap_or(state.config.default_results);

    match state.service.query(entry_id, n) {
        Ok(matches) => {
            let (scores, results) = matches.into_iter().map(|m| (m.score, m.id)).unzip();
            HttpResponse::Ok().json(VisualQueryResponse { query: entry_id, scores, results })
        }
        Err(e) => error_response(&e),
    }
}

async fn search_handler(state: web::Data<AppState>, body: web::Json<SearchRequest>) -> impl Responder {
    // One snapshot for the whole batch
    let snapshot = match state.service.snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(&e),
    };

    let mut results = Vec::new();

    for entry in &body.queries {
        let n = entry.n.unwrap_or(state.config.default_results);
        match snapshot.index.query(entry.id, n) {
            Ok(res) => {
                results.push(SearchResultGroup {
                    query: entry.id,
                    matches: res.into_iter()
                        .map(|m| MatchResult { id: m.id, score: m.score, distance: m.distance })
                        .collect(),
                    message: "Search Success".to_string(),
                });
            }
            Err(e) => {
                results.push(SearchResultGroup {
                    query: entry.id,
                    matches: Vec::new(),
                    message: e.to_string(),
                });
            }
        }
    }

    HttpResponse::Ok().json(SearchResponse { results })
}

async fn rebuild_handler(state: web::Data<AppState>) -> impl Responder {
    let spec = state.config.build_spec();
    let worker_state = state.clone();

    // Fitting the projection is CPU-bound; keep it off the async workers
    let outcome = web::block(move || worker_state.service.rebuild(&spec)).await;

    match outcome {
        Ok(Ok(version)) => {
            let items = state.service.snapshot().map(|s| s.index.len()).unwrap_or(0);
            info!(version, items, "rebuild requested over HTTP succeeded");
            HttpResponse::Ok().json(RebuildResponse { version, items })
        }
        Ok(Err(e)) => {
            warn!(error = %e, "rebuild requested over HTTP failed");
            error_response(&e)
        }
        Err(e) => HttpResponse::InternalServerError().json(serde_json::json!({"error": e.to_string()})),
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_handler)))
       .service(web::resource("/visual_query/{entry_id}").route(web::get().to(visual_query_handler)))
       .service(web::resource("/search").route(web::post().to(search_handler)))
       .service(web::resource("/admin/rebuild").route(web::post().to(rebuild_handler)));
}
