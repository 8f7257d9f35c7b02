use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::handlers;
use crate::middleware::jwt_auth_middleware;
use crate::state::AppState;

pub fn app(state: AppState, config: &AppConfig) -> Router {
    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        .route("/files/:key", get(handlers::files::download))
        // Protected API
        .merge(api_routes().route_layer(middleware::from_fn(jwt_auth_middleware)))
        // Global middleware
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.api.max_request_size_bytes))
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(fee_structure_routes())
        .merge(enrollment_routes())
        .merge(collection_routes())
        .merge(ledger_routes())
        .merge(expense_routes())
}

fn fee_structure_routes() -> Router<AppState> {
    use handlers::fee_structures;

    Router::new()
        .route("/api/fee-structures", get(fee_structures::list))
        .route(
            "/api/fee-structures/:class_id",
            get(fee_structures::get).put(fee_structures::put),
        )
}

fn enrollment_routes() -> Router<AppState> {
    use handlers::enrollments;

    Router::new()
        .route("/api/enrollments", get(enrollments::list).post(enrollments::assign))
        // The same segment is a record id for GET and a student id for DELETE
        .route(
            "/api/enrollments/:id",
            get(enrollments::get).delete(enrollments::remove),
        )
        .route(
            "/api/enrollments/:id/concession",
            post(enrollments::apply_concession).delete(enrollments::revoke_concession),
        )
        .route("/api/enrollments/:id/concession/proof", get(enrollments::concession_proof))
}

fn collection_routes() -> Router<AppState> {
    use handlers::collection;

    Router::new()
        .route("/api/fees/collect", post(collection::collect))
        .route("/api/fees/transactions", get(collection::list))
        .route("/api/fees/transactions/:id", get(collection::get))
        .route("/api/fees/transactions/:id/cancel", post(collection::cancel))
}

fn ledger_routes() -> Router<AppState> {
    use handlers::ledger;

    Router::new()
        .route("/api/ledger", get(ledger::list))
        .route("/api/ledger/balance", get(ledger::balance))
        .route("/api/ledger/reconcile", get(ledger::reconcile))
        .route("/api/ledger/backfill", post(ledger::backfill))
        .route("/api/ledger/:id", get(ledger::get))
        .route("/api/ledger/:id/cancel", post(ledger::cancel))
}

fn expense_routes() -> Router<AppState> {
    use handlers::expenses;

    Router::new()
        .route("/api/expenses", get(expenses::list).post(expenses::create))
        .route("/api/expenses/:id", get(expenses::get))
        .route("/api/expenses/:id/cancel", post(expenses::cancel))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if !config.security.enable_cors {
        return CorsLayer::new();
    }
    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "School Fees API",
            "version": version,
            "description": "Fee structures, enrollment, fee collection and the financial ledger",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "files": "/files/:key?expires=&signature= (signed link)",
                "fee_structures": "/api/fee-structures[/:class_id] (protected)",
                "enrollments": "/api/enrollments[/:id[/concession]] (protected)",
                "fees": "/api/fees/collect, /api/fees/transactions[/:id[/cancel]] (protected)",
                "ledger": "/api/ledger[/balance|/reconcile|/backfill|/:id[/cancel]] (protected)",
                "expenses": "/api/expenses[/:id[/cancel]] (protected)",
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": true,
                    "message": "Database unavailable",
                    "code": "SERVICE_UNAVAILABLE",
                    "data": {
                        "status": "degraded",
                        "timestamp": now
                    }
                })),
            )
        }
    }
}
