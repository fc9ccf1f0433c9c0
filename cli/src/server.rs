use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use canteen_core::models::{
    AvailableDate, MenuItemWithContext, MenuQueryResult, QUERY_MEAL_TYPES, SearchOptions,
    StoredMenuData, validate_meal_type,
};
use canteen_core::registry::{StoreRegistry, validate_week_key};
use canteen_core::store::WeekStore;
use canteen_core::week::{format_date, parse_date, week_range};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
struct AppState {
    registry: Arc<StoreRegistry>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct MealQuery {
    meal: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchQuery {
    q: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    meal: Option<String>,
    dietary: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    items: Vec<MenuItemWithContext>,
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_meal_types: Option<&'static [&'static str]>,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    InvalidMealType,
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, valid_meal_types) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::InvalidMealType => (
                StatusCode::BAD_REQUEST,
                "Invalid meal type".to_string(),
                Some(QUERY_MEAL_TYPES),
            ),
            Self::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: message,
                valid_meal_types,
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn bad_date(date: &str) -> ApiError {
    ApiError::BadRequest(format!("Invalid date '{date}'. Use YYYY-MM-DD"))
}

fn checked_key(name: &str) -> Result<(), ApiError> {
    validate_week_key(name).map_err(|e| ApiError::BadRequest(format!("{e}")))
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    response
}

// --- Handlers ---

async fn menu_usage() -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "Menu week key is required",
            "examples": {
                "directAccess": "/menu/london-2026-01-12-2026-01-16",
                "queryByDate": "/menu/query/london/2026-01-14?meal=lunch",
                "search": "/menu/search/london?q=soup&dietary=Vegan",
                "availableDates": "/menu/dates/london-2026-01-12-2026-01-16",
            },
        })),
    )
}

async fn query_menu(
    State(state): State<AppState>,
    Path((location, date)): Path<(String, String)>,
    Query(params): Query<MealQuery>,
) -> Result<Json<Vec<MenuQueryResult>>, ApiError> {
    let meal_type = match params.meal.as_deref().filter(|m| !m.is_empty()) {
        Some(meal) => Some(validate_meal_type(meal).map_err(|_| ApiError::InvalidMealType)?),
        None => None,
    };
    let day = parse_date(&date).map_err(|_| bad_date(&date))?;
    let date = format_date(day);

    let key = week_range(day, &location).week_key;
    checked_key(&key)?;

    let results = state
        .registry
        .with_store(&key, |store| store.get_menu_by_date(&date, meal_type))
        .context("database error")?;

    if results.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No menu found for {location} on {date}"
        )));
    }
    Ok(Json(results))
}

async fn search_menu(
    State(state): State<AppState>,
    Path(location): Path<String>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let non_empty = |s: Option<String>| s.filter(|v| !v.is_empty());
    let checked_date =
        |s: Option<String>| non_empty(s).map(|d| parse_date(&d).map_err(|_| bad_date(&d)));
    let start = checked_date(params.start_date).transpose()?;
    let end = checked_date(params.end_date).transpose()?;

    let meal_type = match non_empty(params.meal) {
        Some(meal) => Some(validate_meal_type(&meal).map_err(|_| ApiError::InvalidMealType)?),
        None => None,
    };
    let anchor = start.unwrap_or_else(|| chrono::Local::now().date_naive());
    let key = week_range(anchor, &location).week_key;
    checked_key(&key)?;

    // Index dates are zero-padded, so bounds are compared in the same form.
    let options = SearchOptions {
        start_date: start.map(format_date),
        end_date: end.map(format_date),
        meal_type,
        dietary_label: non_empty(params.dietary),
    };
    let query = params.q.unwrap_or_default();
    let items = state
        .registry
        .with_store(&key, |store| {
            let options = store.with_stored_bounds(options)?;
            store.search_menu_items(&query, &options)
        })
        .context("search failed")?;

    if items.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No menu items found for {location}"
        )));
    }
    let count = items.len();
    Ok(Json(SearchResponse { items, count }))
}

async fn available_dates(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<AvailableDate>>, ApiError> {
    checked_key(&name)?;
    let dates = state
        .registry
        .with_store(&name, WeekStore::get_available_dates)
        .context("database error")?;
    if dates.is_empty() {
        return Err(ApiError::NotFound(format!("No dates indexed for {name}")));
    }
    Ok(Json(dates))
}

async fn stored_menu(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StoredMenuData>, ApiError> {
    checked_key(&name)?;
    let data = state
        .registry
        .with_store(&name, WeekStore::get_stored_data)
        .context("database error")?;
    data.map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No menu stored for {name}")))
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/menu", get(menu_usage))
        .route("/menu/query/{location}/{date}", get(query_menu))
        .route("/menu/search/{location}", get(search_menu))
        .route("/menu/dates/{name}", get(available_dates))
        .route("/menu/{name}", get(stored_menu))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

fn spawn_expiry_sweep(registry: Arc<StoreRegistry>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let registry = Arc::clone(&registry);
            match tokio::task::spawn_blocking(move || registry.sweep_expired(Utc::now())).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %format!("{e:#}"), "expiry sweep failed"),
                Err(e) => warn!(error = %e, "expiry sweep task panicked"),
            }
        }
    });
}

pub async fn start_server(registry: StoreRegistry, port: u16, bind: &str) -> anyhow::Result<()> {
    let registry = Arc::new(registry);
    spawn_expiry_sweep(Arc::clone(&registry));

    let app = build_router(AppState { registry });

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;
    info!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
