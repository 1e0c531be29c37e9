//! Request handlers. Each one borrows the connection for the duration of a
//! synchronous store call; nothing awaits while the lock is held.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use super::{ApiError, AppState, AuthUser};
use crate::db::{list_countries, list_indicators, Country, Indicator};
use crate::export::{export_filename, series_csv_bytes};
use crate::preferences::{self, ComparisonInput, FavoriteSummary, LastSearchSummary};
use crate::query::{
    self, CompareParams, CompareRow, FilterParams, FilterRow, QueryResult, Series,
};

type ApiResult<T> = Result<T, ApiError>;

fn parse_body(payload: Result<Json<ComparisonInput>, JsonRejection>) -> ApiResult<ComparisonInput> {
    payload.map(|Json(input)| input).map_err(|e| {
        tracing::warn!(error = %e, "Rejected request body");
        ApiError::BadRequest {
            message: "Invalid JSON data".to_string(),
        }
    })
}

// ============================================================================
// Reference & query endpoints
// ============================================================================

/// GET /api/health
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /api/countries
pub async fn get_countries(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> ApiResult<Json<Vec<Country>>> {
    let conn = state.conn()?;
    Ok(Json(list_countries(&conn)?))
}

/// GET /api/indicators
pub async fn get_indicators(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> ApiResult<Json<Vec<Indicator>>> {
    let conn = state.conn()?;
    Ok(Json(list_indicators(&conn)?))
}

/// GET /api/financial-data/:country/:indicator - indicator by code or id
pub async fn get_financial_data(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path((country, indicator)): Path<(String, String)>,
) -> ApiResult<Json<Series>> {
    tracing::info!(%country, %indicator, "Fetching series");
    let conn = state.conn()?;
    let series = query::series(&conn, &country, &indicator)?;
    tracing::debug!(points = series.values.len(), "Found data points");
    Ok(Json(series))
}

/// GET /api/filter?indicator=..&countries[]=..&start_year=..&aggregation=..
pub async fn filter_data(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<QueryResult<FilterRow>>> {
    let params = FilterParams::from_pairs(&pairs)?;
    let conn = state.conn()?;
    Ok(Json(query::filter(&conn, &params)?))
}

/// GET /api/compare?indicator=..&year=..&countries[]=..
pub async fn compare_data(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<QueryResult<CompareRow>>> {
    let params = CompareParams::from_pairs(&pairs)?;
    let conn = state.conn()?;
    Ok(Json(query::compare(&conn, &params)?))
}

/// GET /export/:country/:indicator - `Date,Value` CSV attachment
pub async fn export_financial_data(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path((country, indicator)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let series = {
        let conn = state.conn()?;
        query::series(&conn, &country, &indicator)?
    };
    let body = series_csv_bytes(&series)?;
    let disposition = format!("attachment; filename=\"{}\"", export_filename(&series));

    Ok((
        [
            (CONTENT_TYPE, "text/csv".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

// ============================================================================
// Favorites
// ============================================================================

#[derive(Serialize)]
pub struct FavoritesResponse {
    pub favorites: Vec<FavoriteSummary>,
}

/// POST /favorites
pub async fn add_favorite(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ComparisonInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = parse_body(payload)?;
    let conn = state.conn()?;
    let favorite = preferences::add_favorite(&conn, user.id, &input)?;
    tracing::info!(user = %user.username, favorite_id = favorite.id, "Favorite added");
    Ok(Json(json!({
        "message": "Favorite added successfully",
        "id": favorite.id
    })))
}

/// GET /favorites
pub async fn list_favorites(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<FavoritesResponse>> {
    let conn = state.conn()?;
    let favorites = preferences::list_favorites(&conn, user.id)?;
    Ok(Json(FavoritesResponse { favorites }))
}

/// GET /favorites/:id
pub async fn load_favorite(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.conn()?;
    let favorite = preferences::get_favorite(&conn, user.id, id)?;
    Ok(Json(json!({
        "country1": favorite.country1,
        "country2": favorite.country2,
        "index": favorite.index
    })))
}

/// DELETE /favorites/:id - someone else's favorite is simply not found
pub async fn delete_favorite(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let conn = state.conn()?;
    if !preferences::delete_favorite(&conn, user.id, id)? {
        return Err(ApiError::NotFound {
            resource: "favorite",
            key: id.to_string(),
        });
    }
    Ok(Json(json!({ "message": "Favorite deleted successfully" })))
}

// ============================================================================
// Last searches
// ============================================================================

#[derive(Serialize)]
pub struct LastSearchesResponse {
    pub last_searches: Vec<LastSearchSummary>,
}

/// POST /last-searches
pub async fn add_last_search(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ComparisonInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = parse_body(payload)?;
    let mut conn = state.conn()?;
    preferences::add_last_search(&mut conn, user.id, &input)?;
    Ok(Json(json!({ "message": "Last search added successfully" })))
}

/// GET /last-searches
pub async fn list_last_searches(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<LastSearchesResponse>> {
    let conn = state.conn()?;
    let last_searches = preferences::list_last_searches(&conn, user.id)?;
    Ok(Json(LastSearchesResponse { last_searches }))
}

/// DELETE /last-searches
pub async fn clear_last_searches(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<impl IntoResponse> {
    let conn = state.conn()?;
    let deleted = preferences::clear_last_searches(&conn, user.id)?;
    tracing::info!(user = %user.username, deleted, "Cleared last searches");
    Ok(Json(json!({
        "message": "All your last searches have been deleted",
        "deleted": deleted
    })))
}
