//! HTTP surface: shared state, bearer-token identity and the router

pub mod error;
pub mod handlers;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::routing::get;
use axum::Router;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{authenticate, User};
pub use error::ApiError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    pub fn new(conn: Connection) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::internal("database mutex poisoned"))
    }
}

/// The user behind `Authorization: Bearer <token>`
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let conn = state.conn()?;
        let user = authenticate(&conn, token)?.ok_or(ApiError::Unauthorized)?;
        Ok(AuthUser(user))
    }
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/countries", get(handlers::get_countries))
        .route("/indicators", get(handlers::get_indicators))
        .route(
            "/financial-data/:country/:indicator",
            get(handlers::get_financial_data),
        )
        .route("/filter", get(handlers::filter_data))
        .route("/compare", get(handlers::compare_data));

    Router::new()
        .nest("/api", api_routes)
        .route(
            "/favorites",
            get(handlers::list_favorites).post(handlers::add_favorite),
        )
        .route(
            "/favorites/:id",
            get(handlers::load_favorite).delete(handlers::delete_favorite),
        )
        .route(
            "/last-searches",
            get(handlers::list_last_searches)
                .post(handlers::add_last_search)
                .delete(handlers::clear_last_searches),
        )
        .route(
            "/export/:country/:indicator",
            get(handlers::export_financial_data),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
