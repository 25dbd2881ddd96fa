use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    state::AppState,
};

pub mod ai;
pub mod auth;
pub mod checksheets;
pub mod health;
pub mod reports;
pub mod results;
pub mod search;
pub mod templates;
pub mod uploads;
pub mod users;

/// `?confirm=true`, required by destructive endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirm: bool,
}

impl ConfirmQuery {
    pub fn require(&self) -> AppResult<()> {
        if self.confirm {
            Ok(())
        } else {
            Err(AppError::bad_request(
                "deletion must be confirmed with ?confirm=true",
            ))
        }
    }
}

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let checksheet_routes = Router::new()
        .route(
            "/",
            get(checksheets::list_checksheets).post(checksheets::create_checksheet),
        )
        .route(
            "/:id",
            get(checksheets::get_checksheet)
                .patch(checksheets::update_checksheet)
                .delete(checksheets::delete_checksheet),
        )
        .route("/:id/duplicate", post(checksheets::duplicate_checksheet));

    let result_routes = Router::new()
        .route("/", get(results::list_results).post(results::create_result))
        .route(
            "/:id",
            get(results::get_result)
                .patch(results::update_result)
                .delete(results::delete_result),
        );

    let template_routes = Router::new()
        .route(
            "/",
            get(templates::list_templates).post(templates::create_template),
        )
        .route("/:id/clone", post(templates::clone_template));

    let ai_routes = Router::new()
        .route("/generate", post(ai::generate_checksheet))
        .route("/suggest/:checksheet_id", post(ai::suggest_improvements));

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            patch(users::update_user).delete(users::delete_user),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/checksheets", checksheet_routes)
        .nest("/api/results", result_routes)
        .nest("/api/templates", template_routes)
        .nest("/api/ai", ai_routes)
        .nest("/api/users", user_routes)
        .route("/api/profile", patch(users::update_profile))
        .route("/api/upload", post(uploads::upload_asset))
        .route("/api/search", get(search::search))
        .route("/api/reports", get(reports::reports))
        .route("/api/dashboard", get(reports::dashboard))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    let upload_limit = state.config.upload_max_bytes;

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(upload_limit))
}
