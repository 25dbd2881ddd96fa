use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::access::{authorize, Action, Resource};
use crate::ai::{GeneratedChecksheet, Suggestion};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::routes::checksheets::{load_visible, ChecksheetView};
use crate::state::AppState;
use crate::store;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Drafts a checksheet from a free-text description. Nothing is stored; the
/// client reviews the draft and posts it to `/api/checksheets`.
pub async fn generate_checksheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<GenerateRequest>,
) -> AppResult<Json<GeneratedChecksheet>> {
    authorize(&user.principal(), Action::GenerateWithAi, &Resource::None)?;

    let prompt = payload.prompt.as_deref().map(str::trim).unwrap_or_default();
    if prompt.is_empty() {
        return Err(AppError::bad_request("Prompt is required"));
    }

    let generator = state.generator()?;
    let generated = generator
        .generate(prompt, payload.category.as_deref())
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, user_id = %user.user_id, "checksheet generation failed");
            AppError::from(err)
        })?;

    Ok(Json(generated))
}

pub async fn suggest_improvements(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(checksheet_id): Path<Uuid>,
) -> AppResult<Json<Vec<Suggestion>>> {
    let principal = user.principal();
    authorize(&principal, Action::GenerateWithAi, &Resource::None)?;
    let generator = state.generator()?;

    let view = {
        let mut conn = state.db()?;
        let checksheet = load_visible(&mut conn, checksheet_id, &principal)?;
        let checkpoints = store::load_checkpoints(&mut conn, checksheet_id)?;
        ChecksheetView::new(checksheet, checkpoints, 0)
    };
    let current = serde_json::to_value(&view)?;

    let suggestions = generator.suggest_improvements(&current).await.map_err(|err| {
        tracing::warn!(error = %err, checksheet_id = %checksheet_id, "suggestion request failed");
        AppError::from(err)
    })?;

    tracing::info!(
        checksheet_id = %checksheet_id,
        suggestions = suggestions.len(),
        "improvement suggestions produced"
    );
    Ok(Json(suggestions))
}
