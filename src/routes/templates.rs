use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access::{authorize, Action, Resource};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{BestPracticeTemplate, NewBestPracticeTemplate};
use crate::routes::checksheets::ChecksheetView;
use crate::schema::best_practice_templates;
use crate::state::AppState;
use crate::store::{self, TemplateData, MAX_LABEL_CHARS, MAX_TITLE_CHARS};

#[derive(Debug, Clone, Serialize)]
pub struct TemplateView {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub industry: Option<String>,
    pub template_data: Value,
    pub checkpoint_count: usize,
    pub is_public: bool,
    pub usage_count: i32,
    pub created_at: NaiveDateTime,
}

impl From<BestPracticeTemplate> for TemplateView {
    fn from(template: BestPracticeTemplate) -> Self {
        let checkpoint_count = TemplateData::parse(&template.template_data)
            .map(|data| data.checkpoints.len())
            .unwrap_or(0);
        Self {
            id: template.id,
            title: template.title,
            description: template.description,
            category: template.category,
            industry: template.industry,
            template_data: template.template_data,
            checkpoint_count,
            is_public: template.is_public,
            usage_count: template.usage_count,
            created_at: template.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTemplatesQuery {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub industry: Option<String>,
    #[serde(default, alias = "templateData")]
    pub template_data: Value,
    #[serde(default = "default_public", alias = "isPublic")]
    pub is_public: bool,
}

fn default_public() -> bool {
    true
}

/// The public catalog, most used first.
pub async fn list_templates(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<ListTemplatesQuery>,
) -> AppResult<Json<Vec<TemplateView>>> {
    let mut conn = state.db()?;

    let mut listing = best_practice_templates::table
        .filter(best_practice_templates::is_public.eq(true))
        .into_boxed();
    if let Some(category) = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        listing = listing.filter(best_practice_templates::category.eq(category.to_string()));
    }

    let rows: Vec<BestPracticeTemplate> = listing
        .order((
            best_practice_templates::usage_count.desc(),
            best_practice_templates::title.asc(),
        ))
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(TemplateView::from).collect()))
}

pub async fn create_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<TemplateView>)> {
    authorize(&user.principal(), Action::ManageTemplates, &Resource::None)?;

    let mut errors = Vec::new();
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        errors.push(FieldError::new("title", "title is required"));
    }
    let category = payload.category.trim().to_string();
    if category.is_empty() {
        errors.push(FieldError::new("category", "category is required"));
    }
    let industry = payload
        .industry
        .map(|industry| industry.trim().to_string())
        .filter(|industry| !industry.is_empty());
    errors.extend(FieldError::check_length("title", Some(&title), MAX_TITLE_CHARS));
    errors.extend(FieldError::check_length("category", Some(&category), MAX_LABEL_CHARS));
    errors.extend(FieldError::check_length("industry", industry.as_deref(), MAX_LABEL_CHARS));
    match TemplateData::parse(&payload.template_data).and_then(|data| data.drafts()) {
        Ok(drafts) => {
            for (index, draft) in drafts.iter().enumerate() {
                let prefix = format!("template_data.checkpoints[{index}]");
                if draft.title.is_empty() {
                    errors.push(FieldError::new(format!("{prefix}.title"), "title is required"));
                }
                errors.extend(store::checkpoint_length_errors(
                    &prefix,
                    &draft.title,
                    draft.section.as_deref(),
                ));
            }
        }
        Err(message) => errors.push(FieldError::new("template_data", message)),
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let template_data = match payload.template_data {
        Value::Null => serde_json::json!({ "checkpoints": [] }),
        other => other,
    };
    let new_template = NewBestPracticeTemplate {
        id: Uuid::new_v4(),
        title,
        description: payload
            .description
            .map(|description| description.trim().to_string())
            .filter(|description| !description.is_empty()),
        category,
        industry,
        template_data,
        is_public: payload.is_public,
    };

    let mut conn = state.db()?;
    diesel::insert_into(best_practice_templates::table)
        .values(&new_template)
        .execute(&mut conn)?;
    let created: BestPracticeTemplate = best_practice_templates::table
        .find(new_template.id)
        .first(&mut conn)?;

    tracing::info!(template_id = %created.id, created_by = %user.user_id, "template created");
    Ok((StatusCode::CREATED, Json(TemplateView::from(created))))
}

/// Instantiates a catalog entry as a new draft checksheet of the caller.
pub async fn clone_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(template_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<ChecksheetView>)> {
    let principal = user.principal();
    authorize(&principal, Action::CloneTemplate, &Resource::None)?;

    let mut conn = state.db()?;
    let template: BestPracticeTemplate = best_practice_templates::table
        .find(template_id)
        .first(&mut conn)
        .optional()?
        .filter(|template: &BestPracticeTemplate| template.is_public || principal.is_admin())
        .ok_or_else(AppError::not_found)?;

    let (checksheet, checkpoints) = conn.transaction::<_, AppError, _>(|conn| {
        Ok(store::clone_template(conn, &template, &principal)?)
    })?;

    tracing::info!(
        template_id = %template_id,
        checksheet_id = %checksheet.id,
        checkpoints = checkpoints.len(),
        "template cloned"
    );
    Ok((
        StatusCode::CREATED,
        Json(ChecksheetView::new(checksheet, checkpoints, 0)),
    ))
}
