use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::models::{BestPracticeTemplate, Checksheet, ChecksheetResult};
use crate::routes::results::{with_titles, ResultListItem};
use crate::routes::users::escape_like;
use crate::schema::{best_practice_templates, checksheet_results, checksheets};
use crate::state::AppState;

const MIN_QUERY_CHARS: usize = 2;
const PER_GROUP: i64 = 5;

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct ChecksheetHit {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct TemplateHit {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub usage_count: i32,
}

#[derive(Debug, Default, Serialize)]
pub struct SearchResponse {
    pub checksheets: Vec<ChecksheetHit>,
    pub templates: Vec<TemplateHit>,
    pub results: Vec<ResultListItem>,
}

/// Quick search across checksheets, the template catalog and results.
pub async fn search(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<SearchResponse>> {
    let term = query.q.trim();
    if term.chars().count() < MIN_QUERY_CHARS {
        return Ok(Json(SearchResponse::default()));
    }

    let principal = user.principal();
    let pattern = format!("%{}%", escape_like(term));
    let mut conn = state.db()?;

    let checksheet_rows: Vec<Checksheet> =
        access::scope_checksheets(checksheets::table.into_boxed(), &principal)
            .filter(
                checksheets::title
                    .ilike(pattern.clone())
                    .or(checksheets::description.ilike(pattern.clone())),
            )
            .order(checksheets::updated_at.desc())
            .limit(PER_GROUP)
            .load(&mut conn)?;

    let template_rows: Vec<BestPracticeTemplate> = best_practice_templates::table
        .filter(best_practice_templates::is_public.eq(true))
        .filter(
            best_practice_templates::title
                .ilike(pattern.clone())
                .or(best_practice_templates::description.ilike(pattern.clone())),
        )
        .order(best_practice_templates::usage_count.desc())
        .limit(PER_GROUP)
        .load(&mut conn)?;

    let matching_checksheets = checksheets::table
        .filter(
            checksheets::title
                .ilike(pattern.clone())
                .or(checksheets::description.ilike(pattern)),
        )
        .select(checksheets::id);
    let result_rows: Vec<ChecksheetResult> =
        access::scope_results(checksheet_results::table.into_boxed(), &principal)
            .filter(checksheet_results::checksheet_id.eq_any(matching_checksheets))
            .order(checksheet_results::created_at.desc())
            .limit(PER_GROUP)
            .load(&mut conn)?;

    tracing::debug!(
        term = %term,
        checksheets = checksheet_rows.len(),
        templates = template_rows.len(),
        results = result_rows.len(),
        "search served"
    );

    Ok(Json(SearchResponse {
        checksheets: checksheet_rows
            .into_iter()
            .map(|checksheet| ChecksheetHit {
                id: checksheet.id,
                title: checksheet.title,
                description: checksheet.description,
                category: checksheet.category,
                status: checksheet.status,
                created_at: checksheet.created_at,
            })
            .collect(),
        templates: template_rows
            .into_iter()
            .map(|template| TemplateHit {
                id: template.id,
                title: template.title,
                description: template.description,
                category: template.category,
                usage_count: template.usage_count,
            })
            .collect(),
        results: with_titles(&mut conn, result_rows)?,
    }))
}
