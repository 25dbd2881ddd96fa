use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access::{self, authorize, Action, Principal, Resource};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{Checkpoint, Checksheet, ChecksheetResult};
use crate::routes::results::ResultListItem;
use crate::routes::ConfirmQuery;
use crate::schema::{checksheet_results, checksheets};
use crate::state::AppState;
use crate::status::ChecksheetStatus;
use crate::store::{self, CheckpointInput, ChecksheetDraft, MAX_LABEL_CHARS, MAX_TITLE_CHARS};
use crate::utils::json::nullable_field;

const RECENT_RESULTS: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointView {
    pub id: Uuid,
    pub order: i32,
    pub title: String,
    pub description: Option<String>,
    pub field_type: String,
    pub section: Option<String>,
    pub is_required: bool,
    pub config: Value,
}

impl From<Checkpoint> for CheckpointView {
    fn from(checkpoint: Checkpoint) -> Self {
        Self {
            id: checkpoint.id,
            order: checkpoint.position,
            title: checkpoint.title,
            description: checkpoint.description,
            field_type: checkpoint.field_type,
            section: checkpoint.section,
            is_required: checkpoint.is_required,
            config: checkpoint.config,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecksheetView {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub industry: Option<String>,
    pub status: String,
    pub version: i32,
    pub is_template: bool,
    pub tags: Vec<String>,
    pub creator_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub checkpoints: Vec<CheckpointView>,
    pub result_count: i64,
}

impl ChecksheetView {
    pub fn new(checksheet: Checksheet, checkpoints: Vec<Checkpoint>, result_count: i64) -> Self {
        Self {
            id: checksheet.id,
            title: checksheet.title,
            description: checksheet.description,
            category: checksheet.category,
            industry: checksheet.industry,
            status: checksheet.status,
            version: checksheet.version,
            is_template: checksheet.is_template,
            tags: checksheet.tags,
            creator_id: checksheet.creator_id,
            organization_id: checksheet.organization_id,
            created_at: checksheet.created_at,
            updated_at: checksheet.updated_at,
            checkpoints: checkpoints.into_iter().map(CheckpointView::from).collect(),
            result_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChecksheetDetail {
    #[serde(flatten)]
    pub checksheet: ChecksheetView,
    pub recent_results: Vec<ResultListItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListChecksheetsQuery {
    pub category: Option<String>,
    pub status: Option<String>,
    pub is_template: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChecksheetRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub industry: Option<String>,
    #[serde(default, alias = "isTemplate")]
    pub is_template: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointInput>,
}

/// The non-nullable parts of a PATCH body; nullable text columns are read
/// separately so `null` can clear them.
#[derive(Debug, Default, Deserialize)]
struct UpdateChecksheetFields {
    title: Option<String>,
    status: Option<ChecksheetStatus>,
    #[serde(alias = "isTemplate")]
    is_template: Option<bool>,
    tags: Option<Vec<String>>,
    checkpoints: Option<Vec<CheckpointInput>>,
    version: Option<i32>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = checksheets)]
struct ChecksheetChangeset {
    title: Option<String>,
    description: Option<Option<String>>,
    category: Option<Option<String>>,
    industry: Option<Option<String>>,
    status: Option<String>,
    is_template: Option<bool>,
    tags: Option<Vec<String>>,
    updated_at: Option<NaiveDateTime>,
}

pub async fn list_checksheets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListChecksheetsQuery>,
) -> AppResult<Json<Vec<ChecksheetView>>> {
    let principal = user.principal();
    let mut conn = state.db()?;

    let mut listing = access::scope_checksheets(checksheets::table.into_boxed(), &principal);
    if let Some(category) = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        listing = listing.filter(checksheets::category.eq(category.to_string()));
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        let status: ChecksheetStatus = status.parse().map_err(AppError::bad_request)?;
        listing = listing.filter(checksheets::status.eq(status.as_str()));
    }
    if let Some(is_template) = query.is_template {
        listing = listing.filter(checksheets::is_template.eq(is_template));
    }

    let rows: Vec<Checksheet> = listing
        .order(checksheets::updated_at.desc())
        .load(&mut conn)?;

    let ids: Vec<Uuid> = rows.iter().map(|checksheet| checksheet.id).collect();
    let mut checkpoints = store::load_checkpoints_for(&mut conn, &ids)?;
    let counts = result_counts(&mut conn, &ids)?;

    let response = rows
        .into_iter()
        .map(|checksheet| {
            let id = checksheet.id;
            ChecksheetView::new(
                checksheet,
                checkpoints.remove(&id).unwrap_or_default(),
                counts.get(&id).copied().unwrap_or(0),
            )
        })
        .collect();

    Ok(Json(response))
}

pub async fn create_checksheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateChecksheetRequest>,
) -> AppResult<(StatusCode, Json<ChecksheetView>)> {
    let principal = user.principal();
    authorize(&principal, Action::CreateChecksheet, &Resource::None)?;

    let mut errors = Vec::new();
    if let Err(err) = check_title(&payload.title) {
        errors.push(err);
    }
    let category = trimmed(payload.category);
    let industry = trimmed(payload.industry);
    errors.extend(label_length_errors(category.as_deref(), industry.as_deref()));
    let drafts = match store::validate_checkpoints(payload.checkpoints) {
        Ok(drafts) => drafts,
        Err(mut checkpoint_errors) => {
            errors.append(&mut checkpoint_errors);
            Vec::new()
        }
    };
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let draft = ChecksheetDraft {
        title: payload.title.trim().to_string(),
        description: trimmed(payload.description),
        category,
        industry,
        is_template: payload.is_template,
        tags: normalize_tags(payload.tags),
    };

    let mut conn = state.db()?;
    let (checksheet, checkpoints) = conn.transaction::<_, AppError, _>(|conn| {
        Ok(store::create_checksheet(conn, &principal, draft, &drafts)?)
    })?;

    tracing::info!(
        checksheet_id = %checksheet.id,
        creator_id = %principal.user_id,
        checkpoints = checkpoints.len(),
        "checksheet created"
    );
    Ok((
        StatusCode::CREATED,
        Json(ChecksheetView::new(checksheet, checkpoints, 0)),
    ))
}

pub async fn get_checksheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(checksheet_id): Path<Uuid>,
) -> AppResult<Json<ChecksheetDetail>> {
    let principal = user.principal();
    let mut conn = state.db()?;
    let checksheet = load_visible(&mut conn, checksheet_id, &principal)?;

    let checkpoints = store::load_checkpoints(&mut conn, checksheet_id)?;
    let result_count = result_counts(&mut conn, &[checksheet_id])?
        .get(&checksheet_id)
        .copied()
        .unwrap_or(0);

    let recent: Vec<ChecksheetResult> =
        access::scope_results(checksheet_results::table.into_boxed(), &principal)
            .filter(checksheet_results::checksheet_id.eq(checksheet_id))
            .order(checksheet_results::created_at.desc())
            .limit(RECENT_RESULTS)
            .load(&mut conn)?;
    let title = checksheet.title.clone();
    let recent_results = recent
        .into_iter()
        .map(|result| ResultListItem::new(result, Some(title.clone())))
        .collect();

    Ok(Json(ChecksheetDetail {
        checksheet: ChecksheetView::new(checksheet, checkpoints, result_count),
        recent_results,
    }))
}

pub async fn update_checksheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(checksheet_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<ChecksheetView>> {
    let principal = user.principal();
    let mut conn = state.db()?;
    let existing = load_visible(&mut conn, checksheet_id, &principal)?;
    authorize(&principal, Action::UpdateChecksheet, &Resource::checksheet(&existing))?;

    let fields: UpdateChecksheetFields = serde_json::from_value(body.clone())
        .map_err(|err| AppError::bad_request(format!("invalid request body: {err}")))?;

    let mut errors = Vec::new();
    let mut changes = ChecksheetChangeset::default();

    if let Some(title) = &fields.title {
        match check_title(title) {
            Ok(()) => changes.title = Some(title.trim().to_string()),
            Err(err) => errors.push(err),
        }
    }
    for (field, slot) in [
        ("description", &mut changes.description),
        ("category", &mut changes.category),
        ("industry", &mut changes.industry),
    ] {
        match nullable_field(&body, field) {
            Ok(update) => *slot = update,
            Err(err) => errors.push(err),
        }
    }
    errors.extend(label_length_errors(
        changes.category.as_ref().and_then(Option::as_deref),
        changes.industry.as_ref().and_then(Option::as_deref),
    ));

    if let Some(next) = fields.status {
        let current: ChecksheetStatus = existing.status.parse().map_err(AppError::internal)?;
        if next != current {
            authorize(
                &principal,
                Action::ChangeChecksheetStatus,
                &Resource::checksheet(&existing),
            )?;
            if !current.can_transition_to(next) {
                errors.push(FieldError::new(
                    "status",
                    format!("cannot change status from {current} to {next}"),
                ));
            }
            changes.status = Some(next.as_str().to_string());
        }
    }
    changes.is_template = fields.is_template;
    changes.tags = fields.tags.map(normalize_tags);

    let drafts = match fields.checkpoints.map(store::validate_checkpoints) {
        None => None,
        Some(Ok(drafts)) => Some(drafts),
        Some(Err(mut checkpoint_errors)) => {
            errors.append(&mut checkpoint_errors);
            None
        }
    };

    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    changes.updated_at = Some(Utc::now().naive_utc());
    let expected_version = fields.version;

    let (checksheet, checkpoints) = conn.transaction::<_, AppError, _>(|conn| {
        let locked: Checksheet = checksheets::table
            .find(checksheet_id)
            .for_update()
            .first(conn)?;
        if let Some(expected) = expected_version {
            if expected != locked.version {
                return Err(AppError::conflict(format!(
                    "checksheet was modified concurrently (current version {}, yours {expected})",
                    locked.version
                )));
            }
        }

        diesel::update(checksheets::table.find(checksheet_id))
            .set((&changes, checksheets::version.eq(checksheets::version + 1)))
            .execute(conn)?;

        let checkpoints = match &drafts {
            Some(drafts) => store::replace_checkpoints(conn, checksheet_id, drafts)?,
            None => store::load_checkpoints(conn, checksheet_id)?,
        };
        let checksheet: Checksheet = checksheets::table.find(checksheet_id).first(conn)?;
        Ok((checksheet, checkpoints))
    })?;

    let result_count = result_counts(&mut conn, &[checksheet_id])?
        .get(&checksheet_id)
        .copied()
        .unwrap_or(0);

    tracing::info!(
        checksheet_id = %checksheet.id,
        version = checksheet.version,
        updated_by = %principal.user_id,
        "checksheet updated"
    );
    Ok(Json(ChecksheetView::new(checksheet, checkpoints, result_count)))
}

pub async fn delete_checksheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(checksheet_id): Path<Uuid>,
    Query(confirm): Query<ConfirmQuery>,
) -> AppResult<StatusCode> {
    let principal = user.principal();
    let mut conn = state.db()?;
    let existing = load_visible(&mut conn, checksheet_id, &principal)?;
    authorize(&principal, Action::DeleteChecksheet, &Resource::checksheet(&existing))?;
    confirm.require()?;

    diesel::delete(checksheets::table.find(checksheet_id)).execute(&mut conn)?;

    tracing::info!(checksheet_id = %checksheet_id, deleted_by = %principal.user_id, "checksheet deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn duplicate_checksheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(checksheet_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<ChecksheetView>)> {
    let principal = user.principal();
    let mut conn = state.db()?;
    let source = load_visible(&mut conn, checksheet_id, &principal)?;
    authorize(&principal, Action::CreateChecksheet, &Resource::None)?;

    let (checksheet, checkpoints) = conn.transaction::<_, AppError, _>(|conn| {
        Ok(store::duplicate_checksheet(conn, &source, &principal)?)
    })?;

    tracing::info!(
        source_id = %checksheet_id,
        checksheet_id = %checksheet.id,
        "checksheet duplicated"
    );
    Ok((
        StatusCode::CREATED,
        Json(ChecksheetView::new(checksheet, checkpoints, 0)),
    ))
}

/// 404 when the row is missing, 403 when it exists but is out of scope.
pub(crate) fn load_visible(
    conn: &mut PgConnection,
    checksheet_id: Uuid,
    principal: &Principal,
) -> AppResult<Checksheet> {
    let checksheet: Checksheet = checksheets::table
        .find(checksheet_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    authorize(principal, Action::ViewChecksheet, &Resource::checksheet(&checksheet))?;
    Ok(checksheet)
}

pub(crate) fn result_counts(
    conn: &mut PgConnection,
    checksheet_ids: &[Uuid],
) -> QueryResult<HashMap<Uuid, i64>> {
    if checksheet_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, i64)> = checksheet_results::table
        .filter(checksheet_results::checksheet_id.eq_any(checksheet_ids))
        .group_by(checksheet_results::checksheet_id)
        .select((checksheet_results::checksheet_id, count_star()))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

fn check_title(title: &str) -> Result<(), FieldError> {
    let title = title.trim();
    if title.is_empty() {
        Err(FieldError::new("title", "title is required"))
    } else if title.chars().count() > MAX_TITLE_CHARS {
        Err(FieldError::new(
            "title",
            format!("title must be at most {MAX_TITLE_CHARS} characters"),
        ))
    } else {
        Ok(())
    }
}

fn label_length_errors(
    category: Option<&str>,
    industry: Option<&str>,
) -> impl Iterator<Item = FieldError> {
    let category = FieldError::check_length("category", category, MAX_LABEL_CHARS);
    let industry = FieldError::check_length("industry", industry, MAX_LABEL_CHARS);
    category.into_iter().chain(industry)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Trims, drops blanks and keeps the first occurrence of each tag.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.to_lowercase()))
        .collect()
}
