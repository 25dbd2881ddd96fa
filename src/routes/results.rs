use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access::{self, authorize, Action, Principal, Resource};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::fields::{FieldConfig, TypedValue};
use crate::models::{
    Checkpoint, CheckpointResponse, Checksheet, ChecksheetResult, NewCheckpointResponse,
    NewChecksheetResult,
};
use crate::routes::checksheets::load_visible;
use crate::routes::ConfirmQuery;
use crate::schema::{checkpoint_responses, checksheet_results, checksheets};
use crate::state::AppState;
use crate::status::{ChecksheetStatus, ResponseStatus, ResultStatus};
use crate::store;
use crate::submission::{CreateResultRequest, ResponseInput};
use crate::utils::json::nullable_field;
use crate::wizard;

const MAX_LOCATION_CHARS: usize = 255;

#[derive(Debug, Clone, Serialize)]
pub struct ResultListItem {
    pub id: Uuid,
    pub checksheet_id: Uuid,
    pub checksheet_title: Option<String>,
    pub inspector_id: Uuid,
    pub status: String,
    pub location: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub notes: Option<String>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ResultListItem {
    pub fn new(result: ChecksheetResult, checksheet_title: Option<String>) -> Self {
        Self {
            id: result.id,
            checksheet_id: result.checksheet_id,
            checksheet_title,
            inspector_id: result.inspector_id,
            status: result.status,
            location: result.location,
            gps_lat: result.gps_lat,
            gps_lng: result.gps_lng,
            notes: result.notes,
            completed_at: result.completed_at,
            created_at: result.created_at,
            updated_at: result.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseView {
    pub id: Uuid,
    pub checkpoint_id: Uuid,
    pub checkpoint_title: String,
    pub order: i32,
    pub field_type: String,
    pub value: Option<String>,
    pub text_value: Option<String>,
    pub number_value: Option<f64>,
    pub bool_value: Option<bool>,
    pub date_value: Option<NaiveDateTime>,
    pub photo_urls: Vec<String>,
    pub file_urls: Vec<String>,
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultDetail {
    #[serde(flatten)]
    pub result: ResultListItem,
    pub responses: Vec<ResponseView>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListResultsQuery {
    pub checksheet_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateResultFields {
    status: Option<ResultStatus>,
    #[serde(alias = "gpsLat")]
    gps_lat: Option<f64>,
    #[serde(alias = "gpsLng")]
    gps_lng: Option<f64>,
    responses: Option<Vec<ResponseInput>>,
    /// Drop every stored response before writing `responses`.
    #[serde(default, alias = "replaceResponses")]
    replace_responses: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = checksheet_results)]
struct ResultChangeset {
    status: Option<String>,
    location: Option<Option<String>>,
    notes: Option<Option<String>>,
    gps_lat: Option<Option<f64>>,
    gps_lng: Option<Option<f64>>,
    completed_at: Option<Option<NaiveDateTime>>,
    updated_at: Option<NaiveDateTime>,
}

pub async fn list_results(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListResultsQuery>,
) -> AppResult<Json<Vec<ResultListItem>>> {
    let principal = user.principal();
    let mut conn = state.db()?;

    let mut listing = access::scope_results(checksheet_results::table.into_boxed(), &principal);
    if let Some(checksheet_id) = query.checksheet_id {
        listing = listing.filter(checksheet_results::checksheet_id.eq(checksheet_id));
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        let status: ResultStatus = status.parse().map_err(AppError::bad_request)?;
        listing = listing.filter(checksheet_results::status.eq(status.as_str()));
    }

    let rows: Vec<ChecksheetResult> = listing
        .order(checksheet_results::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(with_titles(&mut conn, rows)?))
}

pub async fn create_result(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateResultRequest>,
) -> AppResult<(StatusCode, Json<ResultDetail>)> {
    let principal = user.principal();
    let mut conn = state.db()?;
    let checksheet = load_visible(&mut conn, payload.checksheet_id, &principal)?;
    authorize(&principal, Action::ExecuteChecksheet, &Resource::checksheet(&checksheet))?;

    if checksheet.status == ChecksheetStatus::Archived.as_str() {
        return Err(AppError::validation(vec![FieldError::new(
            "checksheet_id",
            "archived checksheets cannot be executed",
        )]));
    }

    let location = non_blank(payload.location);
    if let Some(err) = FieldError::check_length("location", location.as_deref(), MAX_LOCATION_CHARS) {
        return Err(AppError::validation(vec![err]));
    }

    let checkpoints = store::load_checkpoints(&mut conn, checksheet.id)?;
    let status = payload.status.unwrap_or(ResultStatus::InProgress);
    let result_id = Uuid::new_v4();
    let responses = prepare_responses(&checkpoints, result_id, payload.responses)?;

    if status == ResultStatus::Completed {
        let answered: HashSet<Uuid> = responses
            .iter()
            .filter(|response| new_response_answered(response))
            .map(|response| response.checkpoint_id)
            .collect();
        require_answers(&checkpoints, &answered)?;
    }

    let new_result = NewChecksheetResult {
        id: result_id,
        checksheet_id: checksheet.id,
        inspector_id: principal.user_id,
        status: status.as_str().to_string(),
        location,
        gps_lat: payload.gps_lat,
        gps_lng: payload.gps_lng,
        notes: non_blank(payload.notes),
        completed_at: (status == ResultStatus::Completed).then(|| Utc::now().naive_utc()),
    };

    let result = conn.transaction::<_, AppError, _>(|conn| {
        diesel::insert_into(checksheet_results::table)
            .values(&new_result)
            .execute(conn)?;
        if !responses.is_empty() {
            diesel::insert_into(checkpoint_responses::table)
                .values(&responses)
                .execute(conn)?;
        }
        Ok(checksheet_results::table
            .find(result_id)
            .first::<ChecksheetResult>(conn)?)
    })?;

    tracing::info!(
        result_id = %result.id,
        checksheet_id = %checksheet.id,
        inspector_id = %principal.user_id,
        status = %result.status,
        responses = responses.len(),
        "result recorded"
    );
    let detail = load_detail(&mut conn, result, &checksheet, &checkpoints)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_result(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(result_id): Path<Uuid>,
) -> AppResult<Json<ResultDetail>> {
    let principal = user.principal();
    let mut conn = state.db()?;
    let (result, checksheet) = load_result(&mut conn, result_id, &principal, Action::ViewResult)?;
    let checkpoints = store::load_checkpoints(&mut conn, checksheet.id)?;
    Ok(Json(load_detail(&mut conn, result, &checksheet, &checkpoints)?))
}

pub async fn update_result(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(result_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<ResultDetail>> {
    let principal = user.principal();
    let mut conn = state.db()?;
    let (existing, checksheet) =
        load_result(&mut conn, result_id, &principal, Action::UpdateResult)?;

    let fields: UpdateResultFields = serde_json::from_value(body.clone())
        .map_err(|err| AppError::bad_request(format!("invalid request body: {err}")))?;

    let current: ResultStatus = existing.status.parse().map_err(AppError::internal)?;
    let next = fields.status.unwrap_or(current);
    if current == ResultStatus::Completed && next != ResultStatus::Completed {
        return Err(AppError::validation(vec![FieldError::new(
            "status",
            "completed results cannot be reopened",
        )]));
    }

    let mut errors = Vec::new();
    let mut changes = ResultChangeset::default();
    for (field, slot) in [("location", &mut changes.location), ("notes", &mut changes.notes)] {
        match nullable_field(&body, field) {
            Ok(update) => *slot = update,
            Err(err) => errors.push(err),
        }
    }
    errors.extend(FieldError::check_length(
        "location",
        changes.location.as_ref().and_then(Option::as_deref),
        MAX_LOCATION_CHARS,
    ));
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }
    if body.get("gps_lat").or_else(|| body.get("gpsLat")).is_some() {
        changes.gps_lat = Some(fields.gps_lat);
    }
    if body.get("gps_lng").or_else(|| body.get("gpsLng")).is_some() {
        changes.gps_lng = Some(fields.gps_lng);
    }
    if next != current {
        changes.status = Some(next.as_str().to_string());
        if next == ResultStatus::Completed {
            changes.completed_at = Some(Some(Utc::now().naive_utc()));
        }
    }
    changes.updated_at = Some(Utc::now().naive_utc());

    let checkpoints = store::load_checkpoints(&mut conn, checksheet.id)?;
    let responses = match fields.responses {
        Some(inputs) => Some(prepare_responses(&checkpoints, result_id, inputs)?),
        None => None,
    };
    let replace_all = fields.replace_responses;

    let result = conn.transaction::<_, AppError, _>(|conn| {
        if let Some(responses) = &responses {
            if replace_all {
                diesel::delete(
                    checkpoint_responses::table.filter(checkpoint_responses::result_id.eq(result_id)),
                )
                .execute(conn)?;
            } else {
                let replaced: Vec<Uuid> = responses.iter().map(|r| r.checkpoint_id).collect();
                diesel::delete(
                    checkpoint_responses::table
                        .filter(checkpoint_responses::result_id.eq(result_id))
                        .filter(checkpoint_responses::checkpoint_id.eq_any(replaced)),
                )
                .execute(conn)?;
            }
            if !responses.is_empty() {
                diesel::insert_into(checkpoint_responses::table)
                    .values(responses)
                    .execute(conn)?;
            }
        }

        if next == ResultStatus::Completed {
            let stored: Vec<CheckpointResponse> = checkpoint_responses::table
                .filter(checkpoint_responses::result_id.eq(result_id))
                .load(conn)?;
            let answered: HashSet<Uuid> = stored
                .iter()
                .filter(|response| stored_response_answered(response))
                .map(|response| response.checkpoint_id)
                .collect();
            require_answers(&checkpoints, &answered)?;
        }

        diesel::update(checksheet_results::table.find(result_id))
            .set(&changes)
            .execute(conn)?;
        Ok(checksheet_results::table
            .find(result_id)
            .first::<ChecksheetResult>(conn)?)
    })?;

    tracing::info!(
        result_id = %result.id,
        status = %result.status,
        updated_by = %principal.user_id,
        "result updated"
    );
    Ok(Json(load_detail(&mut conn, result, &checksheet, &checkpoints)?))
}

pub async fn delete_result(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(result_id): Path<Uuid>,
    Query(confirm): Query<ConfirmQuery>,
) -> AppResult<StatusCode> {
    let principal = user.principal();
    let mut conn = state.db()?;
    load_result(&mut conn, result_id, &principal, Action::DeleteResult)?;
    confirm.require()?;

    diesel::delete(checksheet_results::table.find(result_id)).execute(&mut conn)?;

    tracing::info!(result_id = %result_id, deleted_by = %principal.user_id, "result deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Loads a result with its checksheet and checks `action` against it.
fn load_result(
    conn: &mut PgConnection,
    result_id: Uuid,
    principal: &Principal,
    action: Action,
) -> AppResult<(ChecksheetResult, Checksheet)> {
    let result: ChecksheetResult = checksheet_results::table
        .find(result_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    let checksheet: Checksheet = checksheets::table.find(result.checksheet_id).first(conn)?;
    authorize(
        principal,
        action,
        &Resource::result(&result, checksheet.organization_id),
    )?;
    Ok((result, checksheet))
}

fn load_detail(
    conn: &mut PgConnection,
    result: ChecksheetResult,
    checksheet: &Checksheet,
    checkpoints: &[Checkpoint],
) -> AppResult<ResultDetail> {
    let stored: Vec<CheckpointResponse> = checkpoint_responses::table
        .filter(checkpoint_responses::result_id.eq(result.id))
        .load(conn)?;
    let by_id: HashMap<Uuid, &Checkpoint> = checkpoints.iter().map(|c| (c.id, c)).collect();

    let mut responses: Vec<ResponseView> = stored
        .into_iter()
        .filter_map(|response| {
            let checkpoint = by_id.get(&response.checkpoint_id)?;
            Some(ResponseView {
                id: response.id,
                checkpoint_id: response.checkpoint_id,
                checkpoint_title: checkpoint.title.clone(),
                order: checkpoint.position,
                field_type: checkpoint.field_type.clone(),
                value: response.value,
                text_value: response.text_value,
                number_value: response.number_value,
                bool_value: response.bool_value,
                date_value: response.date_value,
                photo_urls: response.photo_urls,
                file_urls: response.file_urls,
                gps_lat: response.gps_lat,
                gps_lng: response.gps_lng,
                status: response.status,
                notes: response.notes,
            })
        })
        .collect();
    responses.sort_by_key(|response| response.order);

    Ok(ResultDetail {
        result: ResultListItem::new(result, Some(checksheet.title.clone())),
        responses,
    })
}

/// Attaches checksheet titles to a page of results.
pub(crate) fn with_titles(
    conn: &mut PgConnection,
    rows: Vec<ChecksheetResult>,
) -> QueryResult<Vec<ResultListItem>> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.checksheet_id).collect();
    let titles: HashMap<Uuid, String> = if ids.is_empty() {
        HashMap::new()
    } else {
        checksheets::table
            .filter(checksheets::id.eq_any(&ids))
            .select((checksheets::id, checksheets::title))
            .load::<(Uuid, String)>(conn)?
            .into_iter()
            .collect()
    };

    Ok(rows
        .into_iter()
        .map(|row| {
            let title = titles.get(&row.checksheet_id).cloned();
            ResultListItem::new(row, title)
        })
        .collect())
}

/// Types every submitted answer against its checkpoint and builds the rows
/// to insert. Each checkpoint may be answered once.
fn prepare_responses(
    checkpoints: &[Checkpoint],
    result_id: Uuid,
    inputs: Vec<ResponseInput>,
) -> AppResult<Vec<NewCheckpointResponse>> {
    let mut fields = HashMap::with_capacity(checkpoints.len());
    for checkpoint in checkpoints {
        let field = FieldConfig::from_stored(&checkpoint.field_type, &checkpoint.config)
            .map_err(|message| {
                AppError::internal(format!("checkpoint {} is invalid: {message}", checkpoint.id))
            })?;
        fields.insert(checkpoint.id, field);
    }

    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(inputs.len());

    for (index, input) in inputs.into_iter().enumerate() {
        let Some(field) = fields.get(&input.checkpoint_id) else {
            errors.push(FieldError::new(
                format!("responses[{index}].checkpoint_id"),
                "checkpoint does not belong to this checksheet",
            ));
            continue;
        };
        if !seen.insert(input.checkpoint_id) {
            errors.push(FieldError::new(
                format!("responses[{index}].checkpoint_id"),
                "checkpoint answered more than once",
            ));
            continue;
        }

        let value = non_blank(input.value);
        let typed = match value.as_deref().map(|raw| field.interpret(raw)) {
            None => None,
            Some(Ok(typed)) => Some(typed),
            Some(Err(message)) => {
                errors.push(FieldError::new(format!("responses[{index}].value"), message));
                continue;
            }
        };

        let status = input
            .status
            .or_else(|| typed.as_ref().and_then(TypedValue::implied_status))
            .unwrap_or(ResponseStatus::Pending);

        let mut row = NewCheckpointResponse {
            id: Uuid::new_v4(),
            result_id,
            checkpoint_id: input.checkpoint_id,
            value,
            text_value: None,
            number_value: None,
            bool_value: None,
            date_value: None,
            photo_urls: input.photo_urls,
            file_urls: input.file_urls,
            gps_lat: input.gps_lat,
            gps_lng: input.gps_lng,
            status: status.as_str().to_string(),
            notes: non_blank(input.notes),
        };
        if let Some(typed) = typed {
            apply_typed(&mut row, typed);
        }
        rows.push(row);
    }

    if errors.is_empty() {
        Ok(rows)
    } else {
        Err(AppError::validation(errors))
    }
}

/// Copies a typed answer into its dedicated column.
fn apply_typed(row: &mut NewCheckpointResponse, typed: TypedValue) {
    match typed {
        TypedValue::Bool(value) => row.bool_value = Some(value),
        TypedValue::Number(value) => row.number_value = Some(value),
        TypedValue::Text(value) => row.text_value = Some(value),
        TypedValue::Choices(values) => row.text_value = Some(values.join(", ")),
        TypedValue::Date(value) => row.date_value = Some(value),
        TypedValue::PhotoUrl(url) => {
            if !row.photo_urls.contains(&url) {
                row.photo_urls.push(url);
            }
        }
        TypedValue::FileUrl(url) => {
            if !row.file_urls.contains(&url) {
                row.file_urls.push(url);
            }
        }
        TypedValue::Location { lat, lng } => {
            row.gps_lat = Some(lat);
            row.gps_lng = Some(lng);
        }
    }
}

fn new_response_answered(response: &NewCheckpointResponse) -> bool {
    response.value.is_some() || !response.photo_urls.is_empty() || !response.file_urls.is_empty()
}

fn stored_response_answered(response: &CheckpointResponse) -> bool {
    response.value.as_deref().is_some_and(|value| !value.trim().is_empty())
        || !response.photo_urls.is_empty()
        || !response.file_urls.is_empty()
}

fn require_answers(checkpoints: &[Checkpoint], answered: &HashSet<Uuid>) -> AppResult<()> {
    let requirements: Vec<(Uuid, bool)> = checkpoints
        .iter()
        .map(|checkpoint| (checkpoint.id, checkpoint.is_required))
        .collect();
    let missing = wizard::missing_required(&requirements, answered);
    if missing.is_empty() {
        return Ok(());
    }

    let details = missing
        .into_iter()
        .map(|position| {
            FieldError::new(
                "responses",
                format!("required checkpoint '{}' is unanswered", checkpoints[position].title),
            )
        })
        .collect();
    Err(AppError::validation(details))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
