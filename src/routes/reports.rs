use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{self, authorize, Action, Resource};
use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::models::{CheckpointResponse, Checksheet, ChecksheetResult};
use crate::reports::{self, CategoryCount, DailyCount, OutcomeCounts, ResultSummary};
use crate::routes::checksheets::result_counts;
use crate::routes::results::{with_titles, ResultListItem};
use crate::schema::{checkpoint_responses, checkpoints, checksheet_results, checksheets};
use crate::state::AppState;

const DEFAULT_TREND_DAYS: u32 = 7;
const MAX_TREND_DAYS: u32 = 365;
const REPORT_RECENT_RESULTS: usize = 10;
const TOP_CHECKSHEETS: usize = 5;
const DASHBOARD_RECENT_CHECKSHEETS: i64 = 5;

#[derive(Debug, Default, Deserialize)]
pub struct ReportsQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TopChecksheet {
    pub checksheet_id: Uuid,
    pub title: Option<String>,
    pub executions: u64,
}

#[derive(Debug, Serialize)]
pub struct ReportsResponse {
    pub summary: ResultSummary,
    pub trend: Vec<DailyCount>,
    pub categories: Vec<CategoryCount>,
    pub outcomes: OutcomeCounts,
    pub compliance_rate: u8,
    pub top_checksheets: Vec<TopChecksheet>,
    pub recent_results: Vec<ResultListItem>,
}

#[derive(Debug, Serialize)]
pub struct RecentChecksheet {
    pub id: Uuid,
    pub title: String,
    pub category: Option<String>,
    pub status: String,
    pub checkpoint_count: i64,
    pub result_count: i64,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub checksheets: i64,
    pub results: ResultSummary,
    pub compliance_rate: u8,
    pub recent_checksheets: Vec<RecentChecksheet>,
}

pub async fn reports(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ReportsQuery>,
) -> AppResult<Json<ReportsResponse>> {
    let principal = user.principal();
    authorize(&principal, Action::ViewReports, &Resource::None)?;
    let days = query
        .days
        .unwrap_or(DEFAULT_TREND_DAYS)
        .clamp(1, MAX_TREND_DAYS);

    let mut conn = state.db()?;
    let results: Vec<ChecksheetResult> =
        access::scope_results(checksheet_results::table.into_boxed(), &principal)
            .order(checksheet_results::created_at.desc())
            .load(&mut conn)?;
    let visible_checksheets: Vec<Checksheet> =
        access::scope_checksheets(checksheets::table.into_boxed(), &principal).load(&mut conn)?;
    let responses = load_responses(&mut conn, &results)?;

    let today: NaiveDate = Utc::now().date_naive();
    let summary = reports::summarize(&results);
    let trend = reports::daily_trend(&results, today, days);
    let categories = reports::category_histogram(&visible_checksheets);
    let outcomes = reports::response_outcomes(&responses);

    let titles: HashMap<Uuid, String> = visible_checksheets
        .iter()
        .map(|checksheet| (checksheet.id, checksheet.title.clone()))
        .collect();
    let top_checksheets = reports::most_executed(&results, TOP_CHECKSHEETS)
        .into_iter()
        .map(|ranked| TopChecksheet {
            checksheet_id: ranked.checksheet_id,
            title: titles.get(&ranked.checksheet_id).cloned(),
            executions: ranked.executions,
        })
        .collect();

    let recent = results.into_iter().take(REPORT_RECENT_RESULTS).collect();
    let recent_results = with_titles(&mut conn, recent)?;

    Ok(Json(ReportsResponse {
        summary,
        trend,
        categories,
        compliance_rate: outcomes.compliance_rate(),
        outcomes,
        top_checksheets,
        recent_results,
    }))
}

pub async fn dashboard(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<DashboardResponse>> {
    let principal = user.principal();
    authorize(&principal, Action::ViewReports, &Resource::None)?;
    let mut conn = state.db()?;

    let checksheet_count: i64 = access::scope_checksheets(checksheets::table.into_boxed(), &principal)
        .count()
        .get_result(&mut conn)?;
    let results: Vec<ChecksheetResult> =
        access::scope_results(checksheet_results::table.into_boxed(), &principal).load(&mut conn)?;
    let responses = load_responses(&mut conn, &results)?;

    let recent: Vec<Checksheet> =
        access::scope_checksheets(checksheets::table.into_boxed(), &principal)
            .order(checksheets::updated_at.desc())
            .limit(DASHBOARD_RECENT_CHECKSHEETS)
            .load(&mut conn)?;
    let ids: Vec<Uuid> = recent.iter().map(|checksheet| checksheet.id).collect();
    let counts = result_counts(&mut conn, &ids)?;
    let checkpoint_counts = checkpoint_counts(&mut conn, &ids)?;

    let recent_checksheets = recent
        .into_iter()
        .map(|checksheet| RecentChecksheet {
            checkpoint_count: checkpoint_counts.get(&checksheet.id).copied().unwrap_or(0),
            result_count: counts.get(&checksheet.id).copied().unwrap_or(0),
            id: checksheet.id,
            title: checksheet.title,
            category: checksheet.category,
            status: checksheet.status,
            updated_at: checksheet.updated_at,
        })
        .collect();

    Ok(Json(DashboardResponse {
        checksheets: checksheet_count,
        results: reports::summarize(&results),
        compliance_rate: reports::response_outcomes(&responses).compliance_rate(),
        recent_checksheets,
    }))
}

fn load_responses(
    conn: &mut PgConnection,
    results: &[ChecksheetResult],
) -> QueryResult<Vec<CheckpointResponse>> {
    if results.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = results.iter().map(|result| result.id).collect();
    checkpoint_responses::table
        .filter(checkpoint_responses::result_id.eq_any(ids))
        .load(conn)
}

fn checkpoint_counts(conn: &mut PgConnection, ids: &[Uuid]) -> QueryResult<HashMap<Uuid, i64>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, i64)> = checkpoints::table
        .filter(checkpoints::checksheet_id.eq_any(ids))
        .group_by(checkpoints::checksheet_id)
        .select((checkpoints::checksheet_id, diesel::dsl::count_star()))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}
