//! Aggregates shown on the reports page and dashboard.
//!
//! Everything here is a single pass over rows the caller already fetched and
//! scoped; nothing is cached between requests.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{CheckpointResponse, Checksheet, ChecksheetResult};
use crate::status::{ResponseStatus, ResultStatus};

pub const OTHER_CATEGORY: &str = "Other";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    pub total: u64,
    pub completed: u64,
    pub in_progress: u64,
    pub completion_rate: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub executions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecksheetExecutions {
    pub checksheet_id: Uuid,
    pub executions: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub pass: u64,
    pub fail: u64,
    pub na: u64,
    pub pending: u64,
}

impl OutcomeCounts {
    /// Share of decided checks that passed; NA and pending are ignored.
    pub fn compliance_rate(&self) -> u8 {
        percentage(self.pass, self.pass + self.fail)
    }
}

/// Rounded `part / whole` in percent, 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round().min(100.0) as u8
}

pub fn summarize(results: &[ChecksheetResult]) -> ResultSummary {
    let mut summary = ResultSummary::default();
    for result in results {
        summary.total += 1;
        match result.status.parse::<ResultStatus>() {
            Ok(ResultStatus::Completed) => summary.completed += 1,
            Ok(ResultStatus::InProgress) => summary.in_progress += 1,
            Err(_) => {}
        }
    }
    summary.completion_rate = percentage(summary.completed, summary.total);
    summary
}

/// Executions per day for the `days` days ending with `today`, oldest first.
/// Days without executions are present with a zero count.
pub fn daily_trend(results: &[ChecksheetResult], today: NaiveDate, days: u32) -> Vec<DailyCount> {
    if days == 0 {
        return Vec::new();
    }
    let first = today - Duration::days(i64::from(days) - 1);

    let mut buckets: BTreeMap<NaiveDate, u64> = (0..days)
        .map(|offset| (first + Duration::days(i64::from(offset)), 0))
        .collect();

    for result in results {
        if let Some(count) = buckets.get_mut(&result.created_at.date()) {
            *count += 1;
        }
    }

    buckets
        .into_iter()
        .map(|(date, executions)| DailyCount { date, executions })
        .collect()
}

/// Checksheets per category, largest first. Blank categories count as
/// "Other".
pub fn category_histogram(checksheets: &[Checksheet]) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for checksheet in checksheets {
        let category = checksheet
            .category
            .as_deref()
            .map(str::trim)
            .filter(|category| !category.is_empty())
            .unwrap_or(OTHER_CATEGORY);
        *counts.entry(category.to_string()).or_default() += 1;
    }

    let mut histogram: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect();
    histogram.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    histogram
}

/// The `limit` most executed checksheets, ties broken by id so the order is
/// stable.
pub fn most_executed(results: &[ChecksheetResult], limit: usize) -> Vec<ChecksheetExecutions> {
    let mut counts: HashMap<Uuid, u64> = HashMap::new();
    for result in results {
        *counts.entry(result.checksheet_id).or_default() += 1;
    }

    let mut ranked: Vec<ChecksheetExecutions> = counts
        .into_iter()
        .map(|(checksheet_id, executions)| ChecksheetExecutions {
            checksheet_id,
            executions,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.executions
            .cmp(&a.executions)
            .then_with(|| a.checksheet_id.cmp(&b.checksheet_id))
    });
    ranked.truncate(limit);
    ranked
}

pub fn response_outcomes(responses: &[CheckpointResponse]) -> OutcomeCounts {
    let mut outcomes = OutcomeCounts::default();
    for response in responses {
        match response.status.parse::<ResponseStatus>() {
            Ok(ResponseStatus::Pass) => outcomes.pass += 1,
            Ok(ResponseStatus::Fail) => outcomes.fail += 1,
            Ok(ResponseStatus::Na) => outcomes.na += 1,
            Ok(ResponseStatus::Pending) | Err(_) => outcomes.pending += 1,
        }
    }
    outcomes
}
