//! Multi-row writes for checksheets and their checkpoints.
//!
//! Checkpoint positions are always rewritten to `0..N-1` from the order the
//! caller supplies, and every function that touches more than one row expects
//! to run inside the caller's transaction.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access::Principal;
use crate::error::FieldError;
use crate::fields::{FieldConfig, FieldType};
use crate::models::{
    BestPracticeTemplate, Checkpoint, Checksheet, NewCheckpoint, NewChecksheet,
};
use crate::schema::{best_practice_templates, checkpoints, checksheets};
use crate::status::ChecksheetStatus;

pub const COPY_SUFFIX: &str = " (Copy)";
pub const DEFAULT_SECTION: &str = "General";

// Column widths from the migrations.
pub const MAX_TITLE_CHARS: usize = 255;
pub const MAX_CHECKPOINT_TITLE_CHARS: usize = 500;
pub const MAX_SECTION_CHARS: usize = 255;
pub const MAX_LABEL_CHARS: usize = 100;

/// A checkpoint as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "fieldType")]
    pub field_type: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default, alias = "isRequired")]
    pub is_required: bool,
    #[serde(default)]
    pub config: Option<Value>,
}

/// A checked checkpoint ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointDraft {
    pub id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub section: Option<String>,
    pub is_required: bool,
    pub field: FieldConfig,
}

impl CheckpointDraft {
    fn from_stored(checkpoint: &Checkpoint) -> Result<Self, String> {
        Ok(Self {
            id: None,
            title: checkpoint.title.clone(),
            description: checkpoint.description.clone(),
            section: checkpoint.section.clone(),
            is_required: checkpoint.is_required,
            field: FieldConfig::from_stored(&checkpoint.field_type, &checkpoint.config)?,
        })
    }

    fn insertable(&self, checksheet_id: Uuid, position: i32) -> NewCheckpoint {
        NewCheckpoint {
            id: Uuid::new_v4(),
            checksheet_id,
            position,
            title: self.title.clone(),
            description: self.description.clone(),
            field_type: self.field.field_type().as_str().to_string(),
            section: self.section.clone(),
            is_required: self.is_required,
            config: self.field.config_value(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Title and section width problems of one checkpoint, reported under
/// `prefix` (for example `checkpoints[2]`).
pub fn checkpoint_length_errors(
    prefix: &str,
    title: &str,
    section: Option<&str>,
) -> impl Iterator<Item = FieldError> {
    let title = FieldError::check_length(
        format!("{prefix}.title"),
        Some(title),
        MAX_CHECKPOINT_TITLE_CHARS,
    );
    let section = FieldError::check_length(format!("{prefix}.section"), section, MAX_SECTION_CHARS);
    title.into_iter().chain(section)
}

/// `title` with the copy suffix, shortened so the result still fits the
/// title column.
pub fn copy_title(title: &str) -> String {
    let keep = MAX_TITLE_CHARS - COPY_SUFFIX.chars().count();
    let base: String = title.chars().take(keep).collect();
    format!("{}{COPY_SUFFIX}", base.trim_end())
}

/// Validates submitted checkpoints, reporting every problem with its index.
pub fn validate_checkpoints(
    inputs: Vec<CheckpointInput>,
) -> Result<Vec<CheckpointDraft>, Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut drafts = Vec::with_capacity(inputs.len());
    let mut seen_ids = HashSet::new();

    for (index, input) in inputs.into_iter().enumerate() {
        let title = input.title.trim().to_string();
        let section = non_blank(input.section);
        if title.is_empty() {
            errors.push(FieldError::new(
                format!("checkpoints[{index}].title"),
                "title is required",
            ));
        }
        errors.extend(checkpoint_length_errors(
            &format!("checkpoints[{index}]"),
            &title,
            section.as_deref(),
        ));
        if let Some(id) = input.id {
            if !seen_ids.insert(id) {
                errors.push(FieldError::new(
                    format!("checkpoints[{index}].id"),
                    "checkpoint listed twice",
                ));
            }
        }

        let field = match input.field_type.parse::<FieldType>() {
            Ok(field_type) => match FieldConfig::from_parts(field_type, input.config.as_ref()) {
                Ok(field) => Some(field),
                Err(message) => {
                    errors.push(FieldError::new(format!("checkpoints[{index}].config"), message));
                    None
                }
            },
            Err(message) => {
                errors.push(FieldError::new(
                    format!("checkpoints[{index}].field_type"),
                    message,
                ));
                None
            }
        };

        if let Some(field) = field {
            drafts.push(CheckpointDraft {
                id: input.id,
                title,
                description: non_blank(input.description),
                section,
                is_required: input.is_required,
                field,
            });
        }
    }

    if errors.is_empty() {
        Ok(drafts)
    } else {
        Err(errors)
    }
}

pub fn load_checkpoints(conn: &mut PgConnection, checksheet_id: Uuid) -> QueryResult<Vec<Checkpoint>> {
    checkpoints::table
        .filter(checkpoints::checksheet_id.eq(checksheet_id))
        .order(checkpoints::position.asc())
        .load(conn)
}

/// Checkpoints of several checksheets, each list in position order.
pub fn load_checkpoints_for(
    conn: &mut PgConnection,
    checksheet_ids: &[Uuid],
) -> QueryResult<HashMap<Uuid, Vec<Checkpoint>>> {
    let rows: Vec<Checkpoint> = checkpoints::table
        .filter(checkpoints::checksheet_id.eq_any(checksheet_ids))
        .order((checkpoints::checksheet_id, checkpoints::position.asc()))
        .load(conn)?;

    let mut grouped: HashMap<Uuid, Vec<Checkpoint>> = HashMap::new();
    for row in rows {
        grouped.entry(row.checksheet_id).or_default().push(row);
    }
    Ok(grouped)
}

pub fn insert_checkpoints(
    conn: &mut PgConnection,
    checksheet_id: Uuid,
    drafts: &[CheckpointDraft],
) -> QueryResult<Vec<Checkpoint>> {
    let rows: Vec<NewCheckpoint> = drafts
        .iter()
        .enumerate()
        .map(|(position, draft)| draft.insertable(checksheet_id, position as i32))
        .collect();

    if !rows.is_empty() {
        diesel::insert_into(checkpoints::table)
            .values(&rows)
            .execute(conn)?;
    }
    load_checkpoints(conn, checksheet_id)
}

#[derive(AsChangeset)]
#[diesel(table_name = checkpoints)]
#[diesel(treat_none_as_null = true)]
struct CheckpointChangeset<'a> {
    position: i32,
    title: &'a str,
    description: Option<&'a str>,
    field_type: &'a str,
    section: Option<&'a str>,
    is_required: bool,
    config: Value,
}

/// Makes the stored checkpoints match `drafts` exactly. Drafts carrying the
/// id of an existing checkpoint update it in place so recorded responses
/// survive; existing checkpoints not listed are removed.
pub fn replace_checkpoints(
    conn: &mut PgConnection,
    checksheet_id: Uuid,
    drafts: &[CheckpointDraft],
) -> QueryResult<Vec<Checkpoint>> {
    let existing: HashSet<Uuid> = checkpoints::table
        .filter(checkpoints::checksheet_id.eq(checksheet_id))
        .select(checkpoints::id)
        .load::<Uuid>(conn)?
        .into_iter()
        .collect();

    let kept: Vec<Uuid> = drafts
        .iter()
        .filter_map(|draft| draft.id)
        .filter(|id| existing.contains(id))
        .collect();

    diesel::delete(
        checkpoints::table
            .filter(checkpoints::checksheet_id.eq(checksheet_id))
            .filter(checkpoints::id.ne_all(&kept)),
    )
    .execute(conn)?;

    // Park surviving rows on negative positions so the rewrite below never
    // collides with the (checksheet_id, position) unique constraint.
    diesel::update(checkpoints::table.filter(checkpoints::checksheet_id.eq(checksheet_id)))
        .set(checkpoints::position.eq(checkpoints::position * -1 - 1))
        .execute(conn)?;

    let mut inserts = Vec::new();
    for (position, draft) in drafts.iter().enumerate() {
        let position = position as i32;
        match draft.id.filter(|id| existing.contains(id)) {
            Some(id) => {
                let field_type = draft.field.field_type();
                diesel::update(checkpoints::table.find(id))
                    .set(&CheckpointChangeset {
                        position,
                        title: &draft.title,
                        description: draft.description.as_deref(),
                        field_type: field_type.as_str(),
                        section: draft.section.as_deref(),
                        is_required: draft.is_required,
                        config: draft.field.config_value(),
                    })
                    .execute(conn)?;
            }
            None => inserts.push(draft.insertable(checksheet_id, position)),
        }
    }

    if !inserts.is_empty() {
        diesel::insert_into(checkpoints::table)
            .values(&inserts)
            .execute(conn)?;
    }

    load_checkpoints(conn, checksheet_id)
}

/// Fields of a checksheet being created.
#[derive(Debug, Clone)]
pub struct ChecksheetDraft {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub industry: Option<String>,
    pub is_template: bool,
    pub tags: Vec<String>,
}

/// Inserts a DRAFT checksheet owned by `owner` together with its checkpoints.
pub fn create_checksheet(
    conn: &mut PgConnection,
    owner: &Principal,
    draft: ChecksheetDraft,
    checkpoint_drafts: &[CheckpointDraft],
) -> QueryResult<(Checksheet, Vec<Checkpoint>)> {
    let new_checksheet = NewChecksheet {
        id: Uuid::new_v4(),
        title: draft.title,
        description: draft.description,
        category: draft.category,
        industry: draft.industry,
        status: ChecksheetStatus::Draft.as_str().to_string(),
        is_template: draft.is_template,
        tags: draft.tags,
        creator_id: owner.user_id,
        organization_id: owner.organization_id,
    };

    diesel::insert_into(checksheets::table)
        .values(&new_checksheet)
        .execute(conn)?;

    let checkpoints = insert_checkpoints(conn, new_checksheet.id, checkpoint_drafts)?;
    let checksheet = checksheets::table.find(new_checksheet.id).first(conn)?;
    Ok((checksheet, checkpoints))
}

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    #[error("stored checkpoint data is invalid: {0}")]
    InvalidSource(String),
}

impl From<CopyError> for crate::error::AppError {
    fn from(value: CopyError) -> Self {
        match value {
            CopyError::Database(err) => err.into(),
            CopyError::InvalidSource(message) => crate::error::AppError::internal(message),
        }
    }
}

/// Copies a checksheet and its checkpoints as a new DRAFT owned by `owner`.
pub fn duplicate_checksheet(
    conn: &mut PgConnection,
    source: &Checksheet,
    owner: &Principal,
) -> Result<(Checksheet, Vec<Checkpoint>), CopyError> {
    let drafts = load_checkpoints(conn, source.id)?
        .iter()
        .map(CheckpointDraft::from_stored)
        .collect::<Result<Vec<_>, _>>()
        .map_err(CopyError::InvalidSource)?;

    let copy = ChecksheetDraft {
        title: copy_title(&source.title),
        description: source.description.clone(),
        category: source.category.clone(),
        industry: source.industry.clone(),
        is_template: false,
        tags: source.tags.clone(),
    };

    Ok(create_checksheet(conn, owner, copy, &drafts)?)
}

/// One checkpoint inside a catalog template's `template_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateCheckpoint {
    #[serde(default, alias = "question")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "fieldType", alias = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default, alias = "isRequired", alias = "required")]
    pub is_required: Option<bool>,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateData {
    #[serde(default)]
    pub checkpoints: Vec<TemplateCheckpoint>,
}

impl TemplateData {
    pub fn parse(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(Self::default()),
            other => serde_json::from_value(other.clone()).map_err(|err| err.to_string()),
        }
    }

    /// Checkpoint drafts with catalog defaults filled in: section "General",
    /// TEXT fields, optional.
    pub fn drafts(&self) -> Result<Vec<CheckpointDraft>, String> {
        self.checkpoints
            .iter()
            .enumerate()
            .map(|(index, checkpoint)| {
                let field_type = match checkpoint.field_type.as_deref() {
                    Some(raw) if !raw.trim().is_empty() => raw
                        .parse::<FieldType>()
                        .map_err(|message| format!("checkpoint {index}: {message}"))?,
                    _ => FieldType::Text,
                };
                let field = FieldConfig::from_parts(field_type, checkpoint.config.as_ref())
                    .map_err(|message| format!("checkpoint {index}: {message}"))?;

                Ok(CheckpointDraft {
                    id: None,
                    title: checkpoint.title.trim().to_string(),
                    description: non_blank(checkpoint.description.clone()),
                    section: non_blank(checkpoint.section.clone())
                        .or_else(|| Some(DEFAULT_SECTION.to_string())),
                    is_required: checkpoint.is_required.unwrap_or(false),
                    field,
                })
            })
            .collect()
    }
}

/// Instantiates a catalog template as a DRAFT checksheet and bumps its usage
/// counter. Run inside a transaction so both happen or neither does.
pub fn clone_template(
    conn: &mut PgConnection,
    template: &BestPracticeTemplate,
    owner: &Principal,
) -> Result<(Checksheet, Vec<Checkpoint>), CopyError> {
    let drafts = TemplateData::parse(&template.template_data)
        .and_then(|data| data.drafts())
        .map_err(CopyError::InvalidSource)?;

    let copy = ChecksheetDraft {
        title: copy_title(&template.title),
        description: template.description.clone(),
        category: Some(template.category.clone()),
        industry: template.industry.clone(),
        is_template: false,
        tags: Vec::new(),
    };
    let created = create_checksheet(conn, owner, copy, &drafts)?;

    diesel::update(best_practice_templates::table.find(template.id))
        .set((
            best_practice_templates::usage_count.eq(best_practice_templates::usage_count + 1),
            best_practice_templates::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> CheckpointInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn validation_reports_every_bad_checkpoint() {
        let errors = validate_checkpoints(vec![
            input(json!({"title": "Exit signs", "fieldType": "CHECKBOX"})),
            input(json!({"title": "", "field_type": "TEXT"})),
            input(json!({"title": "Odor", "field_type": "SMELL"})),
            input(json!({"title": "Level", "field_type": "DROPDOWN", "config": {"options": []}})),
        ])
        .unwrap_err();

        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "checkpoints[1].title",
                "checkpoints[2].field_type",
                "checkpoints[3].config"
            ]
        );
    }

    #[test]
    fn validation_normalizes_drafts() {
        let drafts = validate_checkpoints(vec![input(json!({
            "title": "  Pressure ",
            "fieldType": "number",
            "section": " ",
            "isRequired": true,
            "config": {"min": 0, "max": 10, "unit": "bar"}
        }))])
        .unwrap();

        assert_eq!(drafts[0].title, "Pressure");
        assert_eq!(drafts[0].section, None);
        assert!(drafts[0].is_required);
        assert_eq!(drafts[0].field.field_type(), FieldType::Number);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let id = Uuid::new_v4();
        let errors = validate_checkpoints(vec![
            input(json!({"id": id, "title": "A", "field_type": "TEXT"})),
            input(json!({"id": id, "title": "B", "field_type": "TEXT"})),
        ])
        .unwrap_err();
        assert_eq!(errors[0].field, "checkpoints[1].id");
    }

    #[test]
    fn oversized_checkpoint_text_is_a_field_error() {
        let errors = validate_checkpoints(vec![
            input(json!({"title": "x".repeat(MAX_CHECKPOINT_TITLE_CHARS), "field_type": "TEXT"})),
            input(json!({"title": "y".repeat(600), "field_type": "TEXT"})),
            input(json!({"title": "Gauge", "field_type": "TEXT", "section": "s".repeat(256)})),
        ])
        .unwrap_err();

        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["checkpoints[1].title", "checkpoints[2].section"]);
        assert_eq!(errors[0].message, "must be at most 500 characters");
    }

    #[test]
    fn copies_of_long_titles_still_fit() {
        assert_eq!(copy_title("Ladder Check"), "Ladder Check (Copy)");

        let copied = copy_title(&"é".repeat(MAX_TITLE_CHARS));
        assert_eq!(copied.chars().count(), MAX_TITLE_CHARS);
        assert!(copied.ends_with(COPY_SUFFIX));
    }

    #[test]
    fn template_data_fills_defaults() {
        let data = TemplateData::parse(&json!({
            "checkpoints": [
                {"question": "Guard rails secure?"},
                {"title": "Noise level", "type": "NUMBER", "required": true, "section": "Environment",
                 "config": {"min": 0, "max": 140, "unit": "dB"}}
            ]
        }))
        .unwrap();

        let drafts = data.drafts().unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].title, "Guard rails secure?");
        assert_eq!(drafts[0].section.as_deref(), Some(DEFAULT_SECTION));
        assert_eq!(drafts[0].field.field_type(), FieldType::Text);
        assert!(!drafts[0].is_required);
        assert_eq!(drafts[1].field.field_type(), FieldType::Number);
        assert!(drafts[1].is_required);
    }

    #[test]
    fn empty_template_data_has_no_checkpoints() {
        assert!(TemplateData::parse(&Value::Null).unwrap().drafts().unwrap().is_empty());
        assert!(TemplateData::parse(&json!({})).unwrap().drafts().unwrap().is_empty());
    }
}
