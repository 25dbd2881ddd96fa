use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = organizations)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organizations)]
pub struct NewOrganization {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub organization_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = checksheets)]
pub struct Checksheet {
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
}

#[derive(Debug, Insertable)]
#[diesel(table_name = checksheets)]
pub struct NewChecksheet {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub industry: Option<String>,
    pub status: String,
    pub is_template: bool,
    pub tags: Vec<String>,
    pub creator_id: Uuid,
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = checkpoints)]
#[diesel(belongs_to(Checksheet))]
pub struct Checkpoint {
    pub id: Uuid,
    pub checksheet_id: Uuid,
    pub position: i32,
    pub title: String,
    pub description: Option<String>,
    pub field_type: String,
    pub section: Option<String>,
    pub is_required: bool,
    pub config: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = checkpoints)]
pub struct NewCheckpoint {
    pub id: Uuid,
    pub checksheet_id: Uuid,
    pub position: i32,
    pub title: String,
    pub description: Option<String>,
    pub field_type: String,
    pub section: Option<String>,
    pub is_required: bool,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = checksheet_results)]
#[diesel(belongs_to(Checksheet))]
pub struct ChecksheetResult {
    pub id: Uuid,
    pub checksheet_id: Uuid,
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

#[derive(Debug, Insertable)]
#[diesel(table_name = checksheet_results)]
pub struct NewChecksheetResult {
    pub id: Uuid,
    pub checksheet_id: Uuid,
    pub inspector_id: Uuid,
    pub status: String,
    pub location: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub notes: Option<String>,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = checkpoint_responses)]
#[diesel(belongs_to(ChecksheetResult, foreign_key = result_id))]
#[diesel(belongs_to(Checkpoint))]
pub struct CheckpointResponse {
    pub id: Uuid,
    pub result_id: Uuid,
    pub checkpoint_id: Uuid,
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = checkpoint_responses)]
pub struct NewCheckpointResponse {
    pub id: Uuid,
    pub result_id: Uuid,
    pub checkpoint_id: Uuid,
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

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = best_practice_templates)]
pub struct BestPracticeTemplate {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub industry: Option<String>,
    pub template_data: serde_json::Value,
    pub is_public: bool,
    pub usage_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = best_practice_templates)]
pub struct NewBestPracticeTemplate {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub industry: Option<String>,
    pub template_data: serde_json::Value,
    pub is_public: bool,
}
