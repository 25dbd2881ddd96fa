use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access::{authorize, Action, Resource, Role};
use crate::auth::{password, AuthenticatedUser};
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{NewUser, User};
use crate::routes::ConfirmQuery;
use crate::schema::users;
use crate::state::AppState;
use crate::utils::json::nullable_field;

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub organization_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            organization_id: user.organization_id,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub search: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: Option<String>,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
    pub organization_id: Option<Uuid>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UserChangeset {
    name: Option<Option<String>>,
    role: Option<String>,
    password_hash: Option<String>,
    organization_id: Option<Option<Uuid>>,
    updated_at: Option<NaiveDateTime>,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<Json<Vec<UserResponse>>> {
    authorize(&user.principal(), Action::ManageUsers, &Resource::None)?;
    let mut conn = state.db()?;

    let mut listing = users::table.into_boxed();
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        listing = listing.filter(
            users::email
                .ilike(pattern.clone())
                .or(users::name.ilike(pattern)),
        );
    }
    if let Some(role) = query.role.as_deref().filter(|r| !r.trim().is_empty()) {
        let role: Role = role.parse().map_err(AppError::bad_request)?;
        listing = listing.filter(users::role.eq(role.as_str()));
    }

    let rows: Vec<User> = listing.order(users::created_at.desc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    authorize(&user.principal(), Action::ManageUsers, &Resource::None)?;

    let email = payload.email.trim().to_lowercase();
    let mut errors = Vec::new();
    if !looks_like_email(&email) {
        errors.push(FieldError::new("email", "a valid email address is required"));
    }
    if let Err(message) = check_password(&payload.password) {
        errors.push(FieldError::new("password", message));
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email,
        name: payload
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()),
        password_hash: password::hash_password(&payload.password)?,
        role: payload.role.unwrap_or(Role::Inspector).as_str().to_string(),
        organization_id: payload.organization_id.or(user.organization_id),
    };

    let mut conn = state.db()?;
    match diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => return Err(AppError::conflict("email already registered")),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::ForeignKeyViolation,
            _,
        )) => {
            return Err(AppError::validation(vec![FieldError::new(
                "organization_id",
                "unknown organization",
            )]))
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let created: User = users::table.find(new_user.id).first(&mut conn)?;
    tracing::info!(user_id = %created.id, role = %created.role, created_by = %user.user_id, "user created");
    Ok((StatusCode::CREATED, Json(UserResponse::from(created))))
}

pub async fn update_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<UserResponse>> {
    authorize(&user.principal(), Action::ManageUsers, &Resource::None)?;
    let mut conn = state.db()?;
    let _existing: User = users::table.find(user_id).first(&mut conn)?;

    let mut errors = Vec::new();
    let mut changes = UserChangeset::default();

    match nullable_field(&body, "name") {
        Ok(name) => changes.name = name,
        Err(err) => errors.push(err),
    }
    match body.get("role") {
        None => {}
        Some(Value::String(role)) => match role.parse::<Role>() {
            Ok(role) if user_id == user.user_id && role != Role::Admin => errors.push(
                FieldError::new("role", "you cannot remove your own administrator role"),
            ),
            Ok(role) => changes.role = Some(role.as_str().to_string()),
            Err(message) => errors.push(FieldError::new("role", message)),
        },
        Some(_) => errors.push(FieldError::new("role", "expected a role name")),
    }
    match body.get("password") {
        None | Some(Value::Null) => {}
        Some(Value::String(new_password)) => match check_password(new_password) {
            Ok(()) => changes.password_hash = Some(password::hash_password(new_password)?),
            Err(message) => errors.push(FieldError::new("password", message)),
        },
        Some(_) => errors.push(FieldError::new("password", "expected a string")),
    }
    match body.get("organization_id") {
        None => {}
        Some(Value::Null) => changes.organization_id = Some(None),
        Some(Value::String(raw)) => match raw.parse::<Uuid>() {
            Ok(id) => changes.organization_id = Some(Some(id)),
            Err(_) => errors.push(FieldError::new("organization_id", "expected a UUID")),
        },
        Some(_) => errors.push(FieldError::new("organization_id", "expected a UUID or null")),
    }

    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    changes.updated_at = Some(Utc::now().naive_utc());
    diesel::update(users::table.find(user_id))
        .set(&changes)
        .execute(&mut conn)?;

    let updated: User = users::table.find(user_id).first(&mut conn)?;
    tracing::info!(user_id = %updated.id, updated_by = %user.user_id, "user updated");
    Ok(Json(UserResponse::from(updated)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Query(confirm): Query<ConfirmQuery>,
) -> AppResult<StatusCode> {
    authorize(&user.principal(), Action::ManageUsers, &Resource::None)?;
    confirm.require()?;
    if user_id == user.user_id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }

    let mut conn = state.db()?;
    let deleted = diesel::delete(users::table.find(user_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    tracing::info!(user_id = %user_id, deleted_by = %user.user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

/// Any signed-in user may rename themself or change their password.
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let existing: User = users::table.find(user.user_id).first(&mut conn)?;
    let mut changes = UserChangeset::default();

    if let Some(name) = payload.name {
        let name = name.trim();
        changes.name = Some((!name.is_empty()).then(|| name.to_string()));
    }

    if let Some(new_password) = payload.new_password {
        let current = payload.current_password.unwrap_or_default();
        let valid = password::verify_password(&current, &existing.password_hash)?;
        if !valid {
            return Err(AppError::validation(vec![FieldError::new(
                "current_password",
                "current password is incorrect",
            )]));
        }
        check_password(&new_password)
            .map_err(|message| AppError::validation(vec![FieldError::new("new_password", message)]))?;
        changes.password_hash = Some(password::hash_password(&new_password)?);
    }

    changes.updated_at = Some(Utc::now().naive_utc());
    diesel::update(users::table.find(user.user_id))
        .set(&changes)
        .execute(&mut conn)?;

    let updated: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(UserResponse::from(updated)))
}

fn check_password(candidate: &str) -> Result<(), String> {
    if candidate.chars().count() < password::MIN_PASSWORD_LENGTH {
        Err(format!(
            "password must be at least {} characters",
            password::MIN_PASSWORD_LENGTH
        ))
    } else {
        Ok(())
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !email.contains(' ')
        }
        None => false,
    }
}

/// Escapes `%`, `_` and `\` for use inside an ILIKE pattern.
pub(crate) fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
