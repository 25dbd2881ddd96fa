//! Session endpoints: password login, refresh-token rotation and logout.
//!
//! Access tokens are short-lived JWTs sent as bearer headers. The refresh
//! token travels only in an HttpOnly cookie and is stored as a SHA-256 hash;
//! every refresh revokes the presented token and issues a new one.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    access::Role,
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewRefreshToken, RefreshToken, User},
    routes::users::UserResponse,
    schema::{refresh_tokens, users},
    state::AppState,
};

const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: UserResponse,
}

type SessionReply = (HeaderMap, Json<SessionResponse>);

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<SessionReply> {
    let email = payload.email.trim().to_lowercase();
    let mut conn = state.db()?;

    let Some(user) = users::table
        .filter(users::email.eq(&email))
        .first::<User>(&mut conn)
        .optional()?
    else {
        tracing::info!(email = %email, "login for unknown email");
        return Err(AppError::unauthorized());
    };

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        tracing::info!(user_id = %user.id, "login with wrong password");
        return Err(AppError::unauthorized());
    }

    tracing::info!(user_id = %user.id, role = %user.role, "user logged in");
    start_session(&state, &mut conn, user)
}

/// Trades a live refresh cookie for a new access token and a new cookie.
pub async fn refresh(
    State(state): State<AppState>,
    cookies: Option<TypedHeader<Cookie>>,
) -> AppResult<SessionReply> {
    let presented = cookies
        .as_ref()
        .and_then(|TypedHeader(cookies)| cookies.get(REFRESH_COOKIE))
        .ok_or_else(AppError::unauthorized)?;
    let token_hash = hash_token(presented);
    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let now = Utc::now().naive_utc();
        let token: RefreshToken = refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(&token_hash))
            .filter(refresh_tokens::revoked_at.is_null())
            .filter(refresh_tokens::expires_at.gt(now))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;

        diesel::update(refresh_tokens::table.find(token.id))
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(conn)?;

        let user: User = users::table
            .find(token.user_id)
            .first(conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;
        start_session(&state, conn, user)
    })
}

/// Revokes the presented refresh token, or every live token of the caller
/// when no cookie matches.
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    cookies: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let live = refresh_tokens::table
        .filter(refresh_tokens::user_id.eq(user.user_id))
        .filter(refresh_tokens::revoked_at.is_null());

    let presented = cookies
        .as_ref()
        .and_then(|TypedHeader(cookies)| cookies.get(REFRESH_COOKIE))
        .map(hash_token);
    let mut revoked = 0;
    if let Some(token_hash) = presented {
        revoked = diesel::update(live.clone().filter(refresh_tokens::token_hash.eq(token_hash)))
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
    }
    if revoked == 0 {
        revoked = diesel::update(live)
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
    }

    tracing::info!(user_id = %user.user_id, revoked, "user logged out");
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, refresh_cookie(&state, None)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

/// Issues an access token plus a stored refresh token for `user`.
fn start_session(
    state: &AppState,
    conn: &mut PgConnection,
    user: User,
) -> AppResult<SessionReply> {
    let role: Role = user.role.parse().map_err(AppError::internal)?;
    let access_token = state
        .jwt
        .generate_token(user.id, &user.email, role, user.organization_id)
        .map_err(AppError::from)?;

    let issued_at = Utc::now();
    let expires_at = issued_at + ChronoDuration::days(state.config.refresh_token_expiry_days);
    let refresh_value = new_refresh_value();
    diesel::insert_into(refresh_tokens::table)
        .values(&NewRefreshToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_token(&refresh_value),
            issued_at: issued_at.naive_utc(),
            expires_at: expires_at.naive_utc(),
        })
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        refresh_cookie(state, Some((&refresh_value, expires_at)))?,
    );

    Ok((
        headers,
        Json(SessionResponse {
            access_token,
            token_type: "Bearer",
            expires_in: state.jwt.expiry_seconds(),
            user: UserResponse::from(user),
        }),
    ))
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn new_refresh_value() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `Set-Cookie` value for a fresh token, or one that clears the cookie when
/// `token` is `None`.
fn refresh_cookie(
    state: &AppState,
    token: Option<(&str, DateTime<Utc>)>,
) -> AppResult<HeaderValue> {
    let mut parts = match token {
        Some((value, expires_at)) => {
            let max_age = (expires_at - Utc::now()).num_seconds().max(0);
            vec![
                format!("{REFRESH_COOKIE}={value}"),
                format!("Max-Age={max_age}"),
                format!("Expires={}", expires_at.to_rfc2822()),
            ]
        }
        None => vec![
            format!("{REFRESH_COOKIE}="),
            "Max-Age=0".to_string(),
            "Expires=Thu, 01 Jan 1970 00:00:00 GMT".to_string(),
        ],
    };
    parts.extend(["Path=/api/auth", "HttpOnly", "SameSite=Strict"].map(String::from));
    if state.config.refresh_cookie_secure {
        parts.push("Secure".to_string());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}
