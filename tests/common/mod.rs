use std::collections::VecDeque;
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use gensheet::ai::{ChecksheetGenerator, LanguageModel, ModelError};
use gensheet::auth::jwt::JwtService;
use gensheet::auth::password::hash_password;
use gensheet::config::{AppConfig, DEFAULT_UPLOAD_MAX_BYTES};
use gensheet::db::{self, PgPool};
use gensheet::models::{NewBestPracticeTemplate, NewOrganization, NewUser};
use gensheet::routes;
use gensheet::state::AppState;
use gensheet::storage::{AssetStorage, UploadError, UploadRequest};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Keeps uploads in memory and answers the way a hosted image service does.
#[derive(Default)]
pub struct FakeAssetStorage {
    uploads: Mutex<Vec<UploadRequest>>,
    failing: Mutex<bool>,
}

#[async_trait]
impl AssetStorage for FakeAssetStorage {
    fn backend(&self) -> &'static str {
        "fake"
    }

    async fn upload(&self, request: UploadRequest) -> Result<Value, UploadError> {
        if *self.failing.lock().await {
            return Err(UploadError::Rejected("storage offline".to_string()));
        }
        let public_id = format!("{}/{}", request.folder, Uuid::new_v4());
        let result = json!({
            "public_id": public_id,
            "secure_url": format!("https://assets.test/{public_id}/{}", request.filename),
            "url": format!("http://assets.test/{public_id}/{}", request.filename),
            "bytes": request.bytes.len(),
            "resource_type": if request.is_image() { "image" } else { "raw" },
        });
        self.uploads.lock().await.push(request);
        Ok(result)
    }
}

impl FakeAssetStorage {
    #[allow(dead_code)]
    pub async fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().await.clone()
    }

    #[allow(dead_code)]
    pub async fn fail_uploads(&self) {
        *self.failing.lock().await = true;
    }
}

#[allow(dead_code)]
pub enum ScriptedReply {
    Text(String),
    RateLimited,
}

/// Answers model calls from a queue of scripted replies.
#[derive(Default)]
pub struct FakeModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        self.prompts.lock().await.push(prompt.to_string());
        match self.replies.lock().await.pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::RateLimited) => Err(ModelError::RateLimited),
            None => Err(ModelError::Request("no scripted reply".to_string())),
        }
    }
}

impl FakeModel {
    #[allow(dead_code)]
    pub async fn push(&self, reply: ScriptedReply) {
        self.replies.lock().await.push_back(reply);
    }

    #[allow(dead_code)]
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    assets: Arc<FakeAssetStorage>,
    model: Arc<FakeModel>,
}

impl TestApp {
    /// `None` when `TEST_DATABASE_URL` is not set; callers skip the test.
    pub async fn try_new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return Ok(None);
        };

        let config = AppConfig {
            database_url,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
            cloudinary: None,
            s3: None,
            gemini: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let assets = Arc::new(FakeAssetStorage::default());
        let model = Arc::new(FakeModel::default());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, jwt)
            .with_assets(assets.clone())
            .with_generator(ChecksheetGenerator::new(model.clone()));
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            assets,
            model,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub fn assets(&self) -> Arc<FakeAssetStorage> {
        self.assets.clone()
    }

    #[allow(dead_code)]
    pub fn model(&self) -> Arc<FakeModel> {
        self.model.clone()
    }

    #[allow(dead_code)]
    pub async fn insert_organization(&self, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let organization = NewOrganization {
                id: Uuid::new_v4(),
                name,
            };
            diesel::insert_into(gensheet::schema::organizations::table)
                .values(&organization)
                .execute(conn)
                .context("failed to insert organization")?;
            Ok(organization.id)
        })
        .await
    }

    pub async fn insert_user(
        &self,
        email: &str,
        password: &str,
        role: &str,
        organization_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let email = email.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                email,
                name: None,
                password_hash: hash_password(&password)?,
                role,
                organization_id,
            };
            diesel::insert_into(gensheet::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_template(&self, title: &str, category: &str, data: Value) -> Result<Uuid> {
        let title = title.to_string();
        let category = category.to_string();
        self.with_conn(move |conn| {
            let template = NewBestPracticeTemplate {
                id: Uuid::new_v4(),
                title,
                description: None,
                category,
                industry: None,
                template_data: data,
                is_public: true,
            };
            diesel::insert_into(gensheet::schema::best_practice_templates::table)
                .values(&template)
                .execute(conn)
                .context("failed to insert template")?;
            Ok(template.id)
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    /// Inserts a user and logs them in.
    #[allow(dead_code)]
    pub async fn user_with_token(
        &self,
        email: &str,
        role: &str,
        organization_id: Option<Uuid>,
    ) -> Result<(Uuid, String)> {
        let password = "password123";
        let id = self.insert_user(email, password, role, organization_id).await?;
        let token = self.login_token(email, password).await?;
        Ok((id, token))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.dispatch(method, path, token, Some(("application/json".to_string(), body)))
            .await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.dispatch(Method::GET, path, token, None).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.dispatch(Method::DELETE, path, token, None).await
    }

    /// Runs one request through the router; `body` is `(content type, bytes)`.
    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<(String, Vec<u8>)>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some((content_type, bytes)) => {
                builder = builder.header(CONTENT_TYPE, content_type);
                Body::from(bytes)
            }
            None => Body::empty(),
        };
        Ok(self.router.clone().oneshot(builder.body(body)?).await?)
    }

    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        folder: Option<&str>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");

        if let Some(folder) = folder {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"folder\"\r\n\r\n");
            body.extend(folder.as_bytes());
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        self.dispatch(
            Method::POST,
            "/api/upload",
            Some(token),
            Some((format!("multipart/form-data; boundary={boundary}"), body)),
        )
        .await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

/// Asserts the status and parses the body as JSON.
#[allow(dead_code)]
pub async fn expect_json(response: hyper::Response<Body>, status: StatusCode) -> Result<Value> {
    let actual = response.status();
    let body = body_to_vec(response.into_body()).await?;
    ensure!(
        actual == status,
        "expected {status}, got {actual}: {}",
        String::from_utf8_lossy(&body)
    );
    if body.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&body)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE checkpoint_responses, checksheet_results, checkpoints, checksheets, \
         best_practice_templates, refresh_tokens, users, organizations RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
