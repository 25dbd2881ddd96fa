use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    ai::ChecksheetGenerator,
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    storage::AssetStorage,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    assets: Option<Arc<dyn AssetStorage>>,
    generator: Option<ChecksheetGenerator>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, jwt: JwtService) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            assets: None,
            generator: None,
        }
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetStorage>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn with_generator(mut self, generator: ChecksheetGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    /// The configured upload backend, or 503 when there is none.
    pub fn assets(&self) -> AppResult<&Arc<dyn AssetStorage>> {
        self.assets
            .as_ref()
            .ok_or_else(|| AppError::not_configured("File upload"))
    }

    /// The configured checksheet generator, or 503 when there is none.
    pub fn generator(&self) -> AppResult<&ChecksheetGenerator> {
        self.generator
            .as_ref()
            .ok_or_else(|| AppError::not_configured("AI generation"))
    }
}
