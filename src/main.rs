use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use diesel_migrations::MigrationHarness;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use gensheet::{
    ai::{ChecksheetGenerator, GeminiClient},
    auth::jwt::JwtService,
    cloudinary::CloudinaryStorage,
    config::AppConfig,
    db, routes, s3,
    state::AppState,
    storage::{AssetStorage, S3AssetStorage},
    MIGRATIONS,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        storage = config.storage_backend(),
        ai_enabled = config.gemini.is_some(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    {
        let mut conn = pool.get().context("failed to get database connection")?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        if !applied.is_empty() {
            tracing::info!(count = applied.len(), "applied database migrations");
        }
    }

    let jwt = JwtService::from_config(&config)?;
    let assets = build_asset_storage(&config).await?;
    let generator = match &config.gemini {
        Some(gemini) => {
            let client = GeminiClient::new(gemini)?;
            tracing::info!(model = client.model(), "AI generation enabled");
            Some(ChecksheetGenerator::new(Arc::new(client)))
        }
        None => {
            tracing::warn!("GOOGLE_AI_API_KEY not set; AI generation disabled");
            None
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("invalid SERVER_HOST/SERVER_PORT")?;

    let mut state = AppState::new(pool, config, jwt);
    if let Some(assets) = assets {
        state = state.with_assets(assets);
    }
    if let Some(generator) = generator {
        state = state.with_generator(generator);
    }

    let app = routes::create_router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Cloudinary when configured, otherwise S3, otherwise uploads stay disabled.
async fn build_asset_storage(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn AssetStorage>>> {
    if let Some(cloudinary) = &config.cloudinary {
        let storage = CloudinaryStorage::new(cloudinary)?;
        tracing::info!(cloud_name = %cloudinary.cloud_name, "uploads go to Cloudinary");
        return Ok(Some(Arc::new(storage)));
    }

    if let Some(s3_config) = &config.s3 {
        let client = s3::build_client(s3_config).await?;
        tracing::info!(bucket = %s3_config.bucket, "uploads go to S3");
        return Ok(Some(Arc::new(S3AssetStorage::new(
            client,
            s3_config.bucket.clone(),
            &s3_config.public_base_url,
        ))));
    }

    tracing::warn!("no asset storage configured; uploads disabled");
    Ok(None)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
