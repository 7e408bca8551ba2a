use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpResponse, HttpServer};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use dumps::config::AppConfig;
use dumps::openapi::ApiDoc;
use dumps::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use dumps::repo::Repo;
use dumps::storage::{ImageStore, LocalImageStore, S3Presigner, UploadPresigner};
use dumps::{config, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping Dumps API");
    let cfg = AppConfig::from_env();

    let repo = build_repo(&cfg).await?;
    let image_store: Arc<dyn ImageStore> = Arc::new(LocalImageStore::new(&cfg.upload_dir)?);
    let presigner: Option<Arc<dyn UploadPresigner>> = match &cfg.s3 {
        Some(s3) => match S3Presigner::new(s3).await {
            Ok(p) => Some(Arc::new(p) as Arc<dyn UploadPresigner>),
            Err(e) => {
                warn!("S3 presigner unavailable: {e}");
                None
            }
        },
        None => {
            info!("S3_BUCKET_NAME not set; presigned uploads disabled");
            None
        }
    };
    let rate_limiter = RateLimiterFacade::new(
        InMemoryRateLimiter::new(cfg.rate_limit_enabled),
        RateLimitConfig::from_env(),
    );
    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(h) => Some(h),
        Err(e) => {
            warn!("metrics recorder not installed: {e}");
            None
        }
    };

    let state = AppState {
        repo,
        image_store,
        presigner,
        rate_limiter: Some(rate_limiter),
        trust_forwarded: cfg.trust_forwarded,
    };
    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let mut app = App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()));

        if let Some(handle) = metrics_handle.clone() {
            app = app.route(
                "/metrics",
                web::get().to(move || {
                    let body = handle.render();
                    async move { HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(body) }
                }),
            );
        }
        app
    })
    .bind(cfg.bind_addr.as_str())?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await?;
    Ok(())
}

async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    if let Some(repo) = postgres_repo(cfg).await? {
        return Ok(repo);
    }
    fallback_repo()
}

#[cfg(feature = "postgres-store")]
async fn postgres_repo(cfg: &AppConfig) -> anyhow::Result<Option<Arc<dyn Repo>>> {
    use sqlx::postgres::PgPoolOptions;

    let Some(url) = cfg.database_url.as_deref() else { return Ok(None) };
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_max_connections)
        .connect(url)
        .await?;
    let repo = dumps::repo::pg::PgRepo::new(pool);
    repo.migrate().await?;
    info!("Using Postgres repository backend");
    Ok(Some(Arc::new(repo)))
}

#[cfg(not(feature = "postgres-store"))]
async fn postgres_repo(_cfg: &AppConfig) -> anyhow::Result<Option<Arc<dyn Repo>>> {
    Ok(None)
}

#[cfg(feature = "inmem-store")]
fn fallback_repo() -> anyhow::Result<Arc<dyn Repo>> {
    info!("DATABASE_URL not set; using in-memory repository backend");
    Ok(Arc::new(dumps::repo::inmem::InMemRepo::new()))
}

#[cfg(not(feature = "inmem-store"))]
fn fallback_repo() -> anyhow::Result<Arc<dyn Repo>> {
    Err(anyhow::anyhow!("DATABASE_URL must be set when the in-memory store is disabled"))
}
