use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classrail_api::config::Config;
use classrail_api::db;
use classrail_api::db::registry::PgDirectory;
use classrail_api::middleware::auth::JwtSecret;
use classrail_api::routes;
use classrail_api::services::resolver::TenantResolver;
use classrail_api::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    db::reprovision_all_active(&pool).await?;
    info!("Database connected, registry migrated, tenant schemas reconciled");

    let resolver = Arc::new(TenantResolver::new(
        PgDirectory::new(pool.clone()),
        Duration::from_secs(config.tenant_cache_ttl_secs),
    ));

    let state = AppState {
        db: pool,
        config: config.clone(),
        resolver,
    };

    // CORS: the app base domain and its school subdomains; localhost for
    // development.
    let cors_origin = {
        let base = config.app_base_url.clone();
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let o = match origin.to_str() {
                Ok(s) => s,
                Err(_) => return false,
            };
            if o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") {
                return true;
            }
            if o == base {
                return true;
            }
            if let Some(idx) = base.find("://") {
                let after_scheme = &base[idx + 3..];
                let domain = after_scheme.split('/').next().unwrap_or(after_scheme);
                let domain_clean = domain.split(':').next().unwrap_or(domain);
                if o.ends_with(&format!(".{domain_clean}")) {
                    return true;
                }
            }
            false
        })
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("x-school"),
            header::HeaderName::from_static("x-super-admin-key"),
        ]))
        .allow_origin(cors_origin);

    let jwt_secret = JwtSecret(config.jwt_secret.clone());

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        // Auth
        .route("/auth/login", post(routes::auth::login))
        // Tenant context
        .route("/school/context", get(routes::context::get_context))
        .route("/school/info", get(routes::context::get_school_info))
        // Tenant-scoped domain sample
        .route(
            "/students",
            get(routes::students::list_students).post(routes::students::create_student),
        )
        // Super-admin: onboarding and repair
        .route(
            "/super-admin/schools",
            get(routes::schools::list_schools).post(routes::schools::create_school),
        )
        .route(
            "/super-admin/schools/{code}",
            put(routes::schools::update_school),
        )
        .route(
            "/super-admin/schools/{code}/provision",
            post(routes::schools::reprovision_school),
        )
        .route(
            "/super-admin/schools/{code}/reconcile",
            post(routes::schools::reconcile_school),
        )
        .route(
            "/super-admin/schools/{code}/users",
            post(routes::schools::create_school_admin),
        )
        .layer(axum::Extension(jwt_secret))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("classrail API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
