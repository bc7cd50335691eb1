use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::response::IntoResponse;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coinvault_backend::config::Config;
use coinvault_backend::db::{
    postgres_billing_customer_repository::PostgresBillingCustomerRepository,
    postgres_plan_repository::PostgresPlanRepository,
    postgres_stripe_event_log_repository::PostgresStripeEventLogRepository,
    postgres_subscription_repository::PostgresSubscriptionRepository,
};
use coinvault_backend::responses::JsonResponse;
use coinvault_backend::routes::api_router;
use coinvault_backend::services::billing::{CustomerManager, PlanCatalog, SubscriptionManager};
use coinvault_backend::services::identity::HttpIdentityVerifier;
use coinvault_backend::services::stripe::{LiveStripeService, StripeService};
use coinvault_backend::state::AppState;

#[cfg(feature = "tls")]
use axum_server::tls_rustls::RustlsConfig;

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .with(sentry_tracing::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env()?);

    // Keep the guard alive for the whole process so queued events are flushed.
    let _sentry = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    init_tracing();

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(config.rate_limit.per_millisecond)
            .burst_size(config.rate_limit.burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .ok_or_else(|| anyhow!("invalid rate limiter settings"))?,
    );

    // Background task to cleanup old IPs
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let pg_pool = establish_connection(&config.database_url).await?;
    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("failed to run database migrations")?;

    let stripe: Arc<dyn StripeService> = Arc::new(LiveStripeService::from_settings(&config.stripe));

    let plans = PlanCatalog::new(Arc::new(PostgresPlanRepository {
        pool: pg_pool.clone(),
    }));
    let customers = CustomerManager::new(
        Arc::new(PostgresBillingCustomerRepository {
            pool: pg_pool.clone(),
        }),
        stripe.clone(),
    );
    let subscriptions = SubscriptionManager::new(
        Arc::new(PostgresSubscriptionRepository {
            pool: pg_pool.clone(),
        }),
        plans.clone(),
        customers,
        stripe.clone(),
    );

    let state = AppState {
        subscriptions: Arc::new(subscriptions),
        plans,
        identity: Arc::new(
            HttpIdentityVerifier::from_settings(&config.identity)
                .context("failed to build identity client")?,
        ),
        stripe,
        stripe_event_log_repo: Arc::new(PostgresStripeEventLogRepository { pool: pg_pool }),
        config: config.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_origin
                .parse::<HeaderValue>()
                .context("FRONTEND_ORIGIN is not a valid header value")?,
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let app = api_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = config.bind_addr;

    #[cfg(feature = "tls")]
    {
        // TLS: Only run this block when `--features tls` is used
        let tls_config = RustlsConfig::from_pem_file(
            std::env::var("DEV_CERT_LOCATION").context("DEV_CERT_LOCATION must be set")?,
            std::env::var("DEV_KEY_LOCATION").context("DEV_KEY_LOCATION must be set")?,
        )
        .await
        .context("failed to load TLS certs")?;

        info!(%addr, "listening with TLS");
        axum_server::bind_rustls(addr, tls_config)
            .serve(make_service)
            .await?;
        return Ok(());
    }

    #[allow(unreachable_code)]
    {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "listening without TLS");
        axum::serve(listener, make_service).await?;
        Ok(())
    }
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("failed to verify database connection")?;

    info!("connected to the database");
    Ok(pool)
}
