use anyhow::Context;
use skyway_api::{app, state::{AppState, AuthConfig}};
use skyway_core::cache::ResponseCache;
use skyway_store::airline_repo::PgAirlineRepository;
use skyway_store::destination_repo::PgDestinationRepository;
use skyway_store::flight_repo::PgFlightRepository;
use skyway_store::flight_request_repo::PgFlightRequestRepository;
use skyway_store::passenger_repo::PgPassengerRepository;
use skyway_store::reservation_repo::PgReservationRepository;
use skyway_store::user_repo::PgUserRepository;
use skyway_store::{Config, DbClient, EventProducer, RedisCache};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyway_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load config")?;
    tracing::info!("Starting Skyway API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to Postgres")?;
    if config.database.run_migrations {
        db.migrate().await.context("failed to run migrations")?;
    }

    // Redis
    let redis = Arc::new(RedisCache::new(&config.redis.url).context("invalid Redis url")?);
    let cache = if config.cache.enabled {
        ResponseCache::new(
            redis,
            config.cache.namespace.clone(),
            Duration::from_secs(config.cache.ttl_seconds),
        )
    } else {
        tracing::warn!("response cache disabled");
        ResponseCache::disabled(redis)
    };

    // Kafka
    let queue = EventProducer::new(&config.kafka.brokers, &config.kafka.notifications_topic)
        .context("failed to create Kafka producer")?;

    let pool = db.pool.clone();
    let state = AppState {
        airlines: Arc::new(PgAirlineRepository::new(pool.clone())),
        destinations: Arc::new(PgDestinationRepository::new(pool.clone())),
        flights: Arc::new(PgFlightRepository::new(pool.clone())),
        flight_requests: Arc::new(PgFlightRequestRepository::new(pool.clone())),
        reservations: Arc::new(PgReservationRepository::new(pool.clone())),
        passengers: Arc::new(PgPassengerRepository::new(pool.clone())),
        users: Arc::new(PgUserRepository::new(pool)),
        cache,
        queue: Arc::new(queue),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        page_size: config.pagination.page_size,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}
