//! Daily job: queues reminder emails for pending flight requests and
//! confirmed reservations travelling in two days. Meant to run from cron.

use anyhow::Context;
use chrono::Utc;
use skyway_core::reminders::enqueue_due_reminders;
use skyway_store::flight_request_repo::PgFlightRequestRepository;
use skyway_store::reservation_repo::PgReservationRepository;
use skyway_store::{Config, DbClient, EventProducer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyway_core=info,send_reminders=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load config")?;
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to Postgres")?;
    let queue = EventProducer::new(&config.kafka.brokers, &config.kafka.notifications_topic)
        .context("failed to create Kafka producer")?;

    let requests = PgFlightRequestRepository::new(db.pool.clone());
    let reservations = PgReservationRepository::new(db.pool.clone());
    let run = enqueue_due_reminders(&requests, &reservations, &queue, Utc::now().date_naive())
        .await
        .context("reminder scan failed")?;

    if run.failed > 0 {
        anyhow::bail!("{} reminders could not be queued", run.failed);
    }
    Ok(())
}
