//! Paydesk job engine - worker daemon entry point

mod config;
mod logging;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use paydesk_core::application::{
    Broker, ConnectionState, EmailDispatchHandler, GeneratePayrollHandler,
};
use paydesk_core::domain::queue::{EMAIL_QUEUE, PAYROLL_QUEUE};
use paydesk_core::domain::QueueTopology;
use paydesk_core::port::id_provider::UuidProvider;
use paydesk_core::port::time_provider::SystemTimeProvider;
use paydesk_core::port::{EmailSender, JobPublisher, TimeProvider};
use paydesk_infra_amqp::LapinConnector;
use paydesk_infra_mail::{LogEmailSender, SmtpEmailSender};
use paydesk_infra_sqlite::{create_pool, run_migrations, SqlitePayrollStore};

use crate::config::DaemonConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = DaemonConfig::load().context("Failed to load configuration")?;

    // 2. Initialize logging
    logging::init(&config.log_format)?;

    info!("Paydesk job engine v{} starting...", VERSION);

    // 3. Initialize database
    info!(database_url = %config.database_url, "Initializing database...");
    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 4. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(SqlitePayrollStore::new(pool.clone(), time_provider.clone()));

    let sender: Arc<dyn EmailSender> = match config.smtp_config() {
        Some(smtp) => {
            info!(host = %smtp.host, port = smtp.port, "Using SMTP email sender");
            Arc::new(SmtpEmailSender::from_config(smtp).context("SMTP setup failed")?)
        }
        None => {
            warn!("No SMTP host configured; emails will only be logged");
            Arc::new(LogEmailSender::new())
        }
    };

    // 5. Connect to the broker (fatal on failure)
    let broker = Broker::new(config.broker_config(), Arc::new(LapinConnector::default()));
    broker
        .initialize()
        .await
        .context("Broker initialization failed")?;

    // 6. Provision topologies and start consumers
    broker
        .setup_queue_with_dlx(&QueueTopology::payroll_generation())
        .await
        .context("Payroll topology setup failed")?;
    broker
        .setup_queue_with_dlx(&QueueTopology::email_dispatch())
        .await
        .context("Email topology setup failed")?;

    let payroll_handler = Arc::new(GeneratePayrollHandler::new(
        store,
        Arc::new(UuidProvider),
        time_provider,
    ));
    broker
        .consume(PAYROLL_QUEUE, payroll_handler, config.payroll_concurrency)
        .await
        .context("Payroll consumer registration failed")?;

    let publisher: Arc<dyn JobPublisher> = Arc::new(broker.clone());
    let email_handler = Arc::new(EmailDispatchHandler::new(sender, publisher));
    broker
        .consume(EMAIL_QUEUE, email_handler, config.email_concurrency)
        .await
        .context("Email consumer registration failed")?;

    info!("System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal or permanent broker failure
    let mut state = broker.subscribe_state();
    let failed = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Shutdown signal received. Exiting gracefully...");
            false
        }
        _ = state.wait_for(|s| *s == ConnectionState::Failed) => {
            error!("Broker reconnection attempts exhausted");
            true
        }
    };

    // 8. Graceful shutdown
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker close reported an error");
    }
    pool.close().await;

    if failed {
        anyhow::bail!("broker connection failed permanently");
    }

    info!("Shutdown complete.");
    Ok(())
}
