use std::time::Duration;

use lapin::{
    options::{BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::GatewayConfig;

const MAX_CONNECT_ATTEMPTS: u32 = 5;
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// The process-wide broker context: one connection, one channel, both
/// established before any traffic is accepted and torn down explicitly.
///
/// Startup declares the durable work queue shared by all worker instances
/// and a server-named reply queue that is exclusive to this process and
/// disappears with it.
pub struct BrokerContext {
    connection: Connection,
    pub channel: Channel,
    pub work_queue: String,
    pub reply_queue: String,
}

impl BrokerContext {
    /// Connects and declares everything the dispatcher needs. An error here
    /// is fatal to the process; there is no degraded mode.
    pub async fn connect(config: &GatewayConfig) -> Result<Self, lapin::Error> {
        let connection = establish(&config.amqp_addr).await?;
        let channel = connection.create_channel().await?;

        // Publisher confirms so a rejected work item surfaces on the
        // submit path instead of vanishing.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await?;

        channel
            .queue_declare(
                &config.work_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        // Server-named, exclusive, gone when this process is.
        let reply_queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        let reply_queue = reply_queue.name().as_str().to_string();

        info!(
            work_queue = %config.work_queue,
            reply_queue = %reply_queue,
            "broker context ready"
        );

        Ok(BrokerContext {
            connection,
            channel,
            work_queue: config.work_queue.clone(),
            reply_queue,
        })
    }

    pub async fn close(self) -> Result<(), lapin::Error> {
        info!("closing broker context");
        self.channel.close(0, "gateway shutting down").await?;
        self.connection.close(0, "gateway shutting down").await?;
        Ok(())
    }
}

async fn establish(uri: &str) -> Result<Connection, lapin::Error> {
    let mut attempts = 0;
    let mut delay = INITIAL_RETRY_DELAY_MS;

    loop {
        info!("connecting to broker at {}", uri);

        match Connection::connect(uri, ConnectionProperties::default()).await {
            Ok(connection) => {
                info!("connected to broker");
                return Ok(connection);
            }
            Err(err) => {
                attempts += 1;
                error!(
                    "failed to connect to broker (attempt {}/{}): {:?}",
                    attempts, MAX_CONNECT_ATTEMPTS, err
                );

                if attempts >= MAX_CONNECT_ATTEMPTS {
                    error!("max connection attempts reached, giving up");
                    return Err(err);
                }

                // Exponential backoff with jitter.
                let jitter = (rand::random::<f64>() * 0.3 - 0.15) * delay as f64;
                let wait = (delay as f64 + jitter).max(0.0) as u64;
                info!("waiting {}ms before next connect attempt", wait);
                sleep(Duration::from_millis(wait)).await;

                delay = std::cmp::min(delay * 2, MAX_RETRY_DELAY_MS);
            }
        }
    }
}
