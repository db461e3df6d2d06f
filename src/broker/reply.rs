use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions},
    types::FieldTable,
    Channel,
};
use tracing::{debug, error, info, warn};

use crate::dispatch::correlation::{CorrelationId, CorrelationRegistry};
use crate::message::ReplyMessage;

/// What became of one delivery on the reply queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Matched a pending request and resolved its future.
    Matched,
    /// Carried an unknown, already-resolved or foreign correlation id.
    Unroutable,
    /// Missing correlation id or undecodable payload.
    Malformed,
}

/// Attaches the single reply consumer for this process's lifetime and spawns
/// the routing loop. Called exactly once, at startup — never per request:
/// multiple consumers on the same queue would round-robin replies away from
/// the one registry that can match them.
pub async fn attach(
    channel: &Channel,
    reply_queue: &str,
    registry: CorrelationRegistry,
) -> Result<(), lapin::Error> {
    let mut consumer = channel
        .basic_consume(
            reply_queue,
            "reply-consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue = %reply_queue, "reply consumer attached");

    let channel = channel.clone();
    tokio::spawn(async move {
        while let Some(delivery_result) = consumer.next().await {
            match delivery_result {
                Ok(delivery) => handle(&registry, delivery).await,
                Err(e) => {
                    error!("error receiving reply: {}", e);
                    if !channel.status().connected() {
                        break;
                    }
                }
            }
        }

        // The stream only ends with the connection. Correlation state tied
        // to a dead reply queue can never be satisfied, so every pending
        // request shares the broker's fate.
        let dropped = registry.drain("broker connection lost");
        if dropped > 0 {
            error!(dropped, "reply stream ended with requests still pending");
        } else {
            warn!("reply stream ended");
        }
    });

    Ok(())
}

/// Every delivery is acknowledged, matched or not. The reply queue is
/// exclusive to this process: requeueing an unroutable reply would only
/// redeliver it here, forever, with no consumer ever able to claim it.
async fn handle(registry: &CorrelationRegistry, delivery: Delivery) {
    let correlation_id = delivery
        .properties
        .correlation_id()
        .as_ref()
        .map(|id| id.as_str().to_string());

    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!("failed to acknowledge reply: {}", e);
    }

    route(registry, correlation_id.as_deref(), &delivery.data);
}

/// Routes one reply into the registry. Never raises: unroutable and
/// malformed replies are logged and dropped, and a malformed reply for a
/// live id leaves the entry pending for the timeout supervisor.
pub(crate) fn route(
    registry: &CorrelationRegistry,
    correlation_id: Option<&str>,
    payload: &[u8],
) -> RouteOutcome {
    let id = match correlation_id {
        Some(id) => CorrelationId::from(id),
        None => {
            warn!("reply without a correlation id, discarding");
            return RouteOutcome::Malformed;
        }
    };

    let reply: ReplyMessage = match serde_json::from_slice(payload) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(correlation_id = %id, "malformed reply discarded: {}", e);
            return RouteOutcome::Malformed;
        }
    };

    match registry.take(&id) {
        Some(pending) => {
            info!(
                correlation_id = %id,
                latency_ms = pending.age().as_millis() as u64,
                address = %reply.address,
                "reply matched"
            );
            pending.resolve(reply);
            RouteOutcome::Matched
        }
        None => {
            debug!(correlation_id = %id, "unroutable reply discarded");
            RouteOutcome::Unroutable
        }
    }
}
