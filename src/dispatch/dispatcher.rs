use std::time::Duration;

use lapin::{options::BasicPublishOptions, publisher_confirm::Confirmation, BasicProperties, Channel};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::address::SharedValidator;
use crate::config::GatewayConfig;
use crate::dispatch::correlation::{CorrelationId, CorrelationRegistry, PendingRequest};
use crate::dispatch::timeout;
use crate::error::DispatchError;
use crate::message::{FundingOutcome, FundingRequest, WorkItem};

/// Turns a one-way publish into a call/response interaction: validates the
/// caller's intent, registers a pending request under a fresh correlation
/// id, publishes the work item with a reply address and expiration, and
/// hands back the outcome when the reply consumer or the timeout supervisor
/// performs the terminal transition.
pub struct RequestDispatcher {
    channel: Channel,
    registry: CorrelationRegistry,
    validator: SharedValidator,
    work_queue: String,
    reply_queue: String,
    default_confirmations: u32,
    max_confirmations: u32,
    reply_timeout: Duration,
    message_ttl_ms: u64,
}

impl RequestDispatcher {
    pub fn new(
        channel: Channel,
        reply_queue: String,
        registry: CorrelationRegistry,
        validator: SharedValidator,
        config: &GatewayConfig,
    ) -> Self {
        RequestDispatcher {
            channel,
            registry,
            validator,
            work_queue: config.work_queue.clone(),
            reply_queue,
            default_confirmations: config.default_confirmations,
            max_confirmations: config.max_confirmations,
            reply_timeout: config.reply_timeout(),
            message_ttl_ms: config.message_ttl_ms,
        }
    }

    /// Submits one funding request and waits for its reply.
    ///
    /// Exactly one registry entry and one timer exist per call, and both are
    /// gone whatever the outcome: the reply path, the timeout path and the
    /// publish-failure rollback all remove the entry, and removal aborts or
    /// outlives the timer.
    pub async fn submit(&self, request: FundingRequest) -> Result<FundingOutcome, DispatchError> {
        let work = validate(
            request,
            self.validator.as_ref(),
            self.default_confirmations,
            self.max_confirmations,
        )?;

        let id = CorrelationId::generate();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.registry.insert(id.clone(), PendingRequest::new(reply_tx));
        let timer = timeout::arm(&self.registry, id.clone(), self.reply_timeout);
        self.registry.arm(&id, timer);

        if let Err(error) = self.publish(&id, &work).await {
            // Roll the entry back; the caller learns the outcome right here.
            if let Some(pending) = self.registry.take(&id) {
                pending.cancel();
            }
            return Err(error);
        }

        debug!(correlation_id = %id, amount = work.amount, "work item published");

        match reply_rx.await {
            Ok(Ok(reply)) => {
                info!(correlation_id = %id, address = %reply.address, "funding request resolved");
                Ok(FundingOutcome::from_reply(reply, work.caller_data))
            }
            Ok(Err(error)) => Err(error),
            // Sender dropped without a terminal transition: the registry
            // itself is gone, which only happens on teardown.
            Err(_) => Err(DispatchError::BrokerUnavailable(
                "reply channel closed".to_string(),
            )),
        }
    }

    async fn publish(&self, id: &CorrelationId, work: &WorkItem) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(work)?;

        let properties = BasicProperties::default()
            .with_correlation_id(id.to_string().into())
            .with_reply_to(self.reply_queue.clone().into())
            .with_content_type("application/json".into())
            .with_expiration(self.message_ttl_ms.to_string().into())
            .with_timestamp(chrono::Utc::now().timestamp() as u64);

        let confirm = self
            .channel
            .basic_publish(
                "",
                &self.work_queue,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| DispatchError::Publish(e.to_string()))?
            .await
            .map_err(|e| DispatchError::Publish(e.to_string()))?;

        if let Confirmation::Nack(_) = confirm {
            return Err(DispatchError::Publish(
                "broker negatively acknowledged the work item".to_string(),
            ));
        }

        Ok(())
    }

    /// Fails every in-flight request; used on shutdown and connection loss.
    /// Returns how many requests were dropped.
    pub fn shutdown(&self, reason: &str) -> usize {
        self.registry.drain(reason)
    }
}

/// Checks the caller's intent against the gateway's limits and builds the
/// immutable work item. Runs before any broker interaction; a rejection here
/// creates no state.
fn validate(
    request: FundingRequest,
    validator: &dyn crate::address::AddressValidator,
    default_confirmations: u32,
    max_confirmations: u32,
) -> Result<WorkItem, DispatchError> {
    let amount = request
        .amount
        .as_u64()
        .filter(|amount| *amount > 0)
        .ok_or_else(|| {
            DispatchError::Validation(
                "amount must be a positive integer in the smallest currency unit".to_string(),
            )
        })?;

    validator
        .decode(&request.address)
        .map_err(|reason| DispatchError::Validation(format!("undecodable address: {}", reason)))?;

    if let Some(callback) = &request.callback {
        if !callback.starts_with("http://") && !callback.starts_with("https://") {
            return Err(DispatchError::Validation(
                "callback must be an http(s) URL".to_string(),
            ));
        }
    }

    let confirmations = match &request.confirmations {
        None => default_confirmations,
        Some(value) => {
            let requested = value.as_u64().ok_or_else(|| {
                DispatchError::Validation("confirmations must be an integer".to_string())
            })?;
            if requested > u64::from(max_confirmations) {
                return Err(DispatchError::Validation(format!(
                    "confirmations must lie in [0, {}]",
                    max_confirmations
                )));
            }
            requested as u32
        }
    };

    Ok(WorkItem {
        amount,
        address: request.address,
        confirmations,
        callback: request.callback,
        caller_data: request.data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn accept_all(_: &str) -> Result<(), String> {
        Ok(())
    }

    fn request(amount: serde_json::Value) -> FundingRequest {
        FundingRequest {
            amount,
            address: "valid123".to_string(),
            confirmations: None,
            callback: None,
            data: Map::new(),
        }
    }

    #[test]
    fn a_valid_request_gets_the_default_confirmation_count() {
        let mut req = request(json!(1_000_000));
        req.data.insert("orderId".to_string(), json!("o-17"));

        let work = validate(req, &accept_all, 6, 100).unwrap();
        assert_eq!(work.amount, 1_000_000);
        assert_eq!(work.address, "valid123");
        assert_eq!(work.confirmations, 6);
        assert_eq!(work.caller_data.get("orderId"), Some(&json!("o-17")));
    }

    #[test]
    fn zero_amount_is_rejected() {
        let result = validate(request(json!(0)), &accept_all, 6, 100);
        assert!(matches!(result, Err(DispatchError::Validation(_))));
    }

    #[test]
    fn non_integral_and_non_numeric_amounts_are_rejected() {
        for bad in [json!(10.5), json!("100"), json!(-5), json!(null)] {
            let result = validate(request(bad), &accept_all, 6, 100);
            assert!(matches!(result, Err(DispatchError::Validation(_))));
        }
    }

    #[test]
    fn an_undecodable_address_is_rejected() {
        let reject_all = |_: &str| -> Result<(), String> { Err("bad checksum".to_string()) };
        let result = validate(request(json!(100)), &reject_all, 6, 100);
        match result {
            Err(DispatchError::Validation(reason)) => {
                assert!(reason.contains("bad checksum"));
            }
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn callbacks_must_carry_an_http_scheme() {
        let mut req = request(json!(100));
        req.callback = Some("ftp://example.com/hook".to_string());
        assert!(matches!(
            validate(req, &accept_all, 6, 100),
            Err(DispatchError::Validation(_))
        ));

        let mut req = request(json!(100));
        req.callback = Some("https://example.com/hook".to_string());
        let work = validate(req, &accept_all, 6, 100).unwrap();
        assert_eq!(work.callback.as_deref(), Some("https://example.com/hook"));
    }

    #[test]
    fn requested_confirmations_within_bounds_are_honored() {
        let mut req = request(json!(100));
        req.confirmations = Some(json!(3));
        let work = validate(req, &accept_all, 6, 100).unwrap();
        assert_eq!(work.confirmations, 3);
    }

    #[test]
    fn out_of_range_confirmations_are_rejected() {
        let mut req = request(json!(100));
        req.confirmations = Some(json!(999_999));
        assert!(matches!(
            validate(req, &accept_all, 6, 100),
            Err(DispatchError::Validation(_))
        ));
    }

    #[test]
    fn non_integral_confirmations_are_rejected() {
        for bad in [json!(1.5), json!("6"), json!(-1)] {
            let mut req = request(json!(100));
            req.confirmations = Some(bad);
            assert!(matches!(
                validate(req, &accept_all, 6, 100),
                Err(DispatchError::Validation(_))
            ));
        }
    }
}
