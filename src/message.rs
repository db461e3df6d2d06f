use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A funding request as handed over by the API layer: structured, but not
/// yet trusted. `amount` and `confirmations` stay raw JSON values so that
/// non-integral input is rejected during validation instead of being
/// silently coerced at the deserialization boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct FundingRequest {
    pub amount: Value,

    pub address: String,

    #[serde(default)]
    pub confirmations: Option<Value>,

    #[serde(default)]
    pub callback: Option<String>,

    /// Opaque key/value mapping echoed back to the caller verbatim.
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// One outbound unit of work. Immutable once published; the correlation id
/// and reply queue travel in the message properties, not the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Amount in the smallest currency unit.
    pub amount: u64,
    pub address: String,
    pub confirmations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    pub caller_data: Map<String, Value>,
}

/// Worker reply payload. Owned by nobody until the correlation id in its
/// message properties matches a pending request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyMessage {
    pub address: String,
    pub scan_height: u64,
    pub max_height: u64,
    pub public_key: String,
}

/// The caller-visible success payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingOutcome {
    pub assigned_address: String,
    pub start_height: u64,
    pub end_height: u64,
    pub callback_public_key: String,
    pub caller_data: Map<String, Value>,
}

impl FundingOutcome {
    pub fn from_reply(reply: ReplyMessage, caller_data: Map<String, Value>) -> Self {
        FundingOutcome {
            assigned_address: reply.address,
            start_height: reply.scan_height,
            end_height: reply.max_height,
            callback_public_key: reply.public_key,
            caller_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn work_item_serializes_to_camel_case_wire_shape() {
        let mut data = Map::new();
        data.insert("orderId".to_string(), json!("o-17"));

        let work = WorkItem {
            amount: 1_000_000,
            address: "valid123".to_string(),
            confirmations: 6,
            callback: Some("https://example.com/notify".to_string()),
            caller_data: data,
        };

        let wire = serde_json::to_value(&work).unwrap();
        assert_eq!(
            wire,
            json!({
                "amount": 1_000_000,
                "address": "valid123",
                "confirmations": 6,
                "callback": "https://example.com/notify",
                "callerData": {"orderId": "o-17"}
            })
        );
    }

    #[test]
    fn absent_callback_is_omitted_from_the_wire() {
        let work = WorkItem {
            amount: 42,
            address: "valid123".to_string(),
            confirmations: 6,
            callback: None,
            caller_data: Map::new(),
        };

        let wire = serde_json::to_value(&work).unwrap();
        assert!(wire.get("callback").is_none());
    }

    #[test]
    fn reply_parses_from_camel_case_wire_shape() {
        let reply: ReplyMessage = serde_json::from_value(json!({
            "address": "valid123",
            "scanHeight": 100,
            "maxHeight": 200,
            "publicKey": "pub"
        }))
        .unwrap();

        assert_eq!(reply.address, "valid123");
        assert_eq!(reply.scan_height, 100);
        assert_eq!(reply.max_height, 200);
        assert_eq!(reply.public_key, "pub");
    }

    #[test]
    fn outcome_carries_reply_fields_and_echoed_data() {
        let mut data = Map::new();
        data.insert("k".to_string(), json!("v"));

        let reply = ReplyMessage {
            address: "valid123".to_string(),
            scan_height: 100,
            max_height: 200,
            public_key: "pub".to_string(),
        };

        let outcome = FundingOutcome::from_reply(reply, data.clone());
        assert_eq!(outcome.assigned_address, "valid123");
        assert_eq!(outcome.start_height, 100);
        assert_eq!(outcome.end_height, 200);
        assert_eq!(outcome.callback_public_key, "pub");
        assert_eq!(outcome.caller_data, data);
    }
}
