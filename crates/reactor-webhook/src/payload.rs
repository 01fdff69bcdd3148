//! Webhook payload shaping per §4.5: `{id, event, collection, timestamp,
//! webhook:{id,name}, data:{document, previousDocument?}}`, with
//! subscription-configured fields removed from `document`/`previousDocument`
//! before shaping.

use chrono::Utc;
use reactor_types::jsonpath::mask_fields;
use reactor_types::{Event, Mutation, WebhookSubscription};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn build_payload(
    delivery_id: Uuid,
    subscription: &WebhookSubscription,
    mutation: &Mutation,
) -> Value {
    // §4.8 item 2 / Mutation::operand: new for create/update, old for delete.
    let mut document = mutation.operand().cloned();
    // previousDocument only makes sense alongside a new document, i.e. update.
    let mut previous_document = match mutation.event {
        Event::Update => mutation.old.clone(),
        Event::Create | Event::Delete => None,
    };

    if !subscription.exclude_fields.is_empty() {
        if let Some(doc) = document.as_mut() {
            mask_fields(doc, &subscription.exclude_fields);
        }
        if let Some(doc) = previous_document.as_mut() {
            mask_fields(doc, &subscription.exclude_fields);
        }
    }

    let mut data = serde_json::Map::new();
    data.insert("document".to_string(), document.unwrap_or(Value::Null));
    if let Some(prev) = previous_document {
        data.insert("previousDocument".to_string(), prev);
    }

    json!({
        "id": delivery_id,
        "event": mutation.event.as_str(),
        "collection": mutation.collection,
        "timestamp": Utc::now().to_rfc3339(),
        "webhook": {
            "id": subscription.id,
            "name": subscription.name,
        },
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_types::Event;
    use serde_json::json;

    fn subscription() -> WebhookSubscription {
        WebhookSubscription {
            id: Uuid::new_v4(),
            name: "order-webhook".into(),
            url: "https://example.com/hook".into(),
            collection: "orders".into(),
            events: vec![Event::Update],
            enabled: true,
            filter: None,
            exclude_fields: vec!["ssn".to_string(), "address.secret".to_string()],
            max_requests_per_minute: 60,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 60_000,
            priority: 0,
            fixed_delay_ms: None,
            extra_headers: vec![],
        }
    }

    #[test]
    fn test_payload_masks_excluded_fields() {
        let sub = subscription();
        let mutation = Mutation::new_update(
            "orders".into(),
            json!({"ssn": "123", "address": {"city": "NYC", "secret": "x"}}),
            json!({}),
        );
        let payload = build_payload(Uuid::new_v4(), &sub, &mutation);
        let doc = &payload["data"]["document"];
        assert!(doc.get("ssn").is_none());
        assert_eq!(doc["address"]["city"], "NYC");
        assert!(doc["address"].get("secret").is_none());
    }

    #[test]
    fn test_delete_payload_omits_previous_document_when_absent() {
        let sub = subscription();
        let mutation = Mutation::new_delete("orders".into(), json!({"id": 1}));
        let payload = build_payload(Uuid::new_v4(), &sub, &mutation);
        assert_eq!(payload["data"]["document"], json!({"id": 1}));
        assert!(payload["data"].get("previousDocument").is_none());
    }

    #[test]
    fn test_update_payload_includes_previous_document() {
        let sub = subscription();
        let mutation = Mutation::new_update(
            "orders".into(),
            json!({"status": "shipped"}),
            json!({"status": "pending"}),
        );
        let payload = build_payload(Uuid::new_v4(), &sub, &mutation);
        assert_eq!(payload["data"]["previousDocument"]["status"], "pending");
    }
}
