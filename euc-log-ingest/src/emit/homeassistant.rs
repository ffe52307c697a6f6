use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::EventSink;
use crate::error::IngestError;
use crate::metric::ChangeEvent;

pub const STATE_CHANGED_EVENT: &str = "state_changed";

#[derive(Serialize)]
struct StateChanged<'a> {
    entity_id: &'a str,
    new_state: State<'a>,
}

#[derive(Serialize)]
struct State<'a> {
    entity_id: &'a str,
    state: &'a str,
    attributes: &'a BTreeMap<String, String>,
    last_changed: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl<'a> From<&'a ChangeEvent> for StateChanged<'a> {
    fn from(event: &'a ChangeEvent) -> Self {
        Self {
            entity_id: &event.entity_key,
            new_state: State {
                entity_id: &event.entity_key,
                state: &event.value,
                attributes: &event.attributes,
                last_changed: event.timestamp,
                last_updated: event.timestamp,
            },
        }
    }
}

/// Fires every change as a `state_changed` event on a Home Assistant event bus,
/// through its REST API and a long-lived access token.
pub struct HomeAssistantSink {
    client: Client,
    url: String,
    token: String,
}

impl HomeAssistantSink {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Sink(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            url: format!(
                "{}/api/events/{STATE_CHANGED_EVENT}",
                base_url.trim_end_matches('/')
            ),
            token: token.to_owned(),
        })
    }
}

#[async_trait]
impl EventSink for HomeAssistantSink {
    async fn publish(&self, event: ChangeEvent) -> Result<(), IngestError> {
        let sink = |e: reqwest::Error| {
            IngestError::Sink(format!("failed to fire {}: {e}", event.entity_key))
        };

        self.client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&StateChanged::from(&event))
            .send()
            .await
            .map_err(sink)?
            .error_for_status()
            .map_err(sink)?;

        debug!(entity = %event.entity_key, value = %event.value, "fired state change");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    use super::*;

    fn event() -> ChangeEvent {
        ChangeEvent {
            entity_key: "sensor.v11_voltage".to_string(),
            value: "84.2".to_string(),
            attributes: BTreeMap::from([
                ("source".to_string(), "euc_logs".to_string()),
                ("unit_of_measurement".to_string(), "V".to_string()),
            ]),
            timestamp: Utc.with_ymd_and_hms(2021, 6, 1, 10, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_posts_state_changed_event() {
        let server = MockServer::start();
        let fired = server.mock(|when, then| {
            when.method(POST)
                .path("/api/events/state_changed")
                .header("authorization", "Bearer long-lived")
                .json_body(json!({
                    "entity_id": "sensor.v11_voltage",
                    "new_state": {
                        "entity_id": "sensor.v11_voltage",
                        "state": "84.2",
                        "attributes": {"source": "euc_logs", "unit_of_measurement": "V"},
                        "last_changed": "2021-06-01T10:00:00Z",
                        "last_updated": "2021-06-01T10:00:00Z",
                    },
                }));
            then.status(200)
                .json_body(json!({"message": "Event state_changed fired."}));
        });

        let sink =
            HomeAssistantSink::new(&server.url("/"), "long-lived", Duration::from_secs(5)).unwrap();
        sink.publish(event()).await.unwrap();
        assert_eq!(fired.hits(), 1);
    }

    #[tokio::test]
    async fn test_rejected_event_is_a_sink_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/events/state_changed");
            then.status(401).body("401: Unauthorized");
        });

        let sink = HomeAssistantSink::new(&server.base_url(), "bad", Duration::from_secs(5))
            .unwrap();
        assert!(matches!(
            sink.publish(event()).await,
            Err(IngestError::Sink(_))
        ));
    }
}
