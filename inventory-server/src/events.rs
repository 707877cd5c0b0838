use futures::StreamExt;
use rdkafka::consumer::StreamConsumer;
use rdkafka::Message;
use shared::Envelope;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hub::HubHandle;

/// Subscribes to the broker topic and pushes every received inventory event
/// to the local hub. Messages from this instance are re-broadcast too:
/// client-side application is an idempotent state overwrite, so the echo is
/// harmless and keeps one delivery path for everything.
pub struct EventDispatcher {
    hub: HubHandle,
    shutdown: CancellationToken,
}

impl EventDispatcher {
    pub fn new(hub: HubHandle, shutdown: CancellationToken) -> Self {
        Self { hub, shutdown }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        info!("Event dispatcher started");
        let mut message_stream = consumer.stream();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Event dispatcher stopping");
                    break;
                }
                message = message_stream.next() => {
                    let Some(message) = message else { break };
                    match message {
                        Ok(m) => {
                            if let Some(Ok(raw)) = m.payload_view::<str>() {
                                self.dispatch(raw).await;
                            }
                        }
                        Err(e) => error!("Error receiving broker message: {}", e),
                    }
                }
            }
        }
    }

    async fn dispatch(&self, raw: &str) {
        match decode_payload(raw) {
            Some((sender, payload)) => {
                debug!("Broadcasting inventory update from instance {}", sender);
                self.hub.broadcast(payload).await;
            }
            // Events are status pushes, not commands; an undecodable one is
            // dropped rather than retried.
            None => warn!("Dropping undecodable broker message"),
        }
    }
}

/// Extracts the client-facing payload bytes from a broker envelope.
fn decode_payload(raw: &str) -> Option<(String, Vec<u8>)> {
    let envelope = serde_json::from_str::<Envelope>(raw).ok()?;
    let payload = serde_json::to_vec(&envelope.payload).ok()?;
    Some((envelope.sender_instance_id, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_forwarded_verbatim() {
        let raw = r#"{"sender_instance_id":"node-b","payload":{"operation_type":"adjust","new_quantity":7}}"#;
        let (sender, payload) = decode_payload(raw).unwrap();
        assert_eq!(sender, "node-b");

        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["operation_type"], "adjust");
        assert_eq!(value["new_quantity"], 7);
    }

    #[test]
    fn own_instance_messages_are_not_filtered() {
        // Same-origin envelopes decode like any other; the dispatcher
        // re-broadcasts them rather than suppressing the echo.
        let raw = r#"{"sender_instance_id":"node-a","payload":{"x":1}}"#;
        assert!(decode_payload(raw).is_some());
    }

    #[test]
    fn malformed_messages_are_dropped() {
        assert!(decode_payload("not json").is_none());
        assert!(decode_payload(r#"{"payload":{}}"#).is_none());
        assert!(decode_payload("").is_none());
    }

    #[tokio::test]
    async fn dispatch_pushes_payload_to_hub_clients() {
        use crate::hub::{BroadcastHub, ClientHandle};

        let (handle, hub) = BroadcastHub::new();
        tokio::spawn(hub.run());

        let (client, mut rx) = ClientHandle::new("alice".to_string());
        handle.register(client).await;

        let dispatcher = EventDispatcher::new(handle.clone(), CancellationToken::new());
        dispatcher
            .dispatch(r#"{"sender_instance_id":"node-b","payload":{"new_quantity":7}}"#)
            .await;

        let pushed = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&pushed).unwrap();
        assert_eq!(value["new_quantity"], 7);
    }
}
