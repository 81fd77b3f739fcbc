//! Request/reply over publish/subscribe

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{BusError, MessageBus, publish_json};

/// Publish `request` and wait for the first decodable reply on `reply_channel`
///
/// The reply channel is subscribed before the request goes out so a fast
/// responder cannot be missed. Returns `Ok(None)` when nothing usable arrives
/// before `deadline`.
pub async fn request_reply<Req, Resp>(
    bus: &dyn MessageBus,
    request_channel: &str,
    request: &Req,
    reply_channel: &str,
    deadline: Duration,
) -> Result<Option<Resp>, BusError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    debug!(%request_channel, %reply_channel, ?deadline, "request_reply: called");
    let mut replies = bus.subscribe(reply_channel).await?;
    publish_json(bus, request_channel, request).await?;

    let until = Instant::now() + deadline;
    loop {
        match tokio::time::timeout_at(until, replies.recv()).await {
            Err(_) => {
                debug!(%reply_channel, "request_reply: deadline elapsed");
                return Ok(None);
            }
            Ok(None) => {
                return Err(BusError::Disconnected(format!(
                    "Reply channel {} closed",
                    reply_channel
                )));
            }
            Ok(Some(raw)) => match serde_json::from_str::<Resp>(&raw) {
                Ok(reply) => return Ok(Some(reply)),
                Err(e) => warn!(%reply_channel, error = %e, "Ignoring malformed reply"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use serde_json::{Value, json};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_reply_received() {
        let bus = Arc::new(MemoryBus::new(8));
        let mut requests = bus.subscribe("ping").await.unwrap();

        let responder = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let _ = requests.recv().await.unwrap();
                bus.publish("pong", "not json".to_string()).await.unwrap();
                bus.publish("pong", r#"{"ok":true}"#.to_string()).await.unwrap();
            })
        };

        let reply: Option<Value> = request_reply(bus.as_ref(), "ping", &json!({}), "pong", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Some(json!({"ok": true})));
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reply_is_none() {
        let bus = MemoryBus::new(8);
        let reply: Option<Value> = request_reply(&bus, "ping", &json!({}), "pong", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(reply.is_none());
    }
}
