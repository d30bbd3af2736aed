//! Events published to the display layer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::models::CyclePayload;
use crate::error::ScrapeAttemptError;

/// Buffered events per subscriber before the slowest one starts lagging.
pub const EVENT_CAPACITY: usize = 64;

/// Outcome of one completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum UsageEvent {
    #[serde(rename = "usage-update")]
    Update(CyclePayload),
    #[serde(rename = "usage-error")]
    Error(ScrapeAttemptError),
}

impl UsageEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Update(_) => "usage-update",
            Self::Error(_) => "usage-error",
        }
    }
}

/// Fan-out of [`UsageEvent`]s in publication order.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<UsageEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; returns how many received it.
    pub fn publish(&self, event: UsageEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(event = name, receivers, "Event published");
                receivers
            }
            Err(_) => {
                tracing::debug!(event = name, "Event published with no subscribers");
                0
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::make_test_payload;

    #[test]
    fn wire_shape() {
        let json = serde_json::to_value(UsageEvent::Update(make_test_payload())).unwrap();
        assert_eq!(json["event"], "usage-update");
        assert_eq!(json["payload"]["foundCount"], 3);
        assert_eq!(json["payload"]["status"], "ok");

        let err = ScrapeAttemptError::new(ErrorKind::Timeout, "page load timed out", 3);
        let json = serde_json::to_value(UsageEvent::Error(err)).unwrap();
        assert_eq!(json["event"], "usage-error");
        assert_eq!(json["payload"]["kind"], "timeout");
        assert_eq!(json["payload"]["attempt"], 3);
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(UsageEvent::Update(make_test_payload())), 1);
        bus.publish(UsageEvent::Error(ScrapeAttemptError::new(
            ErrorKind::SessionExpired,
            "expired",
            1,
        )));

        assert_eq!(rx.recv().await.unwrap().name(), "usage-update");
        assert_eq!(rx.recv().await.unwrap().name(), "usage-error");
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        assert_eq!(EventBus::new().publish(UsageEvent::Update(make_test_payload())), 0);
    }
}
