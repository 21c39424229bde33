//! Settlement Notifications
//! Mission: Broadcast settlement events without ever blocking settlement
//!
//! Delivery plumbing (push, email, websockets) subscribes downstream; the
//! engine and transfer processor only fire-and-forget.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::sessions::SessionStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    SessionOpened {
        session_id: String,
        account_id: String,
        symbol: String,
        stake: Decimal,
    },
    SessionSettled {
        session_id: String,
        account_id: String,
        status: SessionStatus,
        payout: Decimal,
    },
    TransferReceived {
        transfer_id: String,
        account_id: String,
        amount: Decimal,
    },
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<NotificationEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    /// Best-effort emission. A missing audience is not an error and must
    /// never fail the financial operation that triggered the event.
    pub fn emit(&self, event: NotificationEvent) {
        if let Err(err) = self.tx.send(event) {
            debug!("notification dropped, no subscribers: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_panic() {
        let notifier = Notifier::new(8);
        notifier.emit(NotificationEvent::TransferReceived {
            transfer_id: "t1".to_string(),
            account_id: "user-1".to_string(),
            amount: dec!(25),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let notifier = Notifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.emit(NotificationEvent::SessionOpened {
            session_id: "s1".to_string(),
            account_id: "user-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            stake: dec!(100),
        });

        match rx.recv().await.unwrap() {
            NotificationEvent::SessionOpened { session_id, .. } => {
                assert_eq!(session_id, "s1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
