//! In-process bus on a tokio broadcast channel.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::{InvalidationBus, InvalidationMessage, BUS_CAPACITY};
use crate::error::StoreResult;

/// Fan-out within one process. Coordinators sharing a `LocalBus` behave like
/// separate nodes sharing a broadcast channel.
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<InvalidationMessage>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvalidationBus for LocalBus {
    async fn publish(&self, message: &InvalidationMessage) -> StoreResult<()> {
        // No subscribers is not an error: nobody has anything to invalidate.
        let receivers = self.sender.send(message.clone()).unwrap_or(0);
        debug!(
            key = %message.key,
            operation = ?message.operation,
            receivers,
            "Published invalidation"
        );
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InvalidationMessage> {
        self.sender.subscribe()
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
