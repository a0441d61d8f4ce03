use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

// Entries carry no job correlation; waiters are served in arrival order.
#[derive(Clone)]
pub struct CallbackQueue {
    sender: mpsc::UnboundedSender<Value>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Value>>>,
}

impl CallbackQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    pub fn push(&self, notification: Value) -> bool {
        self.sender.send(notification).is_ok()
    }

    // Cancel-safe: dropping the future never loses an entry.
    pub async fn pop(&self) -> Option<Value> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }

    #[cfg(test)]
    pub fn try_pop(&self) -> Option<Value> {
        let mut receiver = self.receiver.try_lock().ok()?;
        receiver.try_recv().ok()
    }
}

impl Default for CallbackQueue {
    fn default() -> Self {
        Self::new()
    }
}
