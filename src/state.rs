use std::sync::Arc;

use crate::{config::Config, queue::CallbackQueue, relay::Relay};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub relay: Arc<Relay>,
    pub queue: CallbackQueue,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, relay: Arc<Relay>, queue: CallbackQueue) -> Self {
        Self { cfg, relay, queue }
    }
}
