use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{DeliveryMode, SubscriptionRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub mode: DeliveryMode,
    pub callback_url: String,
    pub expected_reports: u32,
    pub received: u32,
    pub rejected_relays: u32,
    // Set before the first client POST goes out.
    pub relayed: bool,
    pub status: JobStatus,
    pub accepted_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl Job {
    pub fn new(subscription: &SubscriptionRequest, callback_url: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mode: subscription.mode(),
            callback_url: callback_url.trim().to_string(),
            expected_reports: subscription.expected_reports(),
            received: 0,
            rejected_relays: 0,
            relayed: false,
            status: JobStatus::Pending,
            accepted_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.accepted_at).num_milliseconds()
    }
}
