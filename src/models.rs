use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct LocationRequest {
    pub msisdn: String,
    #[serde(rename = "notificationDestination")]
    pub notification_destination: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AcceptedResponse {
    pub message: String,
    pub task_id: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitoringType {
    LocationReporting,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationType {
    #[serde(rename = "LAST_KNOWN_LOCATION")]
    LastKnown,
    #[serde(rename = "CURRENT_LOCATION")]
    Current,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    OneShot,
    Recurring,
}

// Built only by build_subscription, which keeps location_type and the report fields consistent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub msisdn: String,
    pub notification_destination: String,
    pub monitoring_type: MonitoringType,
    pub location_type: LocationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_number_of_reports: Option<u32>,
    // seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rep_period: Option<u64>,
}

impl SubscriptionRequest {
    pub fn mode(&self) -> DeliveryMode {
        match self.location_type {
            LocationType::LastKnown => DeliveryMode::OneShot,
            LocationType::Current => DeliveryMode::Recurring,
        }
    }

    pub fn expected_reports(&self) -> u32 {
        match self.mode() {
            DeliveryMode::OneShot => 1,
            DeliveryMode::Recurring => self.maximum_number_of_reports.unwrap_or(1),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FailurePayload {
    pub status: String,
    pub code: u16,
    pub detail: String,
}

impl FailurePayload {
    pub fn new(code: u16, detail: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            code,
            detail: detail.into(),
        }
    }
}
