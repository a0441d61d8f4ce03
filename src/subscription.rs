use axum::http::Uri;

use crate::{
    config::RecurringSettings,
    error::RelayError,
    models::{LocationRequest, LocationType, MonitoringType, SubscriptionRequest},
};

pub fn build_subscription(
    request: &LocationRequest,
    recurring_enabled: bool,
    recurring: &RecurringSettings,
) -> Result<SubscriptionRequest, RelayError> {
    let msisdn = request.msisdn.trim();
    if msisdn.is_empty() || msisdn == "+" {
        return Err(RelayError::Validation("msisdn is required".to_string()));
    }
    validate_destination(&request.notification_destination)?;

    if recurring_enabled {
        return Ok(SubscriptionRequest {
            msisdn: msisdn.to_string(),
            notification_destination: recurring.notification_endpoint.clone(),
            monitoring_type: MonitoringType::LocationReporting,
            location_type: LocationType::Current,
            maximum_number_of_reports: Some(recurring.max_report_count),
            rep_period: Some(recurring.report_period_secs),
        });
    }

    Ok(SubscriptionRequest {
        // Provider expects the bare E.164 digits.
        msisdn: msisdn.trim_start_matches('+').to_string(),
        notification_destination: request.notification_destination.trim().to_string(),
        monitoring_type: MonitoringType::LocationReporting,
        location_type: LocationType::LastKnown,
        maximum_number_of_reports: None,
        rep_period: None,
    })
}

fn validate_destination(destination: &str) -> Result<(), RelayError> {
    let destination = destination.trim();
    if destination.is_empty() {
        return Err(RelayError::Validation(
            "notificationDestination is required".to_string(),
        ));
    }
    let uri: Uri = destination
        .parse()
        .map_err(|_| RelayError::Validation("notificationDestination is not a valid url".to_string()))?;
    let scheme = uri.scheme_str().unwrap_or("");
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return Err(RelayError::Validation(
            "notificationDestination must be an http(s) url".to_string(),
        ));
    }
    if uri.host().is_none() {
        return Err(RelayError::Validation(
            "notificationDestination host missing".to_string(),
        ));
    }
    Ok(())
}
