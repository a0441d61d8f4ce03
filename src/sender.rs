use std::time::Duration;

use reqwest::{header::AUTHORIZATION, Client};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{credential::authorization_value, error::RelayError};

pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Value,
}

#[derive(Clone)]
pub struct Sender {
    client: Client,
}

impl Sender {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeout(SEND_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    // Transport failures cancel the job; non-2xx answers leave the token alone.
    pub async fn send<B>(
        &self,
        url: &str,
        credential: Option<&str>,
        body: &B,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, RelayError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = credential {
            request = request.header(AUTHORIZATION, authorization_value(token));
        }
        info!(job_id = %job_id, url = %url, authenticated = credential.is_some(), "sending POST");

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Err(transport_failure(url, job_id, cancel, err)),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => return Err(transport_failure(url, job_id, cancel, err)),
        };

        if !status.is_success() {
            warn!(job_id = %job_id, url = %url, status = status.as_u16(), "POST rejected");
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                detail: text,
            });
        }

        info!(job_id = %job_id, url = %url, status = status.as_u16(), "POST accepted");
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ProviderResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn transport_failure(
    url: &str,
    job_id: &str,
    cancel: &CancellationToken,
    err: reqwest::Error,
) -> RelayError {
    if err.is_timeout() {
        error!(job_id = %job_id, url = %url, "request timed out, cancelling job");
    } else {
        error!(job_id = %job_id, url = %url, "request failed, cancelling job: {err}");
    }
    cancel.cancel();
    RelayError::Transport(err.to_string())
}
