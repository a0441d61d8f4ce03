use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    credential::read_bearer_token,
    error::RelayError,
    job::{Job, JobStatus},
    models::{DeliveryMode, LocationRequest, SubscriptionRequest},
    queue::CallbackQueue,
    registry::{Registration, TaskRegistry},
    sender::Sender,
    subscription::build_subscription,
};

// Jobs run on a process-lifetime tracker, not on the request that accepted them.
pub struct Relay {
    cfg: Arc<Config>,
    sender: Sender,
    registry: TaskRegistry,
    queue: CallbackQueue,
    tracker: TaskTracker,
}

impl Relay {
    pub fn new(cfg: Arc<Config>, sender: Sender, queue: CallbackQueue) -> Self {
        Self {
            cfg,
            sender,
            registry: TaskRegistry::new(),
            queue,
            tracker: TaskTracker::new(),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    // Only validation errors are returned; later failures reach the client callback.
    pub fn accept(self: &Arc<Self>, request: &LocationRequest) -> Result<String, RelayError> {
        let (job_id, _detached) = self.start(request)?;
        Ok(job_id)
    }

    fn start(
        self: &Arc<Self>,
        request: &LocationRequest,
    ) -> Result<(String, JoinHandle<JobStatus>), RelayError> {
        let subscription =
            build_subscription(request, self.cfg.recurring_enabled, &self.cfg.recurring)?;
        let job = Job::new(&subscription, &request.notification_destination);
        let registration = self.registry.register(&job.id, job.cancel.clone(), job.mode);

        if job.mode == DeliveryMode::Recurring {
            let active = self.registry.active_in_mode(DeliveryMode::Recurring);
            if active > 1 {
                warn!(
                    job_id = %job.id,
                    active,
                    "several recurring jobs share the callback queue; notifications are handed out in arrival order"
                );
            }
        }

        info!(
            job_id = %job.id,
            mode = ?job.mode,
            expected_reports = job.expected_reports,
            "job accepted"
        );
        let job_id = job.id.clone();
        let relay = Arc::clone(self);
        let handle = self
            .tracker
            .spawn(async move { relay.run(job, subscription, registration).await });

        Ok((job_id, handle))
    }

    pub fn cancel(&self, job_id: &str) -> bool {
        let found = self.registry.cancel(job_id);
        if found {
            info!(job_id = %job_id, "job cancellation requested");
        }
        found
    }

    pub async fn shutdown(&self, grace: Duration) {
        let cancelled = self.registry.cancel_all();
        self.tracker.close();
        info!(cancelled, "waiting for in-flight jobs");
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(remaining = self.tracker.len(), "jobs still running after shutdown grace period");
        }
    }

    async fn run(
        &self,
        mut job: Job,
        subscription: SubscriptionRequest,
        _registration: Registration,
    ) -> JobStatus {
        job.status = JobStatus::Running;
        info!(job_id = %job.id, "job running");

        let cancel = job.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RelayError::Cancelled),
            result = self.drive(&mut job, &subscription) => result,
        };

        job.status = match outcome {
            Ok(()) if job.rejected_relays == 0 => JobStatus::Completed,
            Ok(()) => JobStatus::Failed,
            Err(err) => {
                let status = if err.is_cancellation() {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Failed
                };
                if job.relayed {
                    warn!(
                        job_id = %job.id,
                        received = job.received,
                        "client already relayed to, no failure notice sent: {err}"
                    );
                } else {
                    self.notify_failure(&job, &err).await;
                }
                status
            }
        };
        debug_assert!(job.status.is_terminal());

        info!(
            job_id = %job.id,
            status = ?job.status,
            received = job.received,
            expected_reports = job.expected_reports,
            elapsed_ms = job.elapsed_ms(),
            "job finished"
        );
        job.status
    }

    async fn drive(&self, job: &mut Job, subscription: &SubscriptionRequest) -> Result<(), RelayError> {
        let credential = read_bearer_token(self.cfg.access_token_file.as_deref()).await;
        let response = self
            .sender
            .send(
                &self.cfg.provider_url,
                credential.as_deref(),
                subscription,
                &job.id,
                &job.cancel,
            )
            .await?;

        match job.mode {
            DeliveryMode::OneShot => self.relay_to_client(job, &response.body).await,
            DeliveryMode::Recurring => {
                info!(
                    job_id = %job.id,
                    status = response.status,
                    expected_reports = job.expected_reports,
                    "subscription created, waiting for notifications"
                );
                while job.received < job.expected_reports {
                    let notification = self.queue.pop().await.ok_or(RelayError::Cancelled)?;
                    self.relay_to_client(job, &notification).await?;
                }
                Ok(())
            }
        }
    }

    // Single attempt; a rejected relay is counted, not retried.
    async fn relay_to_client(&self, job: &mut Job, payload: &Value) -> Result<(), RelayError> {
        job.relayed = true;
        let result = self
            .sender
            .send(&job.callback_url, None, payload, &job.id, &job.cancel)
            .await;
        job.received += 1;
        match result {
            Ok(_) => {
                info!(
                    job_id = %job.id,
                    received = job.received,
                    expected_reports = job.expected_reports,
                    "notification relayed"
                );
                Ok(())
            }
            Err(RelayError::Upstream { status, .. }) => {
                warn!(job_id = %job.id, status, "client callback rejected notification");
                job.rejected_relays += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn notify_failure(&self, job: &Job, err: &RelayError) {
        let payload = err.failure_payload();
        warn!(job_id = %job.id, code = payload.code, "job failed, notifying client: {err}");
        if let Err(notify_err) = self
            .sender
            .send(&job.callback_url, None, &payload, &job.id, &job.cancel)
            .await
        {
            error!(job_id = %job.id, "failure notice not delivered: {notify_err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;
    use tokio::sync::Mutex;

    const CANCELLED_NOTICE: &str = r#"{"status":"failed","code":500,"detail":"Task was cancelled"}"#;

    // Stands in for an xApp callback endpoint.
    struct Recorder {
        url: String,
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    impl Recorder {
        async fn start() -> Self {
            Self::start_with_delay(Duration::ZERO).await
        }

        // Records the body on arrival, then holds the response for `delay`.
        async fn start_with_delay(delay: Duration) -> Self {
            let bodies = Arc::new(Mutex::new(Vec::new()));
            let sink = bodies.clone();
            let app = Router::new().route(
                "/receive",
                post(move |Json(body): Json<Value>| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().await.push(body);
                        tokio::time::sleep(delay).await;
                        StatusCode::OK
                    }
                }),
            );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            Self {
                url: format!("http://{addr}/receive"),
                bodies,
            }
        }

        async fn received(&self) -> Vec<Value> {
            self.bodies.lock().await.clone()
        }
    }

    fn relay(cfg: Config, queue: CallbackQueue, timeout: Duration) -> Arc<Relay> {
        Arc::new(Relay::new(
            Arc::new(cfg),
            Sender::with_timeout(timeout).unwrap(),
            queue,
        ))
    }

    fn location_request(callback: &str) -> LocationRequest {
        LocationRequest {
            msisdn: "+491701234567".to_string(),
            notification_destination: callback.to_string(),
        }
    }

    async fn finish(handle: JoinHandle<JobStatus>) -> JobStatus {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("job did not finish")
            .expect("job panicked")
    }

    #[tokio::test]
    async fn one_shot_relays_provider_response_once() {
        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start().await;
        let subscription = provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/subscriptions")
                    .json_body(json!({
                        "msisdn": "491701234567",
                        "notificationDestination": client.url.clone(),
                        "monitoringType": "LOCATION_REPORTING",
                        "locationType": "LAST_KNOWN_LOCATION"
                    }));
                then.status(201)
                    .header("content-type", "application/json")
                    .body(r#"{"location":"X"}"#);
            })
            .await;

        let relay = relay(
            test_config(&provider.url("/subscriptions")),
            CallbackQueue::new(),
            Duration::from_secs(5),
        );
        let (job_id, handle) = relay.start(&location_request(&client.url)).unwrap();
        assert!(relay.registry().contains(&job_id));

        assert_eq!(finish(handle).await, JobStatus::Completed);
        assert_eq!(client.received().await, vec![json!({"location": "X"})]);
        assert!(!relay.registry().contains(&job_id));
        subscription.assert_async().await;
    }

    #[tokio::test]
    async fn bearer_token_from_file_is_sent_to_provider() {
        use std::io::Write;

        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start().await;
        let subscription = provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/subscriptions")
                    .header("authorization", "Bearer onboarding-token");
                then.status(200).body(r#"{"location":"Y"}"#);
            })
            .await;

        let mut token_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(token_file, "onboarding-token").unwrap();
        let mut cfg = test_config(&provider.url("/subscriptions"));
        cfg.access_token_file = Some(token_file.path().to_path_buf());

        let relay = relay(cfg, CallbackQueue::new(), Duration::from_secs(5));
        let (_, handle) = relay.start(&location_request(&client.url)).unwrap();

        assert_eq!(finish(handle).await, JobStatus::Completed);
        assert_eq!(client.received().await, vec![json!({"location": "Y"})]);
        subscription.assert_async().await;
    }

    #[tokio::test]
    async fn recurring_relays_queued_notifications_in_order() {
        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start().await;
        let subscription = provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/subscriptions")
                    .json_body(json!({
                        "msisdn": "+491701234567",
                        "notificationDestination": "http://localhost:8009/_internal/callback",
                        "monitoringType": "LOCATION_REPORTING",
                        "locationType": "CURRENT_LOCATION",
                        "maximumNumberOfReports": 2,
                        "repPeriod": 5
                    }));
                then.status(201).body(r#"{"subscription":"created"}"#);
            })
            .await;

        let mut cfg = test_config(&provider.url("/subscriptions"));
        cfg.recurring_enabled = true;
        let queue = CallbackQueue::new();
        let relay = relay(cfg, queue.clone(), Duration::from_secs(5));

        let (job_id, handle) = relay.start(&location_request(&client.url)).unwrap();

        queue.push(json!({"report": "A"}));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.received().await, vec![json!({"report": "A"})]);
        assert!(relay.registry().contains(&job_id));

        queue.push(json!({"report": "B"}));
        assert_eq!(finish(handle).await, JobStatus::Completed);
        assert_eq!(
            client.received().await,
            vec![json!({"report": "A"}), json!({"report": "B"})]
        );
        assert!(!relay.registry().contains(&job_id));
        subscription.assert_async().await;
    }

    #[tokio::test]
    async fn duplicate_notifications_are_relayed_twice() {
        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start().await;
        provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/subscriptions");
                then.status(201).body("{}");
            })
            .await;

        let mut cfg = test_config(&provider.url("/subscriptions"));
        cfg.recurring_enabled = true;
        let queue = CallbackQueue::new();
        let relay = relay(cfg, queue.clone(), Duration::from_secs(5));

        queue.push(json!({"location": "X"}));
        queue.push(json!({"location": "X"}));
        let (_, handle) = relay.start(&location_request(&client.url)).unwrap();

        assert_eq!(finish(handle).await, JobStatus::Completed);
        assert_eq!(
            client.received().await,
            vec![json!({"location": "X"}), json!({"location": "X"})]
        );
    }

    #[tokio::test]
    async fn upstream_timeout_relays_cancellation_notice() {
        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start().await;
        provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/subscriptions");
                then.status(200).delay(Duration::from_secs(2)).body("{}");
            })
            .await;

        let relay = relay(
            test_config(&provider.url("/subscriptions")),
            CallbackQueue::new(),
            Duration::from_millis(200),
        );
        let (job_id, handle) = relay.start(&location_request(&client.url)).unwrap();

        assert_eq!(finish(handle).await, JobStatus::Cancelled);
        let expected: Value = serde_json::from_str(CANCELLED_NOTICE).unwrap();
        assert_eq!(client.received().await, vec![expected]);
        assert!(!relay.registry().contains(&job_id));
    }

    #[tokio::test]
    async fn upstream_404_relays_failure_with_status_and_body() {
        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start().await;
        provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/subscriptions");
                then.status(404).body("not found");
            })
            .await;

        let relay = relay(
            test_config(&provider.url("/subscriptions")),
            CallbackQueue::new(),
            Duration::from_secs(5),
        );
        let (_, handle) = relay.start(&location_request(&client.url)).unwrap();

        assert_eq!(finish(handle).await, JobStatus::Failed);
        assert_eq!(
            client.received().await,
            vec![json!({"status": "failed", "code": 404, "detail": "not found"})]
        );
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_notifications() {
        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start().await;
        provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/subscriptions");
                then.status(201).body("{}");
            })
            .await;

        let mut cfg = test_config(&provider.url("/subscriptions"));
        cfg.recurring_enabled = true;
        let queue = CallbackQueue::new();
        let relay = relay(cfg, queue.clone(), Duration::from_secs(5));

        let (job_id, handle) = relay.start(&location_request(&client.url)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(relay.cancel(&job_id));
        assert_eq!(finish(handle).await, JobStatus::Cancelled);
        let expected: Value = serde_json::from_str(CANCELLED_NOTICE).unwrap();
        assert_eq!(client.received().await, vec![expected]);
        assert!(!relay.cancel(&job_id));

        // The queue is untouched and still usable by later jobs.
        queue.push(json!({"report": "late"}));
        assert_eq!(queue.try_pop(), Some(json!({"report": "late"})));
    }

    #[tokio::test]
    async fn cancel_during_one_shot_relay_sends_no_failure_notice() {
        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start_with_delay(Duration::from_millis(500)).await;
        provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/subscriptions");
                then.status(200).body(r#"{"location":"X"}"#);
            })
            .await;

        let relay = relay(
            test_config(&provider.url("/subscriptions")),
            CallbackQueue::new(),
            Duration::from_secs(5),
        );
        let (job_id, handle) = relay.start(&location_request(&client.url)).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(client.received().await, vec![json!({"location": "X"})]);

        assert!(relay.cancel(&job_id));
        assert_eq!(finish(handle).await, JobStatus::Cancelled);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.received().await, vec![json!({"location": "X"})]);
    }

    #[tokio::test]
    async fn cancel_after_first_report_sends_no_failure_notice() {
        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start().await;
        provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/subscriptions");
                then.status(201).body("{}");
            })
            .await;

        let mut cfg = test_config(&provider.url("/subscriptions"));
        cfg.recurring_enabled = true;
        let queue = CallbackQueue::new();
        let relay = relay(cfg, queue.clone(), Duration::from_secs(5));

        let (job_id, handle) = relay.start(&location_request(&client.url)).unwrap();
        queue.push(json!({"report": "A"}));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.received().await, vec![json!({"report": "A"})]);

        assert!(relay.cancel(&job_id));
        assert_eq!(finish(handle).await, JobStatus::Cancelled);
        assert_eq!(client.received().await, vec![json!({"report": "A"})]);
        assert!(!relay.registry().contains(&job_id));
    }

    #[tokio::test]
    async fn rejected_client_relay_is_not_retried() {
        let provider = httpmock::MockServer::start_async().await;
        provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/subscriptions");
                then.status(200).body(r#"{"location":"X"}"#);
            })
            .await;
        let client = httpmock::MockServer::start_async().await;
        let callback = client
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/receive");
                then.status(400).body("bad request");
            })
            .await;

        let relay = relay(
            test_config(&provider.url("/subscriptions")),
            CallbackQueue::new(),
            Duration::from_secs(5),
        );
        let (_, handle) = relay.start(&location_request(&client.url("/receive"))).unwrap();

        assert_eq!(finish(handle).await, JobStatus::Failed);
        assert_eq!(callback.hits_async().await, 1);
    }

    #[tokio::test]
    async fn unreachable_client_ends_cancelled_and_deregisters() {
        let provider = httpmock::MockServer::start_async().await;
        provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/subscriptions");
                then.status(200).body(r#"{"location":"X"}"#);
            })
            .await;
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let relay = relay(
            test_config(&provider.url("/subscriptions")),
            CallbackQueue::new(),
            Duration::from_secs(2),
        );
        let (job_id, handle) = relay
            .start(&location_request(&format!("http://{addr}/receive")))
            .unwrap();

        assert_eq!(finish(handle).await, JobStatus::Cancelled);
        assert!(!relay.registry().contains(&job_id));
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_a_job_exists() {
        let relay = relay(
            test_config("http://127.0.0.1:1/subscriptions"),
            CallbackQueue::new(),
            Duration::from_secs(1),
        );
        let err = relay
            .accept(&LocationRequest {
                msisdn: String::new(),
                notification_destination: "http://xapp/receive".to_string(),
            })
            .err()
            .unwrap();

        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(relay.registry().active_in_mode(DeliveryMode::OneShot), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_waiting_jobs() {
        let provider = httpmock::MockServer::start_async().await;
        let client = Recorder::start().await;
        provider
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/subscriptions");
                then.status(201).body("{}");
            })
            .await;

        let mut cfg = test_config(&provider.url("/subscriptions"));
        cfg.recurring_enabled = true;
        let relay = relay(cfg, CallbackQueue::new(), Duration::from_secs(5));
        let (_, handle) = relay.start(&location_request(&client.url)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        relay.shutdown(Duration::from_secs(2)).await;

        assert_eq!(finish(handle).await, JobStatus::Cancelled);
        assert_eq!(client.received().await.len(), 1);
        assert_eq!(relay.registry().active_in_mode(DeliveryMode::Recurring), 0);
    }
}
