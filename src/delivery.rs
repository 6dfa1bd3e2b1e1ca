//! Delivery of leads to the downstream automation webhook.
//!
//! The retry policy lives in [`DeliveryClient`] and knows nothing about the
//! payload; the wire call lives behind [`Transport`]. Each attempt is a fresh
//! request bounded by the configured timeout, and attempts for one payload run
//! strictly one after another.

use crate::models::Lead;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

pub const USER_AGENT: &str = "QuoteLinker/1.0";

/// Flat payload expected by the downstream endpoint.
///
/// Optional fields are sent as empty strings, never `null`. The line of
/// business is sent as `line`, the column name the downstream sheet uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryPayload {
    pub lead_id: String,
    /// RFC 3339 creation time of the lead.
    pub timestamp: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub zip: String,
    pub state: String,
    pub city: String,
    pub line: String,
    pub commercial_type: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_term: String,
    pub utm_content: String,
    pub gclid: String,
    pub gbraid: String,
    pub wbraid: String,
}

impl From<&Lead> for DeliveryPayload {
    fn from(lead: &Lead) -> Self {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();

        Self {
            lead_id: lead.id.to_string(),
            timestamp: lead.created_at.to_rfc3339(),
            first_name: lead.first_name.clone(),
            last_name: lead.last_name.clone(),
            email: lead.email.clone(),
            phone: lead.phone.clone(),
            zip: lead.zip.clone(),
            state: lead.state.clone(),
            city: lead.city.clone(),
            line: lead.line_of_business.as_str().to_string(),
            commercial_type: text(&lead.commercial_type),
            utm_source: text(&lead.utm_source),
            utm_medium: text(&lead.utm_medium),
            utm_campaign: text(&lead.utm_campaign),
            utm_term: text(&lead.utm_term),
            utm_content: text(&lead.utm_content),
            gclid: text(&lead.gclid),
            gbraid: text(&lead.gbraid),
            wbraid: text(&lead.wbraid),
        }
    }
}

/// What a single send produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    /// The endpoint answered with this HTTP status.
    Response(u16),
    /// No response: connection error, timeout, TLS failure and the like.
    Error(String),
}

/// One network call to the delivery endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        payload: &DeliveryPayload,
        timeout: Duration,
    ) -> TransportOutcome;
}

/// JSON-over-HTTPS transport.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        endpoint: &str,
        payload: &DeliveryPayload,
        timeout: Duration,
    ) -> TransportOutcome {
        let result = self
            .client
            .post(endpoint)
            // Same key on every retry and re-drive so the receiver can dedupe
            .header("Idempotency-Key", &payload.lead_id)
            .json(payload)
            .timeout(timeout)
            .send()
            .await;

        match result {
            Ok(response) => TransportOutcome::Response(response.status().as_u16()),
            Err(e) if e.is_timeout() => TransportOutcome::Error(format!(
                "Webhook timed out after {}ms",
                timeout.as_millis()
            )),
            Err(e) => TransportOutcome::Error(e.to_string()),
        }
    }
}

/// Bounded exponential backoff: retry `n` (0-based) waits `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `retry` (0-based): 1s, 2s, 4s, 8s with the defaults.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Sum of every backoff delay in a run that exhausts its retries.
    pub fn total_backoff(&self) -> Duration {
        let mut total = Duration::ZERO;
        for retry in 0..self.max_retries {
            total = total.saturating_add(self.delay_for_retry(retry));
            if total == Duration::MAX {
                break;
            }
        }
        total
    }

    /// Whether another attempt may follow the failed attempt `attempt` (0-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Result of [`DeliveryClient::deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    /// Network attempts made, including the first.
    pub attempts: u32,
    /// Last observed error when `success` is false.
    pub error: Option<String>,
}

/// Sends payloads to one fixed endpoint with timeout, retry and backoff.
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    endpoint: String,
    timeout: Duration,
    policy: RetryPolicy,
}

impl DeliveryClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            timeout,
            policy,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Longest one [`Self::deliver`] call can run: every attempt hitting the
    /// timeout plus every backoff delay.
    pub fn max_run_duration(&self) -> Duration {
        self.timeout
            .saturating_mul(self.policy.max_attempts())
            .saturating_add(self.policy.total_backoff())
    }

    /// Delivers `payload`, retrying failures with exponential backoff.
    ///
    /// Always resolves to an outcome; transport errors, timeouts and non-2xx
    /// statuses are all failures of the same shape.
    pub async fn deliver(&self, payload: &DeliveryPayload) -> DeliveryOutcome {
        let mut attempt: u32 = 0;

        loop {
            let sent = tokio::time::timeout(
                self.timeout,
                self.transport.send(&self.endpoint, payload, self.timeout),
            )
            .await;

            let error = match sent {
                Ok(TransportOutcome::Response(status)) if (200..300).contains(&status) => {
                    tracing::info!(
                        "Webhook sent successfully: lead_id={}, attempt={}",
                        payload.lead_id,
                        attempt + 1
                    );
                    return DeliveryOutcome {
                        success: true,
                        attempts: attempt + 1,
                        error: None,
                    };
                }
                Ok(TransportOutcome::Response(status)) => {
                    format!("Webhook failed with status {}", status)
                }
                Ok(TransportOutcome::Error(e)) => e,
                Err(_) => format!("Webhook timed out after {}ms", self.timeout.as_millis()),
            };

            tracing::error!(
                "Webhook attempt {} failed for lead_id={}: {}",
                attempt + 1,
                payload.lead_id,
                error
            );

            if !self.policy.should_retry(attempt) {
                tracing::error!(
                    "All webhook retries exhausted for lead_id={} after {} attempts",
                    payload.lead_id,
                    attempt + 1
                );
                return DeliveryOutcome {
                    success: false,
                    attempts: attempt + 1,
                    error: Some(error),
                };
            }

            let delay = self.policy.delay_for_retry(attempt);
            tracing::info!("Retrying webhook in {}ms...", delay.as_millis());
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays scripted outcomes and records when each call happened.
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<TransportOutcome>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<TransportOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _: &str, _: &DeliveryPayload, _: Duration) -> TransportOutcome {
            self.calls.lock().unwrap().push(Instant::now());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TransportOutcome::Response(500))
        }
    }

    /// Never answers, so only the client-side timeout can end the call.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn send(&self, _: &str, _: &DeliveryPayload, _: Duration) -> TransportOutcome {
            std::future::pending().await
        }
    }

    fn payload() -> DeliveryPayload {
        DeliveryPayload {
            lead_id: "0d6c9e5a-8f43-4b4e-9a77-0c1a2b3c4d5e".to_string(),
            timestamp: "2025-01-01T00:00:00+00:00".to_string(),
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            email: "john@x.com".to_string(),
            phone: "5551234567".to_string(),
            zip: "55401".to_string(),
            state: "MN".to_string(),
            city: "Minneapolis".to_string(),
            line: "auto".to_string(),
            commercial_type: String::new(),
            utm_source: String::new(),
            utm_medium: String::new(),
            utm_campaign: String::new(),
            utm_term: String::new(),
            utm_content: String::new(),
            gclid: String::new(),
            gbraid: String::new(),
            wbraid: String::new(),
        }
    }

    fn client(transport: Arc<dyn Transport>) -> DeliveryClient {
        DeliveryClient::new(
            transport,
            "https://hooks.example.com/lead",
            Duration::from_secs(10),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_retry(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(8));
        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.delay_for_retry(2), Duration::MAX);
        assert_eq!(policy.total_backoff(), Duration::MAX);
    }

    #[test]
    fn test_max_run_duration_covers_every_attempt() {
        assert_eq!(RetryPolicy::default().total_backoff(), Duration::from_secs(15));
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).total_backoff(), Duration::ZERO);

        // 11 timeouts of 10s plus 1 + 2 + ... + 512 seconds of backoff
        let client = DeliveryClient::new(
            Arc::new(HangingTransport),
            "https://hooks.example.com/lead",
            Duration::from_secs(10),
            RetryPolicy::new(10, Duration::from_secs(1)),
        );
        assert_eq!(client.max_run_duration(), Duration::from_secs(110 + 1023));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt_with_backoff() {
        let transport = ScriptedTransport::new(vec![
            TransportOutcome::Response(503),
            TransportOutcome::Error("connection reset".to_string()),
            TransportOutcome::Response(200),
        ]);
        let outcome = client(transport.clone()).deliver(&payload()).await;

        assert_eq!(
            outcome,
            DeliveryOutcome {
                success: true,
                attempts: 3,
                error: None
            }
        );

        let calls = transport.call_times();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let transport = ScriptedTransport::new(vec![
            TransportOutcome::Response(500),
            TransportOutcome::Response(502),
            TransportOutcome::Error("dns error".to_string()),
            TransportOutcome::Response(404),
        ]);
        let outcome = client(transport.clone()).deliver(&payload()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Webhook failed with status 404")
        );
        assert_eq!(transport.call_times().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retries_policy() {
        let transport = ScriptedTransport::new(vec![TransportOutcome::Response(500)]);
        let client = DeliveryClient::new(
            transport.clone(),
            "https://hooks.example.com/lead",
            Duration::from_secs(10),
            RetryPolicy::new(0, Duration::from_secs(1)),
        );

        let outcome = client.deliver(&payload()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failed_attempt() {
        let client = DeliveryClient::new(
            Arc::new(HangingTransport),
            "https://hooks.example.com/lead",
            Duration::from_millis(250),
            RetryPolicy::new(1, Duration::from_secs(1)),
        );

        let outcome = client.deliver(&payload()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Webhook timed out after 250ms")
        );
    }

    #[test]
    fn test_payload_renames_line_and_blanks_optionals() {
        let json = serde_json::to_value(payload()).unwrap();
        assert_eq!(json["line"], "auto");
        assert!(json.get("line_of_business").is_none());
        assert_eq!(json["gclid"], "");
    }
}
