#![allow(dead_code)]

use async_trait::async_trait;
use quotelinker_api::delivery::{
    DeliveryClient, DeliveryPayload, RetryPolicy, Transport, TransportOutcome,
};
use quotelinker_api::models::LeadSubmission;
use quotelinker_api::notifier::FallbackNotifier;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Answers every send with a fixed, switchable HTTP status.
pub struct StatusTransport {
    status: AtomicU16,
    calls: AtomicUsize,
    payloads: Mutex<Vec<DeliveryPayload>>,
}

impl StatusTransport {
    pub fn new(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status: AtomicU16::new(status),
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<DeliveryPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StatusTransport {
    async fn send(&self, _: &str, payload: &DeliveryPayload, _: Duration) -> TransportOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.clone());
        TransportOutcome::Response(self.status.load(Ordering::SeqCst))
    }
}

/// Keeps every alert it is asked to raise.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<(Uuid, DeliveryPayload)>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<(Uuid, DeliveryPayload)> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl FallbackNotifier for RecordingNotifier {
    async fn notify_failure(&self, lead_id: Uuid, payload: &DeliveryPayload) {
        self.alerts.lock().unwrap().push((lead_id, payload.clone()));
    }
}

/// Client with 3 retries and a 1ms backoff base so failure paths run fast.
pub fn fast_client(transport: Arc<dyn Transport>) -> DeliveryClient {
    DeliveryClient::new(
        transport,
        "https://hooks.example.com/lead",
        Duration::from_secs(5),
        RetryPolicy::new(3, Duration::from_millis(1)),
    )
}

pub fn john_doe() -> LeadSubmission {
    serde_json::from_value(john_doe_json()).unwrap()
}

pub fn john_doe_json() -> serde_json::Value {
    serde_json::json!({
        "first_name": "John",
        "last_name": "Doe",
        "email": "john@x.com",
        "phone": "(555) 123-4567",
        "zip": "55401",
        "city": "Minneapolis",
        "state": "mn",
        "line_of_business": "auto",
        "consent_tcpa": true,
        "utm_source": "google",
        "gclid": "abc123"
    })
}
