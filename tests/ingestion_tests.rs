/// Ingestion pipeline tests against the in-memory store.
/// Covers ordering (throttle, validate, persist, deliver) and delivery bookkeeping.
mod common;

use async_trait::async_trait;
use common::{fast_client, john_doe, RecordingNotifier, StatusTransport};
use quotelinker_api::db_storage::LeadStore;
use quotelinker_api::delivery::{
    DeliveryClient, DeliveryPayload, RetryPolicy, Transport, TransportOutcome,
};
use quotelinker_api::errors::AppError;
use quotelinker_api::ingestion::{DeliveryDispatcher, LeadIngestion};
use quotelinker_api::memory_store::InMemoryLeadStore;
use quotelinker_api::models::{DeliveryRecord, LeadSubmission};
use quotelinker_api::rate_limiter::FixedWindowLimiter;
use quotelinker_api::validation::normalize_submission;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct Harness {
    store: Arc<InMemoryLeadStore>,
    transport: Arc<StatusTransport>,
    notifier: Arc<RecordingNotifier>,
    dispatcher: DeliveryDispatcher,
    ingestion: LeadIngestion,
}

fn harness(status: u16) -> Harness {
    let store = Arc::new(InMemoryLeadStore::new());
    let transport = StatusTransport::new(status);
    let notifier = Arc::new(RecordingNotifier::default());

    let dispatcher = DeliveryDispatcher::new(
        store.clone(),
        Arc::new(fast_client(transport.clone())),
        notifier.clone(),
    );
    let ingestion = LeadIngestion::new(
        Arc::new(FixedWindowLimiter::default()),
        store.clone(),
        dispatcher.clone(),
    );

    Harness {
        store,
        transport,
        notifier,
        dispatcher,
        ingestion,
    }
}

#[tokio::test]
async fn test_accepted_lead_is_stored_then_delivered() {
    let h = harness(200);

    let accepted = h.ingestion.accept(&john_doe()).await.unwrap();
    assert_eq!(accepted.lead.phone, "5551234567");
    assert_eq!(accepted.lead.state, "MN");
    assert_eq!(accepted.lead.zip, "55401");
    assert!(!accepted.lead.webhook_sent);

    let report = accepted.delivery.await.unwrap().unwrap();
    assert!(report.success);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.error, None);

    let stored = h.store.get(accepted.lead.id).await.unwrap().unwrap();
    assert!(stored.webhook_sent);
    assert_eq!(stored.webhook_attempts, 1);
    assert_eq!(stored.webhook_error, None);
    assert!(stored.webhook_last_attempt.is_some());

    let payloads = h.transport.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].lead_id, accepted.lead.id.to_string());
    assert_eq!(payloads[0].line, "auto");
    assert_eq!(payloads[0].utm_source, "google");
    assert_eq!(payloads[0].utm_medium, "");
    assert!(h.notifier.alerts().is_empty());
}

#[tokio::test]
async fn test_exhausted_delivery_alerts_once() {
    let h = harness(500);

    let accepted = h.ingestion.accept(&john_doe()).await.unwrap();
    let lead_id = accepted.lead.id;
    let report = accepted.delivery.await.unwrap().unwrap();

    assert!(!report.success);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.error.as_deref(), Some("Webhook failed with status 500"));
    // One initial attempt plus three retries
    assert_eq!(h.transport.calls(), 4);

    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, lead_id);
    assert_eq!(alerts[0].1, DeliveryPayload::from(&accepted.lead));

    let stored = h.store.get(lead_id).await.unwrap().unwrap();
    assert!(!stored.webhook_sent);
    assert_eq!(stored.webhook_attempts, 1);
    assert_eq!(
        stored.webhook_error.as_deref(),
        Some("Webhook failed with status 500")
    );
}

#[tokio::test]
async fn test_redelivery_increments_once_per_run() {
    let h = harness(500);

    let accepted = h.ingestion.accept(&john_doe()).await.unwrap();
    let lead_id = accepted.lead.id;
    accepted.delivery.await.unwrap();

    let second = h.dispatcher.redeliver(lead_id).await.unwrap();
    let third = h.dispatcher.redeliver(lead_id).await.unwrap();
    assert_eq!(second.attempts, 2);
    assert_eq!(third.attempts, 3);
    assert_eq!(h.notifier.alerts().len(), 3);

    h.transport.set_status(204);
    let fourth = h.dispatcher.redeliver(lead_id).await.unwrap();
    assert!(fourth.success);
    assert_eq!(fourth.attempts, 4);

    let stored = h.store.get(lead_id).await.unwrap().unwrap();
    assert!(stored.webhook_sent);
    assert_eq!(stored.webhook_error, None);
    assert_eq!(stored.webhook_attempts, 4);

    // Every run carries the same lead id for downstream de-duplication
    assert!(h
        .transport
        .payloads()
        .iter()
        .all(|p| p.lead_id == lead_id.to_string()));
}

#[tokio::test]
async fn test_redeliver_unknown_lead() {
    let h = harness(200);
    let err = h.dispatcher.redeliver(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_persistence_failure_skips_delivery() {
    let h = harness(200);
    h.store.set_fail_writes(true);

    let err = h.ingestion.accept(&john_doe()).await.unwrap_err();
    assert!(matches!(err, AppError::PersistenceFailed(_)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.transport.calls(), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_invalid_submission_is_not_stored() {
    let h = harness(200);
    let submission = LeadSubmission {
        consent_tcpa: Some(false),
        ..john_doe()
    };

    match h.ingestion.accept(&submission).await {
        Err(AppError::Validation(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors["consent_tcpa"], "You must agree to be contacted");
        }
        other => panic!("expected validation error, got {:?}", other.map(|a| a.lead.id)),
    }
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_sixth_submission_from_one_source_is_throttled() {
    let h = harness(200);

    for _ in 0..5 {
        h.ingestion.submit("203.0.113.7", &john_doe()).await.unwrap();
    }
    let err = h.ingestion.submit("203.0.113.7", &john_doe()).await.unwrap_err();
    assert!(matches!(err, AppError::RateLimited));

    // Other sources are unaffected
    h.ingestion.submit("198.51.100.1", &john_doe()).await.unwrap();
    assert_eq!(h.store.len(), 6);
}

/// Holds every send until released.
struct GatedTransport {
    gate: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, _: &str, _: &DeliveryPayload, _: Duration) -> TransportOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        TransportOutcome::Response(200)
    }
}

#[tokio::test]
async fn test_concurrent_runs_for_one_lead_are_refused() {
    let store = Arc::new(InMemoryLeadStore::new());
    let transport = Arc::new(GatedTransport {
        gate: Notify::new(),
        calls: AtomicUsize::new(0),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = DeliveryDispatcher::new(
        store.clone(),
        Arc::new(fast_client(transport.clone())),
        notifier,
    );
    let ingestion = LeadIngestion::new(
        Arc::new(FixedWindowLimiter::default()),
        store.clone(),
        dispatcher.clone(),
    );

    let accepted = ingestion.accept(&john_doe()).await.unwrap();
    while transport.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(dispatcher.is_in_flight(accepted.lead.id));
    assert_eq!(dispatcher.run_delivery(accepted.lead.clone()).await, None);
    let err = dispatcher.redeliver(accepted.lead.id).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    transport.gate.notify_one();
    let report = accepted.delivery.await.unwrap().unwrap();
    assert!(report.success);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert!(!dispatcher.is_in_flight(accepted.lead.id));
}

#[tokio::test]
async fn test_sweep_redispatches_only_unsent_leads() {
    let h = harness(200);

    let pending = h
        .store
        .insert(&normalize_submission(&john_doe()).unwrap())
        .await
        .unwrap();
    let delivered = h
        .store
        .insert(&normalize_submission(&john_doe()).unwrap())
        .await
        .unwrap();
    h.store
        .record_delivery(
            delivered.id,
            &DeliveryRecord {
                success: true,
                error: None,
                attempted_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();

    let dispatched = h.dispatcher.sweep_undelivered(50).await.unwrap();
    assert_eq!(dispatched, 1);

    for _ in 0..200 {
        if h.store.get(pending.id).await.unwrap().unwrap().webhook_sent {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stored = h.store.get(pending.id).await.unwrap().unwrap();
    assert!(stored.webhook_sent);
    assert_eq!(stored.webhook_attempts, 1);
    assert_eq!(h.transport.calls(), 1);
}

/// Answers 200 after a fixed delay.
struct SlowTransport {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for SlowTransport {
    async fn send(&self, _: &str, _: &DeliveryPayload, _: Duration) -> TransportOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        TransportOutcome::Response(200)
    }
}

#[tokio::test]
async fn test_abandoned_redeliver_still_records_and_releases_claim() {
    let store = Arc::new(InMemoryLeadStore::new());
    let transport = Arc::new(SlowTransport {
        delay: Duration::from_millis(200),
        calls: AtomicUsize::new(0),
    });
    let dispatcher = DeliveryDispatcher::new(
        store.clone(),
        Arc::new(fast_client(transport.clone())),
        Arc::new(RecordingNotifier::default()),
    );
    let lead = store
        .insert(&normalize_submission(&john_doe()).unwrap())
        .await
        .unwrap();

    // The caller gives up long before the endpoint answers
    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), dispatcher.redeliver(lead.id)).await;
    assert!(abandoned.is_err());

    for _ in 0..200 {
        let sent = store.get(lead.id).await.unwrap().unwrap().webhook_sent;
        if sent && !dispatcher.is_in_flight(lead.id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stored = store.get(lead.id).await.unwrap().unwrap();
    assert!(stored.webhook_sent);
    assert_eq!(stored.webhook_attempts, 1);
    assert!(!dispatcher.is_in_flight(lead.id));

    let again = dispatcher.redeliver(lead.id).await.unwrap();
    assert!(again.success);
    assert_eq!(again.attempts, 2);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_claim_outlives_the_longest_delivery_run() {
    let store = Arc::new(InMemoryLeadStore::new());
    let notifier = Arc::new(RecordingNotifier::default());

    // Ten retries from a 1s base back off for 1023s in total
    let client = DeliveryClient::new(
        StatusTransport::new(500),
        "https://hooks.example.com/lead",
        Duration::from_secs(10),
        RetryPolicy::new(10, Duration::from_secs(1)),
    );
    let longest_run = client.max_run_duration();
    let dispatcher = DeliveryDispatcher::new(store.clone(), Arc::new(client), notifier.clone());
    assert!(longest_run > Duration::from_secs(1023));
    assert!(dispatcher.claim_ttl() > longest_run);

    // Unbounded runs get a long but finite claim
    let client = DeliveryClient::new(
        StatusTransport::new(500),
        "https://hooks.example.com/lead",
        Duration::from_secs(10),
        RetryPolicy::new(200, Duration::from_secs(u64::MAX / 2)),
    );
    let dispatcher = DeliveryDispatcher::new(store, Arc::new(client), notifier);
    assert!(dispatcher.claim_ttl() >= Duration::from_secs(365 * 24 * 60 * 60));
}
