//! Lead ingestion pipeline and the background delivery task.
//!
//! Ordering for one submission: rate limit, validation, persistence, then a
//! detached delivery task. The HTTP response never waits on delivery.

use crate::db_storage::LeadStore;
use crate::delivery::{DeliveryClient, DeliveryPayload};
use crate::errors::AppError;
use crate::models::{DeliveryRecord, Lead, LeadSubmission};
use crate::notifier::FallbackNotifier;
use crate::rate_limiter::RateLimiter;
use crate::validation::normalize_submission;
use chrono::Utc;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Leads that already had this many delivery runs are left to manual re-drive.
pub const SWEEP_MAX_DELIVERY_RUNS: i32 = 5;

/// Leads picked up per sweep tick.
pub const SWEEP_BATCH_SIZE: i64 = 50;

/// Slack on top of the longest possible delivery run, covering bookkeeping
/// and the fallback alert.
const CLAIM_MARGIN: Duration = Duration::from_secs(60);

/// Ceiling for the claim lifetime; the cache rejects anything much longer.
const MAX_CLAIM_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Result of one delivery run, after bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub success: bool,
    /// Stored delivery-run counter after this run.
    pub attempts: i32,
    pub error: Option<String>,
}

/// A persisted lead together with its detached delivery task.
#[derive(Debug)]
pub struct Accepted {
    pub lead: Lead,
    /// Resolves to `None` when another run for the lead was already in flight.
    pub delivery: JoinHandle<Option<DeliveryReport>>,
}

/// Runs delivery for stored leads and records the outcome on the lead.
#[derive(Clone)]
pub struct DeliveryDispatcher {
    store: Arc<dyn LeadStore>,
    client: Arc<DeliveryClient>,
    notifier: Arc<dyn FallbackNotifier>,
    in_flight: Cache<Uuid, ()>,
    claim_ttl: Duration,
}

impl DeliveryDispatcher {
    pub fn new(
        store: Arc<dyn LeadStore>,
        client: Arc<DeliveryClient>,
        notifier: Arc<dyn FallbackNotifier>,
    ) -> Self {
        // A claim must outlive the run that holds it. No capacity bound, so
        // claims are only ever dropped by their run or by expiry.
        let claim_ttl = client
            .max_run_duration()
            .saturating_add(CLAIM_MARGIN)
            .min(MAX_CLAIM_TTL);
        let in_flight = Cache::builder().time_to_live(claim_ttl).build();

        Self {
            store,
            client,
            notifier,
            in_flight,
            claim_ttl,
        }
    }

    /// How long an in-flight claim lives if its run never releases it.
    pub fn claim_ttl(&self) -> Duration {
        self.claim_ttl
    }

    /// Spawns a delivery run for `lead` and returns without waiting on it.
    pub fn dispatch(&self, lead: Lead) -> JoinHandle<Option<DeliveryReport>> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run_delivery(lead).await })
    }

    pub fn is_in_flight(&self, lead_id: Uuid) -> bool {
        self.in_flight.contains_key(&lead_id)
    }

    /// One full delivery run for `lead`: deliver with retries, record the
    /// outcome, and alert on permanent failure.
    ///
    /// Returns `None` without doing anything when a run for the same lead is
    /// already in progress.
    pub async fn run_delivery(&self, lead: Lead) -> Option<DeliveryReport> {
        let claimed = self.in_flight.entry(lead.id).or_insert(()).await.is_fresh();
        if !claimed {
            tracing::warn!("Delivery already in progress for lead {}, skipping", lead.id);
            return None;
        }

        let report = self.deliver_and_record(&lead).await;
        self.in_flight.invalidate(&lead.id).await;

        Some(report)
    }

    async fn deliver_and_record(&self, lead: &Lead) -> DeliveryReport {
        let payload = DeliveryPayload::from(lead);
        tracing::debug!("Delivering lead {} to {}", lead.id, self.client.endpoint());

        let outcome = self.client.deliver(&payload).await;

        let record = DeliveryRecord {
            success: outcome.success,
            error: outcome.error.clone(),
            attempted_at: Utc::now(),
        };

        let attempts = match self.store.record_delivery(lead.id, &record).await {
            Ok(updated) => updated.webhook_attempts,
            Err(e) => {
                tracing::error!(
                    "Failed to record delivery outcome for lead {}: {}",
                    lead.id,
                    e
                );
                lead.webhook_attempts + 1
            }
        };

        if outcome.success {
            tracing::info!(
                "Lead {} delivered after {} attempt(s)",
                lead.id,
                outcome.attempts
            );
        } else {
            tracing::error!(
                "Lead {} not delivered after {} attempt(s): {}",
                lead.id,
                outcome.attempts,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            self.notifier.notify_failure(lead.id, &payload).await;
        }

        DeliveryReport {
            success: outcome.success,
            attempts,
            error: outcome.error,
        }
    }

    /// Re-runs delivery for a stored lead and waits for the outcome, for
    /// manual re-drive.
    ///
    /// The run itself is detached: dropping this future stops the wait, not
    /// the delivery or its bookkeeping.
    pub async fn redeliver(&self, lead_id: Uuid) -> Result<DeliveryReport, AppError> {
        let lead = self
            .store
            .get(lead_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;

        let report = self.dispatch(lead).await.map_err(|e| {
            AppError::InternalError(format!("Delivery task for lead {} failed: {}", lead_id, e))
        })?;

        report.ok_or_else(|| {
            AppError::BadRequest(format!("Delivery already in progress for lead {}", lead_id))
        })
    }

    /// Dispatches up to `limit` undelivered leads with no run in flight.
    /// Returns how many were dispatched.
    pub async fn sweep_undelivered(&self, limit: i64) -> Result<usize, AppError> {
        let pending = self
            .store
            .list_undelivered(SWEEP_MAX_DELIVERY_RUNS, limit)
            .await?;

        let mut dispatched = 0;
        for lead in pending {
            if self.is_in_flight(lead.id) {
                continue;
            }
            self.dispatch(lead);
            dispatched += 1;
        }

        if dispatched > 0 {
            tracing::info!("Delivery sweep re-dispatched {} lead(s)", dispatched);
        }
        Ok(dispatched)
    }

    /// Background loop calling [`Self::sweep_undelivered`] every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately; wait a full interval before sweeping
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = dispatcher.sweep_undelivered(SWEEP_BATCH_SIZE).await {
                    tracing::error!("Delivery sweep failed: {}", e);
                }
            }
        })
    }
}

/// Entry point for consumer submissions.
#[derive(Clone)]
pub struct LeadIngestion {
    limiter: Arc<dyn RateLimiter>,
    store: Arc<dyn LeadStore>,
    dispatcher: DeliveryDispatcher,
}

impl LeadIngestion {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        store: Arc<dyn LeadStore>,
        dispatcher: DeliveryDispatcher,
    ) -> Self {
        Self {
            limiter,
            store,
            dispatcher,
        }
    }

    /// Counts one request against `source_key`. Must run before the body is
    /// looked at so throttled callers get 429 regardless of content.
    pub fn admit(&self, source_key: &str) -> Result<(), AppError> {
        if self.limiter.allow(source_key) {
            Ok(())
        } else {
            tracing::warn!("Rate limit exceeded for {}", source_key);
            Err(AppError::RateLimited)
        }
    }

    /// Validates and persists an admitted submission, then dispatches delivery.
    pub async fn accept(&self, submission: &LeadSubmission) -> Result<Accepted, AppError> {
        let new_lead = normalize_submission(submission).map_err(AppError::Validation)?;

        let lead = self
            .store
            .insert(&new_lead)
            .await
            .map_err(|e| AppError::PersistenceFailed(e.to_string()))?;

        tracing::info!(
            "Lead {} created (line={}, state={})",
            lead.id,
            lead.line_of_business,
            lead.state
        );

        let delivery = self.dispatcher.dispatch(lead.clone());
        Ok(Accepted { lead, delivery })
    }

    /// Rate limit, validate, persist and dispatch in one call.
    pub async fn submit(
        &self,
        source_key: &str,
        submission: &LeadSubmission,
    ) -> Result<Lead, AppError> {
        self.admit(source_key)?;
        let accepted = self.accept(submission).await?;
        Ok(accepted.lead)
    }
}
