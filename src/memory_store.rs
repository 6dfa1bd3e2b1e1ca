use crate::db_storage::LeadStore;
use crate::errors::AppError;
use crate::models::{
    DeliveryRecord, ExportRange, Lead, LeadFilter, LeadPage, LeadStatus, LeadUpdate, NewLead,
    Pagination, SortColumn, SortOrder,
};
use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Process-local lead store with the same semantics as the Postgres store.
///
/// Used by the test suite and for running the API without a database.
#[derive(Debug, Default)]
pub struct InMemoryLeadStore {
    leads: Mutex<HashMap<Uuid, Lead>>,
    fail_writes: AtomicBool,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent insert fail, simulating an unavailable store.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Lead>> {
        self.leads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn matches(lead: &Lead, filter: &LeadFilter) -> bool {
        if let Some(state) = filter.state_upper() {
            if lead.state != state {
                return false;
            }
        }
        if let Some(city) = filter.city_pattern() {
            if !lead.city.to_lowercase().contains(&city) {
                return false;
            }
        }
        filter.line_of_business.map_or(true, |l| lead.line_of_business == l)
            && filter.status.map_or(true, |s| lead.status == s)
            && filter.bound.map_or(true, |b| lead.bound == b)
    }

    fn compare(a: &Lead, b: &Lead, column: SortColumn) -> Ordering {
        match column {
            SortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
            SortColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortColumn::LastName => a.last_name.cmp(&b.last_name),
            SortColumn::State => a.state.cmp(&b.state),
            SortColumn::City => a.city.cmp(&b.city),
            SortColumn::Status => a.status.as_str().cmp(b.status.as_str()),
            SortColumn::LineOfBusiness => {
                a.line_of_business.as_str().cmp(b.line_of_business.as_str())
            }
            SortColumn::BoundPremium => a.bound_premium.cmp(&b.bound_premium),
        }
    }

    /// Rows without a value go last whatever the direction, like `NULLS LAST`.
    fn nulls_last(a: &Lead, b: &Lead, column: SortColumn) -> Ordering {
        match column {
            SortColumn::BoundPremium => a.bound_premium.is_none().cmp(&b.bound_premium.is_none()),
            _ => Ordering::Equal,
        }
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn insert(&self, lead: &NewLead) -> Result<Lead, AppError> {
        if self.fail_writes.load(AtomicOrdering::SeqCst) {
            return Err(AppError::InternalError("lead store unavailable".to_string()));
        }

        let now = Utc::now();
        let attribution = lead.attribution.clone();
        let stored = Lead {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            first_name: lead.first_name.clone(),
            last_name: lead.last_name.clone(),
            email: lead.email.clone(),
            phone: lead.phone.clone(),
            zip: lead.zip.clone(),
            state: lead.state.clone(),
            city: lead.city.clone(),
            line_of_business: lead.line_of_business,
            commercial_type: lead.commercial_type.clone(),
            consent_tcpa: lead.consent_tcpa,
            utm_source: attribution.utm_source,
            utm_medium: attribution.utm_medium,
            utm_campaign: attribution.utm_campaign,
            utm_term: attribution.utm_term,
            utm_content: attribution.utm_content,
            gclid: attribution.gclid,
            gbraid: attribution.gbraid,
            wbraid: attribution.wbraid,
            status: LeadStatus::New,
            bound: false,
            bound_premium: None,
            carrier: None,
            policy_id: None,
            bound_date: None,
            notes: None,
            webhook_sent: false,
            webhook_attempts: 0,
            webhook_last_attempt: None,
            webhook_error: None,
        };

        self.lock().insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn update(&self, id: Uuid, update: &LeadUpdate) -> Result<Lead, AppError> {
        let mut leads = self.lock();
        let lead = leads
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;

        if let Some(status) = update.status {
            lead.status = status;
        }
        if let Some(bound) = update.bound {
            lead.bound = bound;
        }
        if let Some(premium) = &update.bound_premium {
            lead.bound_premium = premium.clone();
        }
        if let Some(carrier) = &update.carrier {
            lead.carrier = carrier.clone();
        }
        if let Some(policy_id) = &update.policy_id {
            lead.policy_id = policy_id.clone();
        }
        if let Some(bound_date) = update.bound_date {
            lead.bound_date = bound_date;
        }
        if let Some(notes) = &update.notes {
            lead.notes = notes.clone();
        }
        lead.updated_at = Utc::now();

        Ok(lead.clone())
    }

    async fn record_delivery(&self, id: Uuid, record: &DeliveryRecord) -> Result<Lead, AppError> {
        let mut leads = self.lock();
        let lead = leads
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;

        lead.webhook_attempts += 1;
        lead.webhook_last_attempt = Some(record.attempted_at);
        lead.webhook_sent = lead.webhook_sent || record.success;
        lead.webhook_error = if lead.webhook_sent {
            None
        } else {
            record.error.clone()
        };
        lead.updated_at = Utc::now();

        Ok(lead.clone())
    }

    async fn list(&self, filter: &LeadFilter) -> Result<LeadPage, AppError> {
        let column = filter.sort_by.unwrap_or_default();
        let order = filter.sort_order.unwrap_or_default();

        let mut matching: Vec<Lead> = self
            .lock()
            .values()
            .filter(|lead| Self::matches(lead, filter))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let ordering = Self::compare(a, b, column).then_with(|| a.id.cmp(&b.id));
            let directed = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            Self::nulls_last(a, b, column).then(directed)
        });

        let total = matching.len() as i64;
        let leads = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect();

        Ok(LeadPage {
            leads,
            pagination: Pagination::new(filter.page(), filter.limit(), total),
        })
    }

    async fn export(&self, range: &ExportRange) -> Result<Vec<Lead>, AppError> {
        let mut leads: Vec<Lead> = self
            .lock()
            .values()
            .filter(|lead| range.contains(&lead.created_at))
            .cloned()
            .collect();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(leads)
    }

    async fn list_undelivered(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Lead>, AppError> {
        let mut leads: Vec<Lead> = self
            .lock()
            .values()
            .filter(|lead| !lead.webhook_sent && lead.webhook_attempts < max_attempts)
            .cloned()
            .collect();
        leads.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        leads.truncate(limit.max(0) as usize);

        Ok(leads)
    }
}
