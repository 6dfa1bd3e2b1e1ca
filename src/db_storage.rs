use crate::errors::{AppError, ResultExt};
use crate::models::{
    DeliveryRecord, ExportRange, Lead, LeadFilter, LeadPage, LeadUpdate, NewLead, Pagination,
    SortOrder,
};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// Persistence seam for leads.
///
/// Implementations must make each method atomic for a single row; the
/// pipeline never needs multi-row transactions.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Inserts a validated lead and returns the stored row.
    async fn insert(&self, lead: &NewLead) -> Result<Lead, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Lead>, AppError>;

    /// Applies an admin update. `NotFound` when the id is unknown.
    async fn update(&self, id: Uuid, update: &LeadUpdate) -> Result<Lead, AppError>;

    /// Records one delivery run: increments the attempt counter by exactly one
    /// and sets the last-attempt time. Success sets `webhook_sent` and clears
    /// the error; failure stores the error unless the lead was already sent.
    async fn record_delivery(&self, id: Uuid, record: &DeliveryRecord) -> Result<Lead, AppError>;

    async fn list(&self, filter: &LeadFilter) -> Result<LeadPage, AppError>;

    /// All leads in the range, newest first.
    async fn export(&self, range: &ExportRange) -> Result<Vec<Lead>, AppError>;

    /// Oldest unsent leads with fewer than `max_attempts` delivery runs.
    async fn list_undelivered(&self, max_attempts: i32, limit: i64)
        -> Result<Vec<Lead>, AppError>;
}

/// Escapes `LIKE` wildcards so user text only ever matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// PostgreSQL-backed lead store.
#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a LeadFilter) {
        if let Some(state) = filter.state_upper() {
            builder.push(" AND state = ").push_bind(state);
        }
        if let Some(city) = filter.city_pattern() {
            builder
                .push(" AND city ILIKE ")
                .push_bind(format!("%{}%", escape_like(&city)))
                .push(r" ESCAPE '\'");
        }
        if let Some(line) = filter.line_of_business {
            builder
                .push(" AND line_of_business = ")
                .push_bind(line.as_str());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(bound) = filter.bound {
            builder.push(" AND bound = ").push_bind(bound);
        }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn insert(&self, lead: &NewLead) -> Result<Lead, AppError> {
        let attribution = &lead.attribution;

        let stored = sqlx::query_as::<_, Lead>(
            r#"
            INSERT INTO leads (
                first_name, last_name, email, phone, zip, state, city,
                line_of_business, commercial_type, consent_tcpa,
                utm_source, utm_medium, utm_campaign, utm_term, utm_content,
                gclid, gbraid, wbraid
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING *
            "#,
        )
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.zip)
        .bind(&lead.state)
        .bind(&lead.city)
        .bind(lead.line_of_business.as_str())
        .bind(&lead.commercial_type)
        .bind(lead.consent_tcpa)
        .bind(&attribution.utm_source)
        .bind(&attribution.utm_medium)
        .bind(&attribution.utm_campaign)
        .bind(&attribution.utm_term)
        .bind(&attribution.utm_content)
        .bind(&attribution.gclid)
        .bind(&attribution.gbraid)
        .bind(&attribution.wbraid)
        .fetch_one(&self.pool)
        .await
        .context("Inserting lead")?;

        tracing::debug!("Stored lead {}", stored.id);
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(lead)
    }

    async fn update(&self, id: Uuid, update: &LeadUpdate) -> Result<Lead, AppError> {
        // Nullable columns take a presence flag so an explicit null clears them
        sqlx::query_as::<_, Lead>(
            r#"
            UPDATE leads
            SET status = COALESCE($2, status),
                bound = COALESCE($3, bound),
                bound_premium = CASE WHEN $4 THEN $5::numeric ELSE bound_premium END,
                carrier = CASE WHEN $6 THEN $7::text ELSE carrier END,
                policy_id = CASE WHEN $8 THEN $9::text ELSE policy_id END,
                bound_date = CASE WHEN $10 THEN $11::date ELSE bound_date END,
                notes = CASE WHEN $12 THEN $13::text ELSE notes END,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.bound)
        .bind(update.bound_premium.is_some())
        .bind(update.bound_premium.as_ref().and_then(Option::as_ref))
        .bind(update.carrier.is_some())
        .bind(update.carrier.as_ref().and_then(Option::as_deref))
        .bind(update.policy_id.is_some())
        .bind(update.policy_id.as_ref().and_then(Option::as_deref))
        .bind(update.bound_date.is_some())
        .bind(update.bound_date.flatten())
        .bind(update.notes.is_some())
        .bind(update.notes.as_ref().and_then(Option::as_deref))
        .fetch_optional(&self.pool)
        .await
        .context("Updating lead")?
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))
    }

    async fn record_delivery(&self, id: Uuid, record: &DeliveryRecord) -> Result<Lead, AppError> {
        // Single statement so the increment is atomic per row
        sqlx::query_as::<_, Lead>(
            r#"
            UPDATE leads
            SET webhook_attempts = webhook_attempts + 1,
                webhook_last_attempt = $2,
                webhook_sent = webhook_sent OR $3,
                webhook_error = CASE
                    WHEN $3 OR webhook_sent THEN NULL
                    ELSE $4
                END,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(record.attempted_at)
        .bind(record.success)
        .bind(&record.error)
        .fetch_optional(&self.pool)
        .await
        .context("Recording delivery attempt")?
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))
    }

    async fn list(&self, filter: &LeadFilter) -> Result<LeadPage, AppError> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM leads WHERE 1=1");
        Self::push_filters(&mut count_query, filter);
        let total = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .context("Counting leads")?;

        let sort_by = filter.sort_by.unwrap_or_default();
        let direction = match filter.sort_order.unwrap_or_default() {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM leads WHERE 1=1");
        Self::push_filters(&mut query, filter);
        // Column names come from an allow-listed enum, never from user text
        query
            .push(format!(
                " ORDER BY {} {} NULLS LAST, id {}",
                sort_by.as_str(),
                direction,
                direction
            ))
            .push(" LIMIT ")
            .push_bind(filter.limit())
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let leads = query
            .build_query_as::<Lead>()
            .fetch_all(&self.pool)
            .await
            .context("Listing leads")?;

        Ok(LeadPage {
            leads,
            pagination: Pagination::new(filter.page(), filter.limit(), total),
        })
    }

    async fn export(&self, range: &ExportRange) -> Result<Vec<Lead>, AppError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM leads WHERE 1=1");
        if let Some(start) = range.start {
            query.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = range.end {
            query.push(" AND created_at <= ").push_bind(end);
        }
        query.push(" ORDER BY created_at DESC");

        let leads = query
            .build_query_as::<Lead>()
            .fetch_all(&self.pool)
            .await
            .context("Exporting leads")?;

        Ok(leads)
    }

    async fn list_undelivered(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Lead>, AppError> {
        let leads = sqlx::query_as::<_, Lead>(
            r#"
            SELECT * FROM leads
            WHERE webhook_sent = false AND webhook_attempts < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Listing undelivered leads")?;

        Ok(leads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_neutralizes_wildcards() {
        assert_eq!(escape_like("minneapolis"), "minneapolis");
        assert_eq!(escape_like("100%"), r"100\%");
        assert_eq!(escape_like("st_paul"), r"st\_paul");
        assert_eq!(escape_like(r"a\b"), r"a\\b");
    }
}
