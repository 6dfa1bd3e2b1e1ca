use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// ============ Enumerations ============

/// Insurance line a consumer asked a quote for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LineOfBusiness {
    Auto,
    Home,
    Bundle,
    Life,
    Commercial,
}

impl LineOfBusiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineOfBusiness::Auto => "auto",
            LineOfBusiness::Home => "home",
            LineOfBusiness::Bundle => "bundle",
            LineOfBusiness::Life => "life",
            LineOfBusiness::Commercial => "commercial",
        }
    }
}

impl FromStr for LineOfBusiness {
    type Err = String;

    /// Lenient about case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(LineOfBusiness::Auto),
            "home" => Ok(LineOfBusiness::Home),
            "bundle" => Ok(LineOfBusiness::Bundle),
            "life" => Ok(LineOfBusiness::Life),
            "commercial" => Ok(LineOfBusiness::Commercial),
            other => Err(format!("unknown line of business '{}'", other)),
        }
    }
}

impl TryFrom<String> for LineOfBusiness {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for LineOfBusiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sales workflow status, maintained by the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Quoted,
    Bound,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Quoted => "quoted",
            LeadStatus::Bound => "bound",
            LeadStatus::Lost => "lost",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "quoted" => Ok(LeadStatus::Quoted),
            "bound" => Ok(LeadStatus::Bound),
            "lost" => Ok(LeadStatus::Lost),
            other => Err(format!("unknown lead status '{}'", other)),
        }
    }
}

impl TryFrom<String> for LeadStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Database Models ============

/// A captured consumer submission, as stored in the `leads` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Lead {
    /// Store-assigned identifier, also sent downstream for de-duplication.
    pub id: Uuid,
    /// Creation time. Never changes after insert.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Contact information
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Digits only. 10 digits, except 11-digit input without a leading `1`.
    pub phone: String,
    /// 5 digits.
    pub zip: String,
    /// Two-letter uppercase code.
    pub state: String,
    pub city: String,

    // Insurance details
    #[sqlx(try_from = "String")]
    pub line_of_business: LineOfBusiness,
    /// Present only for commercial leads.
    pub commercial_type: Option<String>,

    pub consent_tcpa: bool,

    // Attribution tracking
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub gclid: Option<String>,
    pub gbraid: Option<String>,
    pub wbraid: Option<String>,

    // Admin fields
    #[sqlx(try_from = "String")]
    pub status: LeadStatus,
    pub bound: bool,
    #[schema(value_type = Option<String>, example = "1250.00")]
    pub bound_premium: Option<BigDecimal>,
    pub carrier: Option<String>,
    pub policy_id: Option<String>,
    pub bound_date: Option<NaiveDate>,
    pub notes: Option<String>,

    // Webhook delivery bookkeeping
    pub webhook_sent: bool,
    pub webhook_attempts: i32,
    pub webhook_last_attempt: Option<DateTime<Utc>>,
    pub webhook_error: Option<String>,
}

/// A validated, normalized lead ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLead {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub zip: String,
    pub state: String,
    pub city: String,
    pub line_of_business: LineOfBusiness,
    pub commercial_type: Option<String>,
    pub consent_tcpa: bool,
    pub attribution: Attribution,
}

/// Marketing tracking parameters carried from the landing page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Attribution {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub gclid: Option<String>,
    pub gbraid: Option<String>,
    pub wbraid: Option<String>,
}

/// Outcome of one delivery run, written to the lead's bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub success: bool,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

// ============ Request/Response Models ============

/// Raw form submission. Every field is optional here so that missing and
/// malformed values surface as field errors rather than a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct LeadSubmission {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub zip: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    #[schema(example = "auto")]
    pub line_of_business: Option<String>,
    pub commercial_type: Option<String>,
    pub consent_tcpa: Option<bool>,
    #[serde(flatten)]
    pub attribution: Attribution,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitLeadResponse {
    pub success: bool,
    #[serde(rename = "leadId")]
    pub lead_id: Uuid,
    pub message: String,
}

/// Admin update. Only these fields may change; anything else is rejected.
///
/// The nullable workflow fields are tri-state: absent leaves the column
/// alone, `null` clears it, a value sets it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LeadUpdate {
    pub id: Uuid,
    pub status: Option<LeadStatus>,
    pub bound: Option<bool>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>, example = "1250.00")]
    pub bound_premium: Option<Option<BigDecimal>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub carrier: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub policy_id: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>, format = Date)]
    pub bound_date: Option<Option<NaiveDate>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub notes: Option<Option<String>>,
}

/// Marks a field as sent, keeping an explicit `null` as `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl LeadUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.bound.is_none()
            && self.bound_premium.is_none()
            && self.carrier.is_none()
            && self.policy_id.is_none()
            && self.bound_date.is_none()
            && self.notes.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LeadUpdateResponse {
    pub lead: Lead,
}

/// Columns the admin list may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    #[default]
    CreatedAt,
    UpdatedAt,
    LastName,
    State,
    City,
    Status,
    LineOfBusiness,
    BoundPremium,
}

impl SortColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortColumn::CreatedAt => "created_at",
            SortColumn::UpdatedAt => "updated_at",
            SortColumn::LastName => "last_name",
            SortColumn::State => "state",
            SortColumn::City => "city",
            SortColumn::Status => "status",
            SortColumn::LineOfBusiness => "line_of_business",
            SortColumn::BoundPremium => "bound_premium",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

/// Query parameters of the admin lead list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(default)]
pub struct LeadFilter {
    /// 1-based page number.
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// Exact match, case-insensitive.
    pub state: Option<String>,
    /// Substring match, case-insensitive.
    pub city: Option<String>,
    pub line_of_business: Option<LineOfBusiness>,
    pub status: Option<LeadStatus>,
    pub bound: Option<bool>,
    pub sort_by: Option<SortColumn>,
    pub sort_order: Option<SortOrder>,
}

impl LeadFilter {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    pub fn state_upper(&self) -> Option<String> {
        self.state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase)
    }

    pub fn city_pattern(&self) -> Option<String> {
        self.city
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeadPage {
    pub leads: Vec<Lead>,
    pub pagination: Pagination,
}

/// Query parameters of the CSV export. Accepts RFC 3339 or `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Inclusive `created_at` bounds for an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ExportRange {
    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| *at >= start) && self.end.map_or(true, |end| *at <= end)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotifyRequest {
    #[serde(rename = "leadId")]
    pub lead_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotifyResponse {
    pub success: bool,
    pub attempts: i32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AuthRequest {
    pub token: Option<String>,
}
