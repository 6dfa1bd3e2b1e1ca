use crate::errors::AppError;
use crate::models::{ExportQuery, ExportRange, Lead};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

pub const CSV_HEADERS: [&str; 22] = [
    "ID",
    "Created At",
    "First Name",
    "Last Name",
    "Email",
    "Phone",
    "ZIP",
    "City",
    "State",
    "Line of Business",
    "Commercial Type",
    "Status",
    "Bound",
    "Bound Premium",
    "Carrier",
    "Policy ID",
    "Bound Date",
    "UTM Source",
    "UTM Medium",
    "UTM Campaign",
    "GCLID",
    "Notes",
];

/// Quotes a CSV field when it contains a comma, quote or line break.
pub fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn row(lead: &Lead) -> String {
    let opt = |value: &Option<String>| value.clone().unwrap_or_default();

    let fields = [
        lead.id.to_string(),
        lead.created_at.to_rfc3339(),
        lead.first_name.clone(),
        lead.last_name.clone(),
        lead.email.clone(),
        lead.phone.clone(),
        lead.zip.clone(),
        lead.city.clone(),
        lead.state.clone(),
        lead.line_of_business.to_string(),
        opt(&lead.commercial_type),
        lead.status.to_string(),
        lead.bound.to_string(),
        lead.bound_premium
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        opt(&lead.carrier),
        opt(&lead.policy_id),
        lead.bound_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        opt(&lead.utm_source),
        opt(&lead.utm_medium),
        opt(&lead.utm_campaign),
        opt(&lead.gclid),
        opt(&lead.notes),
    ];

    fields
        .iter()
        .map(|f| escape_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Header line plus one line per lead, newline separated.
pub fn render_csv(leads: &[Lead]) -> String {
    let mut lines = Vec::with_capacity(leads.len() + 1);
    lines.push(CSV_HEADERS.join(","));
    lines.extend(leads.iter().map(row));
    lines.join("\n")
}

/// `leads-export-YYYY-MM-DD.csv` for the given day.
pub fn export_filename(today: NaiveDate) -> String {
    format!("leads-export-{}.csv", today.format("%Y-%m-%d"))
}

/// Parses an RFC 3339 timestamp or a bare date. A bare end date covers the
/// whole day.
fn parse_bound(name: &str, raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(format!(
            "{} must be an RFC 3339 timestamp or a YYYY-MM-DD date",
            name
        ))
    })?;

    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        Some(NaiveTime::MIN)
    }
    .ok_or_else(|| AppError::InternalError("invalid time of day".to_string()))?;

    Ok(date.and_time(time).and_utc())
}

pub fn parse_export_range(query: &ExportQuery) -> Result<ExportRange, AppError> {
    let start = query
        .start_date
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_bound("start_date", s, false))
        .transpose()?;
    let end = query
        .end_date
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_bound("end_date", s, true))
        .transpose()?;

    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AppError::BadRequest(
                "start_date must not be after end_date".to_string(),
            ));
        }
    }

    Ok(ExportRange { start, end })
}
