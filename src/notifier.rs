use crate::delivery::DeliveryPayload;
use async_trait::async_trait;
use uuid::Uuid;

/// Out-of-band alert raised when a lead could not be delivered.
///
/// Best effort: implementations swallow their own errors, and the pipeline
/// never waits on the alert to decide anything.
#[async_trait]
pub trait FallbackNotifier: Send + Sync {
    async fn notify_failure(&self, lead_id: Uuid, payload: &DeliveryPayload);
}

/// Rendered alert message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackAlert {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl FallbackAlert {
    pub fn new(to: &str, lead_id: Uuid, payload: &DeliveryPayload) -> Self {
        let details = serde_json::to_string_pretty(payload)
            .unwrap_or_else(|_| format!("{:?}", payload));

        Self {
            to: to.to_string(),
            subject: format!("QuoteLinker: Webhook Failed for Lead {}", lead_id),
            body: format!(
                "Webhook delivery failed for lead {}.\n\nLead details:\n{}",
                lead_id, details
            ),
        }
    }
}

/// Writes the alert to the log at error level.
///
/// Stand-in until a mail provider is wired; operators route these log lines
/// to the fallback address.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    destination: String,
}

impl LogNotifier {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

#[async_trait]
impl FallbackNotifier for LogNotifier {
    async fn notify_failure(&self, lead_id: Uuid, payload: &DeliveryPayload) {
        let alert = FallbackAlert::new(&self.destination, lead_id, payload);
        tracing::error!(
            to = %alert.to,
            subject = %alert.subject,
            "Fallback alert:\n{}",
            alert.body
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_contents() {
        let lead_id = Uuid::new_v4();
        let payload = DeliveryPayload {
            lead_id: lead_id.to_string(),
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
        };

        let alert = FallbackAlert::new("ops@example.com", lead_id, &payload);
        assert_eq!(alert.to, "ops@example.com");
        assert_eq!(
            alert.subject,
            format!("QuoteLinker: Webhook Failed for Lead {}", lead_id)
        );
        assert!(alert.body.contains("john@x.com"));
        assert!(alert.body.contains(&lead_id.to_string()));
    }
}
