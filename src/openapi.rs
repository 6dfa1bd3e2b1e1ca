use crate::delivery::DeliveryPayload;
use crate::handlers;
use crate::models::*;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "QuoteLinker Lead API",
        description = "Insurance quote-request intake, delivery and lead administration"
    ),
    paths(
        handlers::health,
        handlers::submit_lead,
        handlers::notify_lead,
        handlers::list_leads,
        handlers::update_lead,
        handlers::export_leads,
        handlers::admin_auth,
    ),
    components(schemas(
        Lead,
        LineOfBusiness,
        LeadStatus,
        Attribution,
        LeadSubmission,
        SubmitLeadResponse,
        LeadUpdate,
        LeadUpdateResponse,
        SortColumn,
        SortOrder,
        Pagination,
        LeadPage,
        NotifyRequest,
        NotifyResponse,
        AuthRequest,
        DeliveryPayload,
    )),
    modifiers(&AdminTokenScheme),
    tags(
        (name = "system", description = "Liveness"),
        (name = "leads", description = "Public lead intake"),
        (name = "admin", description = "Lead administration, token protected")
    )
)]
pub struct ApiDoc;

/// Registers the bearer scheme referenced by the admin routes.
struct AdminTokenScheme;

impl Modify for AdminTokenScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "admin_token",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}
