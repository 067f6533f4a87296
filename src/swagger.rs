use actix_web::web;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;
use crate::models::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::webhook::stripe_webhook,
        handlers::subscription::check_subscription,
        handlers::subscription::expiring_subscriptions,
        handlers::subscription::ban_user,
        handlers::health::health,
    ),
    components(
        schemas(
            SubscriptionCheckRequest,
            SubscriptionCheckResponse,
            ExpiringQuery,
            ExpiringSubscription,
            RevokeSubscriptionRequest,
            WebhookAck,
            ApiError,
        )
    ),
    tags(
        (name = "webhook", description = "Stripe webhook intake"),
        (name = "subscription", description = "Subscription lookup and administration"),
        (name = "health", description = "Liveness"),
    ),
    info(
        title = "Telegram Billing Sync API",
        version = "0.1.0",
        description = "Mirrors Stripe billing state and projects subscription access onto Telegram users",
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/stripe_webhook",
            "/api/subscription/check",
            "/api/subscription/expiring",
            "/api/subscription/ban",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path}");
        }
    }
}
