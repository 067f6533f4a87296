use crate::external::stripe::StripeService;
use crate::models::WebhookAck;
use crate::services::webhook_service::WebhookService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use log::{error, info, warn};
use serde_json::json;

/// Stripe webhook receiver.
///
/// Verifies the signature over the raw body, then reconciles the event.
/// Answers 500 when a store step failed so that Stripe redelivers.
#[utoipa::path(
    post,
    path = "/api/stripe_webhook",
    tag = "webhook",
    request_body(content = String, description = "Raw Stripe event JSON", content_type = "application/json"),
    params(
        ("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")
    ),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature, or malformed payload", body = ApiError),
        (status = 500, description = "Event could not be stored; redeliver", body = ApiError)
    )
)]
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    stripe_service: web::Data<StripeService>,
    webhook_service: web::Data<WebhookService>,
) -> Result<HttpResponse> {
    let Some(signature) = req
        .headers()
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        warn!("Missing Stripe-Signature header");
        return Ok(HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": { "code": "MISSING_SIGNATURE", "message": "Missing Stripe-Signature header" }
        })));
    };

    let event = match stripe_service.verify_and_parse(&body, signature) {
        Ok(event) => event,
        Err(e) if e.is_boundary() => {
            warn!("Webhook verification failed: {e}");
            return Ok(e.error_response());
        }
        Err(e) => {
            error!("Webhook verification failed: {e}");
            return Ok(e.error_response());
        }
    };

    info!(
        "Received Stripe webhook event: {} ({})",
        event.event_type, event.id
    );

    let report = webhook_service.dispatch(&event).await;
    if report.has_failures() {
        error!(
            "Failed to store webhook event {} ({}), requesting redelivery",
            event.event_type, event.id
        );
        return Ok(HttpResponse::InternalServerError().json(json!({
            "success": false,
            "error": { "code": "STORE_FAILED", "message": "Event could not be stored" }
        })));
    }

    Ok(HttpResponse::Ok().json(WebhookAck {
        status: "ok".to_string(),
        processed: report.processed(),
    }))
}

pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/stripe_webhook", web::post().to(stripe_webhook));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StripeConfig;
    use crate::database::test_pool;
    use crate::entities::customer_entity as customers;
    use crate::external::stripe::sign_for_test;
    use actix_web::{App, test};
    use sea_orm::EntityTrait;

    const SECRET: &str = "whsec_handler_test";

    fn stripe_service() -> StripeService {
        StripeService::new(StripeConfig {
            webhook_secret: SECRET.to_string(),
            signature_tolerance_secs: 300,
        })
    }

    #[actix_web::test]
    async fn test_signed_event_is_stored() {
        let db = test_pool().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(stripe_service()))
                .app_data(web::Data::new(WebhookService::new(db.clone())))
                .configure(webhook_config),
        )
        .await;

        let payload = r#"{"id":"evt_1","type":"customer.created","created":1700000000,"data":{"object":{"id":"cus_1","email":"neo@example.com"}}}"#;
        let signature = sign_for_test(SECRET, chrono::Utc::now().timestamp(), payload);
        let req = test::TestRequest::post()
            .uri("/stripe_webhook")
            .insert_header(("Stripe-Signature", signature))
            .set_payload(payload)
            .to_request();
        let resp: WebhookAck = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp.status, "ok");
        assert!(resp.processed);
        let customer = customers::Entity::find_by_id("cus_1").one(&db).await.unwrap();
        assert!(customer.is_some());
    }

    #[actix_web::test]
    async fn test_unsupported_event_is_acknowledged() {
        let db = test_pool().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(stripe_service()))
                .app_data(web::Data::new(WebhookService::new(db)))
                .configure(webhook_config),
        )
        .await;

        let payload = r#"{"id":"evt_2","type":"product.created","created":1700000000,"data":{"object":{"id":"prod_1"}}}"#;
        let signature = sign_for_test(SECRET, chrono::Utc::now().timestamp(), payload);
        let req = test::TestRequest::post()
            .uri("/stripe_webhook")
            .insert_header(("Stripe-Signature", signature))
            .set_payload(payload)
            .to_request();
        let resp: WebhookAck = test::call_and_read_body_json(&app, req).await;

        assert!(!resp.processed);
    }

    #[actix_web::test]
    async fn test_bad_or_missing_signature_is_rejected() {
        let db = test_pool().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(stripe_service()))
                .app_data(web::Data::new(WebhookService::new(db.clone())))
                .configure(webhook_config),
        )
        .await;
        let payload = r#"{"id":"evt_3","type":"customer.created","created":1700000000,"data":{"object":{"id":"cus_9"}}}"#;

        let missing = test::TestRequest::post()
            .uri("/stripe_webhook")
            .set_payload(payload)
            .to_request();
        assert_eq!(test::call_service(&app, missing).await.status(), 400);

        let forged = sign_for_test("whsec_wrong", chrono::Utc::now().timestamp(), payload);
        let forged = test::TestRequest::post()
            .uri("/stripe_webhook")
            .insert_header(("Stripe-Signature", forged))
            .set_payload(payload)
            .to_request();
        assert_eq!(test::call_service(&app, forged).await.status(), 400);

        assert!(customers::Entity::find_by_id("cus_9").one(&db).await.unwrap().is_none());
    }
}
