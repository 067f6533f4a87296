use crate::models::*;
use crate::services::ProjectionService;
use actix_web::{HttpResponse, ResponseError, Result, web};
use serde_json::json;

#[utoipa::path(
    post,
    path = "/api/subscription/check",
    tag = "subscription",
    request_body = SubscriptionCheckRequest,
    responses(
        (status = 200, description = "Current access of the resolved user", body = SubscriptionCheckResponse),
        (status = 400, description = "No usable identity hint", body = ApiError)
    )
)]
pub async fn check_subscription(
    projection_service: web::Data<ProjectionService>,
    request: web::Json<SubscriptionCheckRequest>,
) -> Result<HttpResponse> {
    match projection_service.check_subscription(&request).await {
        Ok(response) => Ok(HttpResponse::Ok().json(ApiResponse::success(response))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/subscription/expiring",
    tag = "subscription",
    params(
        ("days" = Option<i64>, Query, description = "Window length in days, values below 1 mean 1"),
        ("start_date" = Option<String>, Query, description = "Window start, YYYY-MM-DD (UTC)")
    ),
    responses(
        (status = 200, description = "Users whose access ends inside the window", body = [ExpiringSubscription]),
        (status = 400, description = "Bad query", body = ApiError)
    )
)]
pub async fn expiring_subscriptions(
    projection_service: web::Data<ProjectionService>,
    query: web::Query<ExpiringQuery>,
) -> Result<HttpResponse> {
    match projection_service.expiring(&query).await {
        Ok(users) => Ok(HttpResponse::Ok().json(ApiResponse::success(users))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/api/subscription/ban",
    tag = "subscription",
    request_body = RevokeSubscriptionRequest,
    responses(
        (status = 200, description = "Access revoked, or user unknown")
    )
)]
pub async fn ban_user(
    projection_service: web::Data<ProjectionService>,
    request: web::Json<RevokeSubscriptionRequest>,
) -> Result<HttpResponse> {
    match projection_service.revoke(request.user_id).await {
        Ok(found) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": { "user_id": request.user_id, "found": found }
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn subscription_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/subscription")
            .route("/check", web::post().to(check_subscription))
            .route("/expiring", web::get().to(expiring_subscriptions))
            .route("/ban", web::post().to(ban_user)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use actix_web::{App, test};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_check_without_hints_is_bad_request() {
        let db = test_pool().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ProjectionService::new(db)))
                .configure(subscription_config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/subscription/check")
            .set_json(json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_check_creates_user_from_id() {
        let db = test_pool().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ProjectionService::new(db)))
                .configure(subscription_config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/subscription/check")
            .set_json(json!({ "user_id": 42, "username": "@neo" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user_id"], 42);
        assert_eq!(body["data"]["customer_found"], false);
        assert_eq!(body["data"]["subscription_status"], false);
    }

    #[actix_web::test]
    async fn test_expiring_and_ban() {
        let db = test_pool().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ProjectionService::new(db)))
                .configure(subscription_config),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/subscription/expiring?days=0&start_date=2023-11-15")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"], json!([]));

        let req = test::TestRequest::post()
            .uri("/subscription/ban")
            .set_json(json!({ "user_id": 404 }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["found"], false);
    }
}
