use crate::error::{AppError, AppResult};
use crate::models::WebhookEvent;
use crate::services::customer_service::CustomerService;
use crate::services::identity_service::IdentityService;
use crate::services::payment_service::PaymentService;
use crate::services::projection_service::{ProjectionService, ProjectionSource};
use crate::services::subscription_service::SubscriptionService;
use sea_orm::DatabaseConnection;
use std::fmt::Display;

/// Handling chosen for an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRoute {
    PaymentIntent,
    Charge,
    Customer,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    CheckoutCompleted,
    Unsupported,
}

impl EventRoute {
    pub fn for_event_type(event_type: &str) -> Self {
        // family prefixes first: every payment_intent.* and charge.* event
        if event_type.contains("payment_intent") {
            return EventRoute::PaymentIntent;
        }
        if event_type.contains("charge") {
            return EventRoute::Charge;
        }
        match event_type {
            "customer.created" | "customer.updated" => EventRoute::Customer,
            "customer.subscription.created" => EventRoute::SubscriptionCreated,
            "customer.subscription.updated" => EventRoute::SubscriptionUpdated,
            "customer.subscription.deleted" => EventRoute::SubscriptionDeleted,
            "invoice.paid" => EventRoute::InvoicePaid,
            "checkout.session.completed" => EventRoute::CheckoutCompleted,
            _ => EventRoute::Unsupported,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done(String),
    /// The payload could not be used; redelivery would not help.
    Rejected(String),
    /// Store failure; the event should be redelivered.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: &'static str,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_id: String,
    pub event_type: String,
    pub route: EventRoute,
    pub steps: Vec<StepReport>,
}

impl DispatchReport {
    fn new(event: &WebhookEvent, route: EventRoute) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            route,
            steps: Vec::new(),
        }
    }

    /// Whether the event type is one this service reconciles.
    pub fn processed(&self) -> bool {
        self.route != EventRoute::Unsupported
    }

    pub fn has_failures(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.outcome, StepOutcome::Failed(_)))
    }

    fn record<T: Display>(&mut self, step: &'static str, result: AppResult<T>) {
        let outcome = match result {
            Ok(value) => {
                log::info!("[WEBHOOK] {} {}: {step} {value}", self.event_type, self.event_id);
                StepOutcome::Done(value.to_string())
            }
            Err(err @ AppError::DatabaseError(_)) | Err(err @ AppError::Conflict(_)) => {
                log::error!("[WEBHOOK] {} {}: {step} failed: {err}", self.event_type, self.event_id);
                StepOutcome::Failed(err.to_string())
            }
            Err(err) => {
                log::warn!("[WEBHOOK] {} {}: {step} rejected: {err}", self.event_type, self.event_id);
                StepOutcome::Rejected(err.to_string())
            }
        };
        self.steps.push(StepReport { step, outcome });
    }
}

/// Routes verified webhook events to the reconcilers.
#[derive(Clone)]
pub struct WebhookService {
    payments: PaymentService,
    customers: CustomerService,
    subscriptions: SubscriptionService,
    identity: IdentityService,
    projection: ProjectionService,
}

impl WebhookService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self {
            payments: PaymentService::new(pool.clone()),
            customers: CustomerService::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool.clone()),
            identity: IdentityService::new(pool.clone()),
            projection: ProjectionService::new(pool),
        }
    }

    /// Runs every step for the event. A failed step does not stop the
    /// independent steps after it.
    pub async fn dispatch(&self, event: &WebhookEvent) -> DispatchReport {
        let route = EventRoute::for_event_type(&event.event_type);
        let mut report = DispatchReport::new(event, route);

        match route {
            EventRoute::PaymentIntent => {
                report.record("payment_intent", self.payments.save_payment_intent(event).await);
            }
            EventRoute::Charge => {
                report.record("charge", self.payments.save_charge(event).await);
            }
            EventRoute::Customer => {
                report.record("customer", self.customers.save_customer(event).await);
            }
            EventRoute::SubscriptionCreated => {
                report.record("subscription", self.subscriptions.save_subscription(event).await);
            }
            EventRoute::SubscriptionUpdated => {
                report.record("subscription", self.subscriptions.save_subscription(event).await);
                report.record(
                    "end_user",
                    self.projection
                        .project_event(event, ProjectionSource::SubscriptionUpdated)
                        .await,
                );
            }
            EventRoute::SubscriptionDeleted => {
                report.record("subscription", self.subscriptions.end_subscription(event).await);
                report.record(
                    "end_user",
                    self.projection
                        .project_event(event, ProjectionSource::SubscriptionDeleted)
                        .await,
                );
            }
            EventRoute::InvoicePaid => {
                report.record(
                    "end_user",
                    self.projection
                        .project_event(event, ProjectionSource::InvoicePaid)
                        .await,
                );
            }
            EventRoute::CheckoutCompleted => {
                report.record("telegram_tag", self.identity.save_telegram_tag(event).await);
                report.record(
                    "customer_details",
                    self.identity.backfill_customer_details(event).await,
                );
                report.record("end_user_link", self.identity.link_end_user(event).await);
            }
            EventRoute::Unsupported => {
                log::info!(
                    "[WEBHOOK] {} {}: unsupported event type, ignored",
                    event.event_type,
                    event.id
                );
            }
        }

        report
    }
}
