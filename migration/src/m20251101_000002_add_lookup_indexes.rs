use sea_orm_migration::prelude::*;

use crate::m20251101_000001_create_billing_tables::{Charges, Customers, EndUsers, Subscriptions};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_charges_payment_intent")
                    .table(Charges::Table)
                    .col(Charges::PaymentIntentId)
                    .to_owned(),
            )
            .await?;

        for (name, col) in [
            ("idx_customers_email", Customers::Email),
            ("idx_customers_telegram_tag", Customers::TelegramTag),
            ("idx_customers_end_user", Customers::EndUserId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(name)
                        .table(Customers::Table)
                        .col(col)
                        .to_owned(),
                )
                .await?;
        }

        // projector scans a customer's subscriptions newest first
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_subscriptions_customer_updated")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::CustomerId)
                    .col(Subscriptions::Updated)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_end_users_date_end")
                    .table(EndUsers::Table)
                    .col(EndUsers::DateEnd)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_end_users_date_end")
                    .table(EndUsers::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_subscriptions_customer_updated")
                    .table(Subscriptions::Table)
                    .to_owned(),
            )
            .await?;
        for name in [
            "idx_customers_end_user",
            "idx_customers_telegram_tag",
            "idx_customers_email",
        ] {
            manager
                .drop_index(Index::drop().name(name).table(Customers::Table).to_owned())
                .await?;
        }
        manager
            .drop_index(
                Index::drop()
                    .name("idx_charges_payment_intent")
                    .table(Charges::Table)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
