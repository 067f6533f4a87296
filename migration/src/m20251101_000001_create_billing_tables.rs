use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
pub(crate) enum EndUsers {
    Table,
    Id,
    Username,
    Email,
    SubscriptionStatus,
    DateEnd,
    IsAdmin,
    CreatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum PaymentIntents {
    Table,
    Id,
    Amount,
    Currency,
    Status,
    Description,
    Statement,
    Email,
    CreatedAt,
    Updated,
}

#[derive(DeriveIden)]
pub(crate) enum Charges {
    Table,
    Id,
    PaymentIntentId,
    Amount,
    Currency,
    Status,
    ReceiptUrl,
    Email,
    Phone,
    CreatedAt,
    Updated,
}

#[derive(DeriveIden)]
pub(crate) enum Customers {
    Table,
    Id,
    Name,
    Email,
    Phone,
    TelegramTag,
    Description,
    EndUserId,
    CreatedAt,
    Updated,
}

#[derive(DeriveIden)]
pub(crate) enum Subscriptions {
    Table,
    Id,
    Status,
    CustomerId,
    Started,
    Ending,
    CancelAtPeriodEnd,
    Url,
    CreatedAt,
    Updated,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EndUsers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EndUsers::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EndUsers::Username)
                            .string_len(256)
                            .null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(EndUsers::Email)
                            .string_len(255)
                            .null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(EndUsers::SubscriptionStatus)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(EndUsers::DateEnd)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(EndUsers::IsAdmin)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(EndUsers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PaymentIntents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentIntents::Id)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PaymentIntents::Amount).big_integer().null())
                    .col(ColumnDef::new(PaymentIntents::Currency).string_len(10).null())
                    .col(ColumnDef::new(PaymentIntents::Status).string_len(50).null())
                    .col(
                        ColumnDef::new(PaymentIntents::Description)
                            .string_len(255)
                            .null(),
                    )
                    .col(ColumnDef::new(PaymentIntents::Statement).string_len(128).null())
                    .col(ColumnDef::new(PaymentIntents::Email).string_len(255).null())
                    .col(
                        ColumnDef::new(PaymentIntents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaymentIntents::Updated)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Charges::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Charges::Id)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Charges::PaymentIntentId).string_len(128).null())
                    .col(ColumnDef::new(Charges::Amount).big_integer().null())
                    .col(ColumnDef::new(Charges::Currency).string_len(10).null())
                    .col(ColumnDef::new(Charges::Status).string_len(50).null())
                    .col(ColumnDef::new(Charges::ReceiptUrl).string_len(512).null())
                    .col(ColumnDef::new(Charges::Email).string_len(255).null())
                    .col(ColumnDef::new(Charges::Phone).string_len(32).null())
                    .col(
                        ColumnDef::new(Charges::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Charges::Updated)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_charges_payment_intent")
                            .from(Charges::Table, Charges::PaymentIntentId)
                            .to(PaymentIntents::Table, PaymentIntents::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Customers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Customers::Id)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Customers::Name).string_len(128).null())
                    .col(ColumnDef::new(Customers::Email).string_len(255).null())
                    .col(ColumnDef::new(Customers::Phone).string_len(64).null())
                    .col(ColumnDef::new(Customers::TelegramTag).string_len(128).null())
                    .col(ColumnDef::new(Customers::Description).string_len(255).null())
                    .col(ColumnDef::new(Customers::EndUserId).big_integer().null())
                    .col(
                        ColumnDef::new(Customers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Customers::Updated)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_customers_end_user")
                            .from(Customers::Table, Customers::EndUserId)
                            .to(EndUsers::Table, EndUsers::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscriptions::Id)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Subscriptions::Status).string_len(64).null())
                    .col(ColumnDef::new(Subscriptions::CustomerId).string_len(128).null())
                    .col(
                        ColumnDef::new(Subscriptions::Started)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::Ending)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::CancelAtPeriodEnd)
                            .boolean()
                            .null(),
                    )
                    .col(ColumnDef::new(Subscriptions::Url).string_len(256).null())
                    .col(
                        ColumnDef::new(Subscriptions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::Updated)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_customer")
                            .from(Subscriptions::Table, Subscriptions::CustomerId)
                            .to(Customers::Table, Customers::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // children first so the foreign keys never dangle mid-drop
        manager
            .drop_table(Table::drop().if_exists().table(Subscriptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(Customers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(Charges::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(PaymentIntents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(EndUsers::Table).to_owned())
            .await?;
        Ok(())
    }
}
