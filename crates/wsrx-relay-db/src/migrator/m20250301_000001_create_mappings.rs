//! Create the mappings table

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Mappings::Table)
                    .if_not_exists()
                    .col(string_len(Mappings::Id, 255).primary_key())
                    .col(string_len(Mappings::Address, 255).not_null())
                    .col(
                        timestamp_with_time_zone(Mappings::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Mappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Mappings {
    #[sea_orm(iden = "mappings")]
    Table,
    Id,
    Address,
    UpdatedAt,
}
