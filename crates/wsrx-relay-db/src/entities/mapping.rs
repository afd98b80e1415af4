//! Tunnel id to backend address mapping

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mappings")]
pub struct Model {
    /// Tunnel id, the `{id}` of `/traffic/{id}`
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Backend `host:port`
    pub address: String,

    /// Last create or overwrite
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
