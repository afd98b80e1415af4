//! Mapping store
//!
//! Every `resolve` reads the backing store; nothing is cached, so a
//! delete is visible to every resolve that starts after it returned.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::entities::mapping;

const MAX_ID_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Tunnel id bound to a backend address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: String,
    pub address: String,
}

impl Mapping {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }

    /// Check that the id can appear in a `/traffic/{id}` path and that the
    /// address looks like `host:port`
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidMapping("id must not be empty".to_string()));
        }
        if self.id.len() > MAX_ID_LEN {
            return Err(StoreError::InvalidMapping(format!(
                "id must be at most {} characters",
                MAX_ID_LEN
            )));
        }
        if self
            .id
            .chars()
            .any(|c| c == '/' || c == '?' || c == '#' || c.is_whitespace() || c.is_control())
        {
            return Err(StoreError::InvalidMapping(format!(
                "id '{}' contains characters not allowed in a path segment",
                self.id
            )));
        }

        let Some((host, port)) = self.address.rsplit_once(':') else {
            return Err(StoreError::InvalidMapping(format!(
                "address '{}' must be host:port",
                self.address
            )));
        };
        if host.is_empty() || port.parse::<u16>().map_or(true, |p| p == 0) {
            return Err(StoreError::InvalidMapping(format!(
                "address '{}' must be host:port",
                self.address
            )));
        }
        Ok(())
    }
}

/// Storage of tunnel id to backend address mappings
#[async_trait]
pub trait MappingStore: Send + Sync + std::fmt::Debug {
    /// Backend address for `id`, if mapped
    async fn resolve(&self, id: &str) -> Result<Option<String>, StoreError>;

    /// Create or overwrite a mapping
    async fn put(&self, id: &str, address: &str) -> Result<(), StoreError>;

    /// Remove a mapping; `false` if it did not exist
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// All mappings, ordered by id
    async fn list(&self) -> Result<Vec<Mapping>, StoreError>;
}

/// Process-local mapping store
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    mappings: DashMap<String, String>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn resolve(&self, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.mappings.get(id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, id: &str, address: &str) -> Result<(), StoreError> {
        Mapping::new(id, address).validate()?;
        self.mappings.insert(id.to_string(), address.to_string());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.mappings.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<Mapping>, StoreError> {
        let mut mappings: Vec<Mapping> = self
            .mappings
            .iter()
            .map(|entry| Mapping::new(entry.key().clone(), entry.value().clone()))
            .collect();
        mappings.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(mappings)
    }
}

/// Mapping store on the `mappings` table
#[derive(Debug, Clone)]
pub struct DbMappingStore {
    db: DatabaseConnection,
}

impl DbMappingStore {
    /// Wrap an already migrated connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Connect to `database_url` and run migrations
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let db = crate::connect(database_url).await?;
        crate::migrate(&db).await?;
        Ok(Self::new(db))
    }
}

#[async_trait]
impl MappingStore for DbMappingStore {
    async fn resolve(&self, id: &str) -> Result<Option<String>, StoreError> {
        let found = mapping::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?;
        Ok(found.map(|model| model.address))
    }

    async fn put(&self, id: &str, address: &str) -> Result<(), StoreError> {
        Mapping::new(id, address).validate()?;

        let model = mapping::ActiveModel {
            id: Set(id.to_string()),
            address: Set(address.to_string()),
            updated_at: Set(Utc::now()),
        };
        mapping::Entity::insert(model)
            .on_conflict(
                OnConflict::column(mapping::Column::Id)
                    .update_columns([mapping::Column::Address, mapping::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        debug!("Stored mapping {} -> {}", id, address);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = mapping::Entity::delete_by_id(id.to_string())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn list(&self) -> Result<Vec<Mapping>, StoreError> {
        let models = mapping::Entity::find()
            .order_by_asc(mapping::Column::Id)
            .all(&self.db)
            .await?;
        Ok(models
            .into_iter()
            .map(|model| Mapping::new(model.id, model.address))
            .collect())
    }
}
