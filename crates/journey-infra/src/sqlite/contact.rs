//! SQLite contact store.
//!
//! Contacts are an attribute bag (JSON object) per contact id. The store backs
//! the engine's `ContactResolver` port and the `jrny contact` commands.

use chrono::{DateTime, Utc};
use journey_core::repository::contact::ContactResolver;
use journey_core::workflow::context::context_lookup;
use journey_types::error::RepositoryError;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::workflow::{format_datetime, parse_datetime, parse_uuid, query_err};

/// A stored contact.
#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed contact attributes.
pub struct SqliteContactStore {
    pool: DatabasePool,
}

impl SqliteContactStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Get a contact by id.
    pub async fn get_contact(&self, id: &Uuid) -> Result<Option<Contact>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, organization_id, attributes, created_at, updated_at FROM contacts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id").map_err(query_err)?;
        let organization_id: String = row.try_get("organization_id").map_err(query_err)?;
        let attributes: String = row.try_get("attributes").map_err(query_err)?;
        let created_at: String = row.try_get("created_at").map_err(query_err)?;
        let updated_at: String = row.try_get("updated_at").map_err(query_err)?;

        Ok(Some(Contact {
            id: parse_uuid(&id)?,
            organization_id: parse_uuid(&organization_id)?,
            attributes: serde_json::from_str(&attributes)
                .map_err(|e| RepositoryError::Query(format!("invalid attributes JSON: {e}")))?,
            created_at: parse_datetime(&created_at)?,
            updated_at: parse_datetime(&updated_at)?,
        }))
    }

    /// Merge `attributes` into a contact, creating it if needed.
    ///
    /// Existing keys not named in `attributes` are kept.
    pub async fn upsert_contact(
        &self,
        id: &Uuid,
        organization_id: &Uuid,
        attributes: &Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        let attributes_json = serde_json::to_string(attributes)
            .map_err(|e| RepositoryError::Query(format!("serialize attributes: {e}")))?;
        let now = format_datetime(&Utc::now());

        sqlx::query(
            r#"INSERT INTO contacts (id, organization_id, attributes, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 attributes = json_patch(contacts.attributes, excluded.attributes),
                 updated_at = excluded.updated_at"#,
        )
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .bind(&attributes_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        tracing::debug!(contact_id = %id, fields = attributes.len(), "contact attributes saved");
        Ok(())
    }
}

impl ContactResolver for SqliteContactStore {
    async fn resolve(&self, contact_id: &Uuid, field_name: &str) -> Result<Option<Value>, RepositoryError> {
        let row = sqlx::query("SELECT attributes FROM contacts WHERE id = ?")
            .bind(contact_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let attributes: String = row.try_get("attributes").map_err(query_err)?;
        let attributes: Map<String, Value> = serde_json::from_str(&attributes)
            .map_err(|e| RepositoryError::Query(format!("invalid attributes JSON: {e}")))?;

        Ok(context_lookup(&attributes, field_name)
            .filter(|v| !v.is_null())
            .cloned())
    }
}
