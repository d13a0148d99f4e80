//! Contact field resolver port.

use journey_types::error::RepositoryError;
use uuid::Uuid;

/// Supplies contact attributes referenced by field-based splits, conditions
/// and message templates.
pub trait ContactResolver: Send + Sync {
    /// Resolve `field_name` for a contact. `Ok(None)` when the contact or the
    /// field is absent.
    fn resolve(
        &self,
        contact_id: &Uuid,
        field_name: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;
}
