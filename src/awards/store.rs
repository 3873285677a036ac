//! Storage seam for the award transaction engine.
//!
//! The engine only ever talks to an [`AwardStore`]; the MongoDB
//! implementation lives in `db::award_store` and enforces atomicity with
//! multi-document transactions plus the unique (subject, definition) index.
//! [`MemoryAwardStore`] mirrors the same semantics for dev mode and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::audit::AuditRecord;
use crate::auth::scope;
use crate::db::schemas::{BadgeAwardDoc, BadgeDefinitionDoc};
use crate::types::{LaurelError, Result};

/// Atomic storage operations for badge definitions and awards.
///
/// `execute_*` methods are transactions: the mutation and its audit record
/// commit together or not at all. Verification inside `execute_award`
/// (definition active/usable, no duplicate) re-runs under the transaction
/// even when the engine already checked, because concurrent callers may have
/// changed the world in between; the unique index stays the final arbiter.
#[async_trait]
pub trait AwardStore: Send + Sync {
    async fn find_definition(&self, definition_id: &str) -> Result<Option<BadgeDefinitionDoc>>;

    async fn find_award(
        &self,
        subject_id: &str,
        definition_id: &str,
    ) -> Result<Option<BadgeAwardDoc>>;

    async fn find_award_by_id(&self, award_id: &str) -> Result<Option<BadgeAwardDoc>>;

    /// Insert a definition; duplicate (institution, name) surfaces as
    /// DuplicateDefinition.
    async fn create_definition(
        &self,
        definition: BadgeDefinitionDoc,
        audit: AuditRecord,
    ) -> Result<BadgeDefinitionDoc>;

    /// Flip a definition inactive. Definitions are never physically deleted.
    async fn deactivate_definition(&self, definition_id: &str, audit: AuditRecord) -> Result<()>;

    /// Atomically verify and insert an award.
    /// Errors: NotFound (definition absent or not usable by the actor's
    /// institution), BadgeInactive, DuplicateAward, Transaction.
    async fn execute_award(
        &self,
        award: BadgeAwardDoc,
        actor_institution: &str,
        audit: AuditRecord,
    ) -> Result<BadgeAwardDoc>;

    /// Atomically delete an award. NotFound when it is already gone.
    async fn execute_revoke(&self, award_id: &str, audit: AuditRecord) -> Result<()>;

    /// List awards within one institution, optionally narrowed to a
    /// department (the department-admin view).
    async fn list_awards(
        &self,
        institution_id: &str,
        department: Option<&str>,
    ) -> Result<Vec<BadgeAwardDoc>>;
}

#[derive(Default)]
struct MemoryInner {
    definitions: HashMap<String, BadgeDefinitionDoc>,
    awards: HashMap<String, BadgeAwardDoc>,
    audits: Vec<AuditRecord>,
}

/// In-memory award store with the same invariants as the MongoDB store.
/// Used in dev mode (no MongoDB) and throughout the engine tests.
#[derive(Default)]
pub struct MemoryAwardStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryAwardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a definition directly (tests, dev fixtures)
    pub async fn put_definition(&self, definition: BadgeDefinitionDoc) {
        let mut inner = self.inner.lock().await;
        inner
            .definitions
            .insert(definition.definition_id.clone(), definition);
    }

    /// Number of stored awards
    pub async fn award_count(&self) -> usize {
        self.inner.lock().await.awards.len()
    }

    /// Copy of the audit trail
    pub async fn audit_log(&self) -> Vec<AuditRecord> {
        self.inner.lock().await.audits.clone()
    }
}

#[async_trait]
impl AwardStore for MemoryAwardStore {
    async fn find_definition(&self, definition_id: &str) -> Result<Option<BadgeDefinitionDoc>> {
        Ok(self
            .inner
            .lock()
            .await
            .definitions
            .get(definition_id)
            .cloned())
    }

    async fn find_award(
        &self,
        subject_id: &str,
        definition_id: &str,
    ) -> Result<Option<BadgeAwardDoc>> {
        Ok(self
            .inner
            .lock()
            .await
            .awards
            .values()
            .find(|a| a.subject_id == subject_id && a.definition_id == definition_id)
            .cloned())
    }

    async fn find_award_by_id(&self, award_id: &str) -> Result<Option<BadgeAwardDoc>> {
        Ok(self.inner.lock().await.awards.get(award_id).cloned())
    }

    async fn create_definition(
        &self,
        definition: BadgeDefinitionDoc,
        audit: AuditRecord,
    ) -> Result<BadgeDefinitionDoc> {
        let mut inner = self.inner.lock().await;

        let duplicate = inner.definitions.values().any(|d| {
            d.institution_id == definition.institution_id && d.name == definition.name
        });
        if duplicate {
            return Err(LaurelError::DuplicateDefinition);
        }

        inner
            .definitions
            .insert(definition.definition_id.clone(), definition.clone());
        inner.audits.push(audit);
        Ok(definition)
    }

    async fn deactivate_definition(&self, definition_id: &str, audit: AuditRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let definition = inner
            .definitions
            .get_mut(definition_id)
            .ok_or_else(|| LaurelError::NotFound("badge definition".into()))?;
        definition.is_active = false;
        inner.audits.push(audit);
        Ok(())
    }

    async fn execute_award(
        &self,
        award: BadgeAwardDoc,
        actor_institution: &str,
        audit: AuditRecord,
    ) -> Result<BadgeAwardDoc> {
        let mut inner = self.inner.lock().await;

        let definition = inner
            .definitions
            .get(&award.definition_id)
            .ok_or_else(|| LaurelError::NotFound("badge definition".into()))?;
        if !definition.is_active {
            return Err(LaurelError::BadgeInactive);
        }
        if !scope::definition_usable_by(definition.institution_id.as_deref(), actor_institution) {
            return Err(LaurelError::NotFound("badge definition".into()));
        }

        let duplicate = inner
            .awards
            .values()
            .any(|a| a.subject_id == award.subject_id && a.definition_id == award.definition_id);
        if duplicate {
            return Err(LaurelError::DuplicateAward);
        }

        inner.awards.insert(award.award_id.clone(), award.clone());
        inner.audits.push(audit);
        Ok(award)
    }

    async fn execute_revoke(&self, award_id: &str, audit: AuditRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.awards.remove(award_id).is_none() {
            return Err(LaurelError::NotFound("badge award".into()));
        }
        inner.audits.push(audit);
        Ok(())
    }

    async fn list_awards(
        &self,
        institution_id: &str,
        department: Option<&str>,
    ) -> Result<Vec<BadgeAwardDoc>> {
        Ok(self
            .inner
            .lock()
            .await
            .awards
            .values()
            .filter(|a| a.subject_institution == institution_id)
            .filter(|a| match department {
                Some(dept) => a.subject_department.as_deref() == Some(dept),
                None => true,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;

    fn definition(id: &str, institution: Option<&str>) -> BadgeDefinitionDoc {
        BadgeDefinitionDoc {
            definition_id: id.to_string(),
            name: format!("badge-{}", id),
            is_active: true,
            institution_id: institution.map(str::to_string),
            created_by: "actor-1".to_string(),
            ..Default::default()
        }
    }

    fn award(id: &str, subject: &str, definition: &str) -> BadgeAwardDoc {
        BadgeAwardDoc {
            award_id: id.to_string(),
            subject_id: subject.to_string(),
            definition_id: definition.to_string(),
            subject_institution: "inst-a".to_string(),
            awarded_by: "actor-1".to_string(),
            reason: "test".to_string(),
            ..Default::default()
        }
    }

    fn audit() -> AuditRecord {
        AuditRecord::new(AuditAction::BadgeAwarded, "actor-1")
    }

    #[tokio::test]
    async fn test_duplicate_award_rejected() {
        let store = MemoryAwardStore::new();
        store.put_definition(definition("d-1", Some("inst-a"))).await;

        store
            .execute_award(award("a-1", "s-1", "d-1"), "inst-a", audit())
            .await
            .unwrap();

        let err = store
            .execute_award(award("a-2", "s-1", "d-1"), "inst-a", audit())
            .await
            .unwrap_err();
        assert!(matches!(err, LaurelError::DuplicateAward));
        assert_eq!(store.award_count().await, 1);
    }

    #[tokio::test]
    async fn test_revoke_then_reaward() {
        let store = MemoryAwardStore::new();
        store.put_definition(definition("d-1", None)).await;

        store
            .execute_award(award("a-1", "s-1", "d-1"), "inst-a", audit())
            .await
            .unwrap();
        store.execute_revoke("a-1", audit()).await.unwrap();
        assert_eq!(store.award_count().await, 0);

        // No residue blocks re-issuance
        store
            .execute_award(award("a-2", "s-1", "d-1"), "inst-a", audit())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cross_institution_definition_hidden() {
        let store = MemoryAwardStore::new();
        store.put_definition(definition("d-1", Some("inst-b"))).await;

        let err = store
            .execute_award(award("a-1", "s-1", "d-1"), "inst-a", audit())
            .await
            .unwrap_err();
        assert!(matches!(err, LaurelError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_inactive_definition_rejected() {
        let store = MemoryAwardStore::new();
        let mut d = definition("d-1", Some("inst-a"));
        d.is_active = false;
        store.put_definition(d).await;

        let err = store
            .execute_award(award("a-1", "s-1", "d-1"), "inst-a", audit())
            .await
            .unwrap_err();
        assert!(matches!(err, LaurelError::BadgeInactive));
    }

    #[tokio::test]
    async fn test_duplicate_definition_name_rejected() {
        let store = MemoryAwardStore::new();
        store
            .create_definition(definition("d-1", Some("inst-a")), audit())
            .await
            .unwrap();

        let mut clash = definition("d-2", Some("inst-a"));
        clash.name = "badge-d-1".to_string();
        let err = store.create_definition(clash, audit()).await.unwrap_err();
        assert!(matches!(err, LaurelError::DuplicateDefinition));
    }

    #[tokio::test]
    async fn test_audit_written_with_mutations() {
        let store = MemoryAwardStore::new();
        store.put_definition(definition("d-1", None)).await;
        store
            .execute_award(award("a-1", "s-1", "d-1"), "inst-a", audit())
            .await
            .unwrap();
        store.execute_revoke("a-1", audit()).await.unwrap();

        assert_eq!(store.audit_log().await.len(), 2);
    }
}
