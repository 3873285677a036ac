//! MongoDB-backed award store.
//!
//! Mutations run as multi-document transactions so the award row and its
//! audit record commit together. The unique (subject_id, definition_id)
//! index is the final arbiter for duplicate awards: two concurrent awarders
//! can both pass the in-transaction pre-check, but only one insert survives;
//! the loser's duplicate-key error maps to DuplicateAward.

use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::{Client, ClientSession, Collection};

use crate::audit::{AuditRecord, AUDIT_COLLECTION};
use crate::auth::scope;
use crate::awards::store::AwardStore;
use crate::db::mongo::{is_duplicate_key_error, MongoClient, MongoCollection};
use crate::db::schemas::{
    BadgeAwardDoc, BadgeDefinitionDoc, Metadata, BADGE_AWARD_COLLECTION,
    BADGE_DEFINITION_COLLECTION,
};
use crate::types::{LaurelError, Result};

/// Award store over MongoDB collections
pub struct MongoAwardStore {
    client: Client,
    definitions: MongoCollection<BadgeDefinitionDoc>,
    awards: MongoCollection<BadgeAwardDoc>,
    audit: Collection<Document>,
}

impl MongoAwardStore {
    /// Wrap the badge collections, applying their indexes
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let definitions = mongo
            .collection::<BadgeDefinitionDoc>(BADGE_DEFINITION_COLLECTION)
            .await?;
        let awards = mongo
            .collection::<BadgeAwardDoc>(BADGE_AWARD_COLLECTION)
            .await?;
        let audit = mongo.raw_collection(AUDIT_COLLECTION);

        Ok(Self {
            client: mongo.inner().clone(),
            definitions,
            awards,
            audit,
        })
    }

    async fn start_transaction(&self) -> Result<ClientSession> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| LaurelError::Transaction(format!("session: {}", e)))?;
        session
            .start_transaction()
            .await
            .map_err(|e| LaurelError::Transaction(format!("begin: {}", e)))?;
        Ok(session)
    }

    async fn commit(&self, mut session: ClientSession) -> Result<()> {
        session
            .commit_transaction()
            .await
            .map_err(|e| LaurelError::Transaction(format!("commit: {}", e)))
    }

    async fn insert_audit(
        &self,
        session: &mut ClientSession,
        audit: &AuditRecord,
    ) -> Result<()> {
        let doc = audit
            .to_document()
            .map_err(|e| LaurelError::Transaction(format!("audit serialize: {}", e)))?;
        self.audit
            .insert_one(doc)
            .session(session)
            .await
            .map_err(|e| LaurelError::Transaction(format!("audit insert: {}", e)))?;
        Ok(())
    }

    async fn award_in_txn(
        &self,
        session: &mut ClientSession,
        mut award: BadgeAwardDoc,
        actor_institution: &str,
        audit: &AuditRecord,
    ) -> Result<BadgeAwardDoc> {
        // Re-fetch the definition under the transaction; the fail-fast check
        // the engine already ran does not hold against concurrent edits.
        let definition = self
            .definitions
            .inner()
            .find_one(doc! { "definition_id": &award.definition_id })
            .session(&mut *session)
            .await
            .map_err(|e| LaurelError::Transaction(format!("definition fetch: {}", e)))?
            .ok_or_else(|| LaurelError::NotFound("badge definition".into()))?;

        if !definition.is_active {
            return Err(LaurelError::BadgeInactive);
        }
        if !scope::definition_usable_by(definition.institution_id.as_deref(), actor_institution) {
            return Err(LaurelError::NotFound("badge definition".into()));
        }

        // Friendly fast path; the unique index below is the real guard
        let existing = self
            .awards
            .inner()
            .find_one(doc! {
                "subject_id": &award.subject_id,
                "definition_id": &award.definition_id,
            })
            .session(&mut *session)
            .await
            .map_err(|e| LaurelError::Transaction(format!("award fetch: {}", e)))?;
        if existing.is_some() {
            return Err(LaurelError::DuplicateAward);
        }

        award.metadata = Metadata::new();
        let inserted = self
            .awards
            .inner()
            .insert_one(&award)
            .session(&mut *session)
            .await
            .map_err(|e| {
                if is_duplicate_key_error(&e) {
                    LaurelError::DuplicateAward
                } else {
                    LaurelError::Transaction(format!("award insert: {}", e))
                }
            })?;
        award._id = inserted.inserted_id.as_object_id();

        self.insert_audit(session, audit).await?;
        Ok(award)
    }
}

#[async_trait]
impl AwardStore for MongoAwardStore {
    async fn find_definition(&self, definition_id: &str) -> Result<Option<BadgeDefinitionDoc>> {
        self.definitions
            .find_one(doc! { "definition_id": definition_id })
            .await
    }

    async fn find_award(
        &self,
        subject_id: &str,
        definition_id: &str,
    ) -> Result<Option<BadgeAwardDoc>> {
        self.awards
            .find_one(doc! { "subject_id": subject_id, "definition_id": definition_id })
            .await
    }

    async fn find_award_by_id(&self, award_id: &str) -> Result<Option<BadgeAwardDoc>> {
        self.awards.find_one(doc! { "award_id": award_id }).await
    }

    async fn create_definition(
        &self,
        mut definition: BadgeDefinitionDoc,
        audit: AuditRecord,
    ) -> Result<BadgeDefinitionDoc> {
        let mut session = self.start_transaction().await?;

        definition.metadata = Metadata::new();
        let result = async {
            let inserted = self
                .definitions
                .inner()
                .insert_one(&definition)
                .session(&mut session)
                .await
                .map_err(|e| {
                    if is_duplicate_key_error(&e) {
                        LaurelError::DuplicateDefinition
                    } else {
                        LaurelError::Transaction(format!("definition insert: {}", e))
                    }
                })?;
            definition._id = inserted.inserted_id.as_object_id();
            self.insert_audit(&mut session, &audit).await?;
            Ok(definition.clone())
        }
        .await;

        match result {
            Ok(definition) => {
                self.commit(session).await?;
                Ok(definition)
            }
            Err(e) => {
                let _ = session.abort_transaction().await;
                Err(e)
            }
        }
    }

    async fn deactivate_definition(&self, definition_id: &str, audit: AuditRecord) -> Result<()> {
        let mut session = self.start_transaction().await?;

        let result = async {
            let updated = self
                .definitions
                .inner()
                .update_one(
                    doc! { "definition_id": definition_id },
                    doc! { "$set": {
                        "is_active": false,
                        "metadata.updated_at": bson::DateTime::now(),
                    } },
                )
                .session(&mut session)
                .await
                .map_err(|e| LaurelError::Transaction(format!("deactivate: {}", e)))?;

            if updated.matched_count == 0 {
                return Err(LaurelError::NotFound("badge definition".into()));
            }
            self.insert_audit(&mut session, &audit).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => self.commit(session).await,
            Err(e) => {
                let _ = session.abort_transaction().await;
                Err(e)
            }
        }
    }

    async fn execute_award(
        &self,
        award: BadgeAwardDoc,
        actor_institution: &str,
        audit: AuditRecord,
    ) -> Result<BadgeAwardDoc> {
        let mut session = self.start_transaction().await?;

        match self
            .award_in_txn(&mut session, award, actor_institution, &audit)
            .await
        {
            Ok(award) => {
                self.commit(session).await?;
                Ok(award)
            }
            Err(e) => {
                let _ = session.abort_transaction().await;
                Err(e)
            }
        }
    }

    async fn list_awards(
        &self,
        institution_id: &str,
        department: Option<&str>,
    ) -> Result<Vec<BadgeAwardDoc>> {
        let mut filter = doc! { "subject_institution": institution_id };
        if let Some(dept) = department {
            filter.insert("subject_department", dept);
        }
        self.awards.find_many(filter).await
    }

    async fn execute_revoke(&self, award_id: &str, audit: AuditRecord) -> Result<()> {
        let mut session = self.start_transaction().await?;

        let result = async {
            let deleted = self
                .awards
                .inner()
                .delete_one(doc! { "award_id": award_id })
                .session(&mut session)
                .await
                .map_err(|e| LaurelError::Transaction(format!("award delete: {}", e)))?;

            if deleted.deleted_count == 0 {
                // Already revoked by a concurrent caller
                return Err(LaurelError::NotFound("badge award".into()));
            }
            self.insert_audit(&mut session, &audit).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => self.commit(session).await,
            Err(e) => {
                let _ = session.abort_transaction().await;
                Err(e)
            }
        }
    }
}
