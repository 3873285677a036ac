//! Award transaction engine.
//!
//! Validates and executes badge grants and revocations. Each gate is hard:
//! scope, subject eligibility, throughput, then the atomic transaction. The
//! storage layer's unique (subject, definition) index is the final guard
//! against racing grants; everything before it exists to fail fast with a
//! specific error.
//!
//! Side effects after a committed award run as post-commit hooks, each in
//! its own failure boundary; a failing hook is logged and never reported as
//! an award failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditRecord, AuditSink};
use crate::auth::{scope, ActorContext, DataScope};
use crate::awards::store::AwardStore;
use crate::db::schemas::{BadgeAwardDoc, BadgeDefinitionDoc, RarityTier};
use crate::governor::{OperationClass, ThroughputGovernor};
use crate::identity::{SubjectDirectory, SubjectRecord};
use crate::types::{LaurelError, Result};

/// One award request as received from the HTTP layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardRequest {
    pub badge_definition_id: String,
    pub subject_id: String,
    pub reason: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub awarded_by_name: Option<String>,
}

/// Summary returned to the caller after a revocation
#[derive(Debug, Clone, Serialize)]
pub struct RevocationResult {
    pub award_id: String,
    pub subject_id: String,
    pub definition_name: String,
}

/// Input for creating a badge definition
#[derive(Debug, Clone, Deserialize)]
pub struct DefinitionInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub rarity: RarityTier,
    #[serde(default)]
    pub points: i32,
    /// Request a global definition (super-admin only); otherwise the
    /// definition is owned by the actor's institution
    #[serde(default)]
    pub global: bool,
}

/// Side effect run after an award commits (feed posts, notifications).
/// Failures are contained here and never surface to the award caller.
#[async_trait]
pub trait PostCommitHook: Send + Sync {
    async fn after_award(&self, award: &BadgeAwardDoc) -> std::result::Result<(), String>;
}

/// The badge award governance engine
pub struct AwardEngine {
    store: Arc<dyn AwardStore>,
    directory: Arc<dyn SubjectDirectory>,
    governor: Arc<ThroughputGovernor>,
    audit: Arc<dyn AuditSink>,
    hooks: Vec<Arc<dyn PostCommitHook>>,
}

impl AwardEngine {
    pub fn new(
        store: Arc<dyn AwardStore>,
        directory: Arc<dyn SubjectDirectory>,
        governor: Arc<ThroughputGovernor>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            directory,
            governor,
            audit,
            hooks: Vec::new(),
        }
    }

    /// Register a post-commit side effect
    pub fn with_hook(mut self, hook: Arc<dyn PostCommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Grant a badge to a subject.
    pub async fn award(&self, request: AwardRequest, actor: &ActorContext) -> Result<BadgeAwardDoc> {
        let subject = match self.check_award_gates(&request, actor).await {
            Ok(subject) => subject,
            Err(e) => {
                self.audit_failure(AuditAction::BadgeAwarded, actor, &request.subject_id, &e)
                    .await;
                return Err(e);
            }
        };

        // Throughput gate, after the pure checks so doomed requests never
        // spend a slot
        if let Err(e) = self
            .governor
            .admit_or_err(actor, OperationClass::Award, None)
            .await
        {
            self.audit_failure(AuditAction::BadgeAwarded, actor, &request.subject_id, &e)
                .await;
            return Err(e);
        }

        let award = BadgeAwardDoc {
            _id: None,
            metadata: Default::default(),
            award_id: Uuid::new_v4().to_string(),
            subject_id: request.subject_id.clone(),
            definition_id: request.badge_definition_id.clone(),
            subject_institution: subject.institution_id.clone(),
            subject_department: subject.department.clone(),
            awarded_by: actor.actor_id.clone(),
            awarded_by_name: request.awarded_by_name.clone(),
            reason: request.reason.clone(),
            project_id: request.project_id.clone(),
            event_id: request.event_id.clone(),
        };

        let audit = AuditRecord::new(AuditAction::BadgeAwarded, &actor.actor_id)
            .with_target("badge_award", &award.award_id)
            .with_details(serde_json::json!({
                "subject_id": award.subject_id,
                "definition_id": award.definition_id,
                "reason": award.reason,
            }))
            .with_origin(actor.origin.clone());

        let award = match self
            .store
            .execute_award(award, &actor.institution_id, audit)
            .await
        {
            Ok(award) => award,
            Err(e) => {
                self.audit_failure(AuditAction::BadgeAwarded, actor, &request.subject_id, &e)
                    .await;
                return Err(e);
            }
        };

        info!(
            award = %award.award_id,
            subject = %award.subject_id,
            definition = %award.definition_id,
            actor = %actor.actor_id,
            "badge awarded"
        );

        self.run_post_commit(&award).await;
        Ok(award)
    }

    /// Validation-only pass over an award request: scope, subject
    /// eligibility, definition state, duplicate check. Touches no storage
    /// writes and no rate-limit windows; used by bulk preview.
    pub async fn validate_award(&self, request: &AwardRequest, actor: &ActorContext) -> Result<()> {
        self.check_award_gates(request, actor).await?;

        let definition = self
            .store
            .find_definition(&request.badge_definition_id)
            .await?
            .ok_or_else(|| LaurelError::NotFound("badge definition".into()))?;
        if !definition.is_active {
            return Err(LaurelError::BadgeInactive);
        }
        if !scope::definition_usable_by(definition.institution_id.as_deref(), &actor.institution_id)
        {
            return Err(LaurelError::NotFound("badge definition".into()));
        }

        if self
            .store
            .find_award(&request.subject_id, &request.badge_definition_id)
            .await?
            .is_some()
        {
            return Err(LaurelError::DuplicateAward);
        }
        Ok(())
    }

    /// Revoke an award by its identifier.
    pub async fn revoke(
        &self,
        award_id: &str,
        reason: &str,
        actor: &ActorContext,
    ) -> Result<RevocationResult> {
        let result = self.revoke_inner(award_id, reason, actor).await;
        if let Err(e) = &result {
            self.audit_failure(AuditAction::BadgeRevoked, actor, award_id, e)
                .await;
        }
        result
    }

    async fn revoke_inner(
        &self,
        award_id: &str,
        reason: &str,
        actor: &ActorContext,
    ) -> Result<RevocationResult> {
        if award_id.trim().is_empty() || reason.trim().is_empty() {
            return Err(LaurelError::Validation(
                "award_id and reason are required".into(),
            ));
        }

        let award = self
            .store
            .find_award_by_id(award_id)
            .await?
            .ok_or_else(|| LaurelError::NotFound("badge award".into()))?;
        let definition = self
            .store
            .find_definition(&award.definition_id)
            .await?
            .ok_or_else(|| LaurelError::NotFound("badge definition".into()))?;

        if !scope::can_revoke(actor, &award.subject_institution) {
            return Err(LaurelError::AuthorizationDenied(
                "only an institution head may revoke awards".into(),
            ));
        }

        self.governor
            .admit_or_err(actor, OperationClass::Revoke, None)
            .await?;

        // The award row disappears, so the audit record carries its snapshot
        let audit = AuditRecord::new(AuditAction::BadgeRevoked, &actor.actor_id)
            .with_target("badge_award", award_id)
            .with_details(serde_json::json!({
                "subject_id": award.subject_id,
                "definition_id": award.definition_id,
                "definition_name": definition.name,
                "reason": reason,
                "award": serde_json::to_value(&award).unwrap_or_default(),
            }))
            .with_origin(actor.origin.clone());

        self.store.execute_revoke(award_id, audit).await?;

        info!(
            award = %award_id,
            subject = %award.subject_id,
            actor = %actor.actor_id,
            "badge revoked"
        );

        Ok(RevocationResult {
            award_id: award_id.to_string(),
            subject_id: award.subject_id,
            definition_name: definition.name,
        })
    }

    /// Revoke by (subject, definition) pair; bulk items address awards this way.
    pub async fn revoke_pair(
        &self,
        subject_id: &str,
        definition_id: &str,
        reason: &str,
        actor: &ActorContext,
    ) -> Result<RevocationResult> {
        let award = self
            .store
            .find_award(subject_id, definition_id)
            .await?
            .ok_or_else(|| LaurelError::NotFound("badge award".into()))?;
        self.revoke(&award.award_id, reason, actor).await
    }

    /// Validation-only pass over a revocation (bulk preview)
    pub async fn validate_revoke_pair(
        &self,
        subject_id: &str,
        definition_id: &str,
        actor: &ActorContext,
    ) -> Result<()> {
        let award = self
            .store
            .find_award(subject_id, definition_id)
            .await?
            .ok_or_else(|| LaurelError::NotFound("badge award".into()))?;

        if !scope::can_revoke(actor, &award.subject_institution) {
            return Err(LaurelError::AuthorizationDenied(
                "only an institution head may revoke awards".into(),
            ));
        }
        Ok(())
    }

    /// Create a badge definition (institution-head or super-admin only)
    pub async fn create_definition(
        &self,
        input: DefinitionInput,
        actor: &ActorContext,
    ) -> Result<BadgeDefinitionDoc> {
        if input.name.trim().is_empty() {
            return Err(LaurelError::Validation("definition name is required".into()));
        }

        if !scope::can_create_definition(actor) {
            let e = LaurelError::AuthorizationDenied(
                "only an institution head may create badge definitions".into(),
            );
            self.audit_failure(AuditAction::DefinitionCreated, actor, &input.name, &e)
                .await;
            return Err(e);
        }

        self.governor
            .admit_or_err(actor, OperationClass::CreateDefinition, None)
            .await?;

        // Global definitions are reserved for the super scope
        let institution_id = if input.global && scope::can_create_global(actor) {
            None
        } else {
            Some(actor.institution_id.clone())
        };

        let definition = BadgeDefinitionDoc {
            _id: None,
            metadata: Default::default(),
            definition_id: Uuid::new_v4().to_string(),
            name: input.name.trim().to_string(),
            description: input.description,
            icon: input.icon,
            color: input.color,
            category: input.category,
            rarity: input.rarity,
            points: input.points,
            is_active: true,
            institution_id,
            created_by: actor.actor_id.clone(),
        };

        let audit = AuditRecord::new(AuditAction::DefinitionCreated, &actor.actor_id)
            .with_target("badge_definition", &definition.definition_id)
            .with_details(serde_json::json!({
                "name": definition.name,
                "institution_id": definition.institution_id,
            }))
            .with_origin(actor.origin.clone());

        self.store.create_definition(definition, audit).await
    }

    /// Deactivate a definition. Never a physical delete, so awarded history
    /// keeps its referent.
    pub async fn deactivate_definition(
        &self,
        definition_id: &str,
        actor: &ActorContext,
    ) -> Result<()> {
        let definition = self
            .store
            .find_definition(definition_id)
            .await?
            .ok_or_else(|| LaurelError::NotFound("badge definition".into()))?;

        if !scope::can_mutate_definition(actor, definition.institution_id.as_deref()) {
            let e = LaurelError::AuthorizationDenied(
                "definition belongs to another institution".into(),
            );
            self.audit_failure(AuditAction::DefinitionDeactivated, actor, definition_id, &e)
                .await;
            return Err(e);
        }

        self.governor
            .admit_or_err(actor, OperationClass::CreateDefinition, None)
            .await?;

        let audit = AuditRecord::new(AuditAction::DefinitionDeactivated, &actor.actor_id)
            .with_target("badge_definition", definition_id)
            .with_details(serde_json::json!({ "name": definition.name }))
            .with_origin(actor.origin.clone());

        self.store.deactivate_definition(definition_id, audit).await
    }

    /// List awards visible to the actor, bounded by their data scope:
    /// institution-wide for heads and the super scope, one department for a
    /// department admin, institution-wide for a placements admin (the
    /// placement-eligibility filter lives in the identity service's data,
    /// not on award rows).
    pub async fn list_awards(&self, actor: &ActorContext) -> Result<Vec<BadgeAwardDoc>> {
        self.governor
            .admit_or_err(actor, OperationClass::Read, None)
            .await?;

        match scope::resolve_data_scope(actor) {
            DataScope::Institution => self.store.list_awards(&actor.institution_id, None).await,
            DataScope::Department(dept) => {
                self.store
                    .list_awards(&actor.institution_id, Some(&dept))
                    .await
            }
            DataScope::PlacementSubset => {
                self.store.list_awards(&actor.institution_id, None).await
            }
            DataScope::None => Err(LaurelError::AuthorizationDenied(
                "actor has no award read scope".into(),
            )),
        }
    }

    /// Shared gates for award and validate_award: input, pure capability,
    /// subject eligibility, target scope.
    async fn check_award_gates(
        &self,
        request: &AwardRequest,
        actor: &ActorContext,
    ) -> Result<SubjectRecord> {
        if request.subject_id.trim().is_empty()
            || request.badge_definition_id.trim().is_empty()
            || request.reason.trim().is_empty()
        {
            return Err(LaurelError::Validation(
                "subject_id, badge_definition_id and reason are required".into(),
            ));
        }

        // Pure gate before any external call
        if !scope::can_award_at_all(actor) {
            return Err(LaurelError::AuthorizationDenied(
                "actor has no badge-awarding role".into(),
            ));
        }

        // Batch-shaped even for one subject, so N=1 is never special-cased
        let subject = self
            .directory
            .lookup_batch(std::slice::from_ref(&request.subject_id))
            .await
            .remove(&request.subject_id)
            .ok_or_else(|| LaurelError::NotFound("subject".into()))?;

        if !scope::can_manage(actor, &subject.institution_id, subject.department.as_deref()) {
            // Wrong institution and truly absent are indistinguishable by
            // design; in-institution scope misses are explicit
            if subject.institution_id != actor.institution_id {
                return Err(LaurelError::NotFound("subject".into()));
            }
            return Err(LaurelError::AuthorizationDenied(
                "subject is outside the actor's scope".into(),
            ));
        }

        if !subject.is_student() {
            return Err(LaurelError::NotFound("subject".into()));
        }

        Ok(subject)
    }

    async fn run_post_commit(&self, award: &BadgeAwardDoc) {
        for hook in &self.hooks {
            if let Err(e) = hook.after_award(award).await {
                warn!(award = %award.award_id, error = %e, "post-commit hook failed");
            }
        }
    }

    async fn audit_failure(
        &self,
        action: AuditAction,
        actor: &ActorContext,
        target_id: &str,
        error: &LaurelError,
    ) {
        self.audit
            .record(
                AuditRecord::new(action, &actor.actor_id)
                    .with_target_type("badge_award")
                    .with_details(serde_json::json!({ "target": target_id }))
                    .with_origin(actor.origin.clone())
                    .failed(error.kind()),
            )
            .await;
    }
}
