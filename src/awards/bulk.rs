//! Bulk operation orchestrator.
//!
//! Drives many award/revoke items through the engine sequentially. The
//! ordering is deliberate: duplicate-within-batch items resolve
//! deterministically (first wins, second reports duplicate), and a degraded
//! identity subsystem sees one request at a time instead of N concurrent
//! probes racing the circuit breaker.
//!
//! Preview mode runs every validation step with zero storage mutation; the
//! batch consumes one bulk-class governor unit either way, while each
//! executed item still pays the award/revoke class inside the engine.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{AuditAction, AuditRecord, AuditSink};
use crate::auth::ActorContext;
use crate::awards::engine::{AwardEngine, AwardRequest};
use crate::governor::{bulk_size_bucket, OperationClass, ThroughputGovernor};
use crate::types::{LaurelError, Result};

/// What a bulk run does to each item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BulkAction {
    Award,
    Revoke,
}

/// One bulk item; revocations address awards by (subject, definition)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItem {
    pub subject_id: String,
    pub badge_definition_id: String,
    pub reason: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Per-item failure entry
#[derive(Debug, Clone, Serialize)]
pub struct BulkItemFailure {
    /// Position of the item in the submitted batch
    pub index: usize,
    /// Machine-readable error kind
    pub kind: &'static str,
    /// Human message
    pub message: String,
}

/// Aggregate outcome of one bulk call. Returned to the caller, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOperationResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub failures: Vec<BulkItemFailure>,
    pub preview: bool,
}

/// Sequential bulk driver over the award engine
pub struct BulkOrchestrator {
    engine: Arc<AwardEngine>,
    governor: Arc<ThroughputGovernor>,
    audit: Arc<dyn AuditSink>,
    max_items: usize,
}

impl BulkOrchestrator {
    pub fn new(
        engine: Arc<AwardEngine>,
        governor: Arc<ThroughputGovernor>,
        audit: Arc<dyn AuditSink>,
        max_items: usize,
    ) -> Self {
        Self {
            engine,
            governor,
            audit,
            max_items,
        }
    }

    /// Run a batch of items. Pre-flight failures (batch too large, bulk
    /// throughput exceeded) reject the whole call before any item is
    /// touched; per-item failures are recorded and processing continues.
    pub async fn run(
        &self,
        items: Vec<BulkItem>,
        action: BulkAction,
        preview: bool,
        actor: &ActorContext,
    ) -> Result<BulkOperationResult> {
        if items.len() > self.max_items {
            return Err(LaurelError::BulkLimitExceeded {
                requested: items.len(),
                max: self.max_items,
            });
        }

        // The batch as a whole consumes one bulk-class unit, sub-keyed by a
        // coarse size bucket so one huge batch cannot starve normal traffic
        self.governor
            .admit_or_err(actor, OperationClass::Bulk, Some(bulk_size_bucket(items.len())))
            .await?;

        let mut result = BulkOperationResult {
            total: items.len(),
            successful: 0,
            failed: 0,
            failures: Vec::new(),
            preview,
        };

        // Pairs already consumed by earlier items in this batch, so preview
        // predicts the same first-wins outcome execution produces
        let mut batch_pairs: HashSet<(String, String)> = HashSet::new();

        for (index, item) in items.iter().enumerate() {
            let outcome = if preview {
                self.validate_item(item, action, actor, &mut batch_pairs).await
            } else {
                self.execute_item(item, action, actor).await
            };

            match outcome {
                Ok(()) => result.successful += 1,
                Err(e) => {
                    result.failed += 1;
                    result.failures.push(BulkItemFailure {
                        index,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            action = ?action,
            preview,
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            actor = %actor.actor_id,
            "bulk operation finished"
        );

        self.audit
            .record(
                AuditRecord::new(AuditAction::BulkOperation, &actor.actor_id)
                    .with_target_type("bulk")
                    .with_details(serde_json::json!({
                        "action": action,
                        "preview": preview,
                        "total": result.total,
                        "successful": result.successful,
                        "failed": result.failed,
                    }))
                    .with_origin(actor.origin.clone()),
            )
            .await;

        Ok(result)
    }

    async fn execute_item(
        &self,
        item: &BulkItem,
        action: BulkAction,
        actor: &ActorContext,
    ) -> Result<()> {
        match action {
            BulkAction::Award => self
                .engine
                .award(to_request(item), actor)
                .await
                .map(|_| ()),
            BulkAction::Revoke => self
                .engine
                .revoke_pair(&item.subject_id, &item.badge_definition_id, &item.reason, actor)
                .await
                .map(|_| ()),
        }
    }

    async fn validate_item(
        &self,
        item: &BulkItem,
        action: BulkAction,
        actor: &ActorContext,
        batch_pairs: &mut HashSet<(String, String)>,
    ) -> Result<()> {
        let pair = (item.subject_id.clone(), item.badge_definition_id.clone());
        match action {
            BulkAction::Award => {
                if batch_pairs.contains(&pair) {
                    return Err(LaurelError::DuplicateAward);
                }
                self.engine.validate_award(&to_request(item), actor).await?;
                batch_pairs.insert(pair);
                Ok(())
            }
            BulkAction::Revoke => {
                if batch_pairs.contains(&pair) {
                    return Err(LaurelError::NotFound("badge award".into()));
                }
                self.engine
                    .validate_revoke_pair(&item.subject_id, &item.badge_definition_id, actor)
                    .await?;
                batch_pairs.insert(pair);
                Ok(())
            }
        }
    }
}

fn to_request(item: &BulkItem) -> AwardRequest {
    AwardRequest {
        badge_definition_id: item.badge_definition_id.clone(),
        subject_id: item.subject_id.clone(),
        reason: item.reason.clone(),
        project_id: item.project_id.clone(),
        event_id: item.event_id.clone(),
        awarded_by_name: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::audit::TracingAuditSink;
    use crate::auth::Role;
    use crate::awards::store::MemoryAwardStore;
    use crate::db::schemas::BadgeDefinitionDoc;
    use crate::governor::{GovernorLimits, WindowRule};
    use crate::identity::{SubjectDirectory, SubjectRecord, STUDENT_ROLE};

    struct FakeDirectory {
        subjects: HashMap<String, SubjectRecord>,
    }

    #[async_trait]
    impl SubjectDirectory for FakeDirectory {
        async fn lookup(&self, subject_id: &str) -> Option<SubjectRecord> {
            self.subjects.get(subject_id).cloned()
        }

        async fn lookup_batch(&self, subject_ids: &[String]) -> HashMap<String, SubjectRecord> {
            subject_ids
                .iter()
                .filter_map(|id| self.subjects.get(id).map(|r| (id.clone(), r.clone())))
                .collect()
        }
    }

    fn student(id: &str) -> SubjectRecord {
        SubjectRecord {
            subject_id: id.to_string(),
            institution_id: "inst-a".to_string(),
            department: Some("cs".to_string()),
            year: Some(3),
            roles: vec![STUDENT_ROLE.to_string()],
        }
    }

    fn head() -> ActorContext {
        ActorContext::new("head-1", "inst-a").with_roles(vec![Role::InstitutionHead])
    }

    fn item(subject: &str, definition: &str) -> BulkItem {
        BulkItem {
            subject_id: subject.to_string(),
            badge_definition_id: definition.to_string(),
            reason: "semester award".to_string(),
            project_id: None,
            event_id: None,
        }
    }

    async fn setup(max_items: usize) -> (Arc<MemoryAwardStore>, BulkOrchestrator) {
        setup_with_limits(max_items, GovernorLimits::default()).await
    }

    async fn setup_with_limits(
        max_items: usize,
        limits: GovernorLimits,
    ) -> (Arc<MemoryAwardStore>, BulkOrchestrator) {
        let store = Arc::new(MemoryAwardStore::new());
        store
            .put_definition(BadgeDefinitionDoc {
                definition_id: "d-1".to_string(),
                name: "badge-d-1".to_string(),
                is_active: true,
                institution_id: Some("inst-a".to_string()),
                created_by: "head-1".to_string(),
                ..Default::default()
            })
            .await;

        let subjects: HashMap<String, SubjectRecord> = (1..=5)
            .map(|i| format!("u-{}", i))
            .map(|id| (id.clone(), student(&id)))
            .collect();

        let governor = Arc::new(ThroughputGovernor::local_only(limits));
        let engine = Arc::new(AwardEngine::new(
            store.clone(),
            Arc::new(FakeDirectory { subjects }),
            governor.clone(),
            Arc::new(TracingAuditSink),
        ));
        let orchestrator =
            BulkOrchestrator::new(engine, governor, Arc::new(TracingAuditSink), max_items);
        (store, orchestrator)
    }

    #[tokio::test]
    async fn test_over_limit_rejected_before_processing() {
        let (store, orchestrator) = setup(2).await;
        let items = vec![item("u-1", "d-1"), item("u-2", "d-1"), item("u-3", "d-1")];

        let err = orchestrator
            .run(items, BulkAction::Award, false, &head())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LaurelError::BulkLimitExceeded {
                requested: 3,
                max: 2
            }
        ));
        // Zero items processed
        assert_eq!(store.award_count().await, 0);
    }

    #[tokio::test]
    async fn test_partial_success_continues_past_failures() {
        let (store, orchestrator) = setup(100).await;
        let items = vec![
            item("u-1", "d-1"),
            item("u-unknown", "d-1"), // fails: subject absent
            item("u-2", "d-1"),
        ];

        let result = orchestrator
            .run(items, BulkAction::Award, false, &head())
            .await
            .unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].index, 1);
        assert_eq!(result.failures[0].kind, "not_found");
        assert_eq!(store.award_count().await, 2);
    }

    #[tokio::test]
    async fn test_in_batch_duplicate_first_wins() {
        let (store, orchestrator) = setup(100).await;
        let items = vec![item("u-1", "d-1"), item("u-1", "d-1")];

        let result = orchestrator
            .run(items, BulkAction::Award, false, &head())
            .await
            .unwrap();

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].index, 1);
        assert_eq!(result.failures[0].kind, "duplicate_award");
        assert_eq!(store.award_count().await, 1);
    }

    #[tokio::test]
    async fn test_preview_is_a_storage_noop_and_predicts_execution() {
        let (store, orchestrator) = setup(100).await;
        let items = vec![
            item("u-1", "d-1"),
            item("u-unknown", "d-1"),
            item("u-1", "d-1"), // in-batch duplicate
            item("u-2", "d-1"),
        ];

        let preview = orchestrator
            .run(items.clone(), BulkAction::Award, true, &head())
            .await
            .unwrap();
        assert!(preview.preview);
        assert_eq!(store.award_count().await, 0);

        let real = orchestrator
            .run(items, BulkAction::Award, false, &head())
            .await
            .unwrap();
        assert!(!real.preview);

        // Identical per-item pattern
        assert_eq!(preview.successful, real.successful);
        assert_eq!(preview.failed, real.failed);
        let preview_failed: Vec<(usize, &str)> =
            preview.failures.iter().map(|f| (f.index, f.kind)).collect();
        let real_failed: Vec<(usize, &str)> =
            real.failures.iter().map(|f| (f.index, f.kind)).collect();
        assert_eq!(preview_failed, real_failed);
        assert_eq!(store.award_count().await, 2);
    }

    #[tokio::test]
    async fn test_bulk_revoke_by_pair() {
        let (store, orchestrator) = setup(100).await;

        orchestrator
            .run(
                vec![item("u-1", "d-1"), item("u-2", "d-1")],
                BulkAction::Award,
                false,
                &head(),
            )
            .await
            .unwrap();
        assert_eq!(store.award_count().await, 2);

        let result = orchestrator
            .run(
                vec![item("u-1", "d-1"), item("u-3", "d-1")],
                BulkAction::Revoke,
                false,
                &head(),
            )
            .await
            .unwrap();

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].kind, "not_found");
        assert_eq!(store.award_count().await, 1);
    }

    #[tokio::test]
    async fn test_bulk_class_consumed_once_per_call() {
        let limits = GovernorLimits {
            bulk: WindowRule {
                window: Duration::from_secs(300),
                max_count: 1,
            },
            ..GovernorLimits::default()
        };
        let (_, orchestrator) = setup_with_limits(100, limits).await;
        // A department admin gets the base (unwidened) bulk ceiling of one
        let actor = ActorContext::new("dadmin-1", "inst-a")
            .with_roles(vec![Role::DepartmentAdmin])
            .with_department("cs");

        // First batch of several items passes: items do not consume bulk units
        orchestrator
            .run(
                vec![item("u-1", "d-1"), item("u-2", "d-1"), item("u-3", "d-1")],
                BulkAction::Award,
                false,
                &actor,
            )
            .await
            .unwrap();

        // Second batch in the same window hits the bulk ceiling up front
        let err = orchestrator
            .run(vec![item("u-4", "d-1")], BulkAction::Award, false, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, LaurelError::RateLimited { .. }));
    }
}
