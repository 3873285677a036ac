//! Audit trail for privileged actions.
//!
//! Every award, revocation, and definition change produces an audit record.
//! Success records for mutations are persisted inside the same transaction
//! as the mutation (the store handles that); denied and failed attempts go
//! through the [`AuditSink`], which never fails the caller.

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use mongodb::Collection;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Collection name for the audit log
pub const AUDIT_COLLECTION: &str = "audit_log";

/// Audited action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    BadgeAwarded,
    BadgeRevoked,
    DefinitionCreated,
    DefinitionDeactivated,
    BulkOperation,
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Actor who performed (or attempted) the action
    pub actor_id: String,
    /// What was attempted
    pub action: AuditAction,
    /// Kind of target ("badge_award", "badge_definition", "bulk")
    pub target_type: String,
    /// Target identifier when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Action-specific details (subject, definition, reason, counts, ...)
    pub details: serde_json::Value,
    /// Whether the action succeeded
    pub success: bool,
    /// Failure kind/message when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Request origin address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl AuditRecord {
    /// Create a successful audit record
    pub fn new(action: AuditAction, actor_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            actor_id: actor_id.into(),
            action,
            target_type: String::new(),
            target_id: None,
            details: serde_json::Value::Null,
            success: true,
            error_message: None,
            origin: None,
        }
    }

    pub fn with_target(mut self, target_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        self.target_type = target_type.into();
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = target_type.into();
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    /// Mark the record as a failed attempt
    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }

    /// BSON form for in-transaction persistence
    pub fn to_document(&self) -> Result<Document, bson::ser::Error> {
        bson::to_document(self)
    }
}

/// Write path for audit records outside transactions.
/// Fire-and-forget: failures are logged, never propagated.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Audit sink writing to the shared audit collection
pub struct MongoAuditSink {
    collection: Collection<Document>,
}

impl MongoAuditSink {
    pub fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }
}

#[async_trait]
impl AuditSink for MongoAuditSink {
    async fn record(&self, record: AuditRecord) {
        let doc = match record.to_document() {
            Ok(doc) => doc,
            Err(e) => {
                error!("Failed to serialize audit record: {}", e);
                return;
            }
        };

        if let Err(e) = self.collection.insert_one(doc).await {
            error!("Failed to write audit record: {}", e);
        }
    }
}

/// Audit sink that only emits structured logs (dev mode, tests)
#[derive(Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        info!(
            target: "audit",
            actor = %record.actor_id,
            action = ?record.action,
            target_type = %record.target_type,
            target_id = record.target_id.as_deref().unwrap_or("-"),
            success = record.success,
            error = record.error_message.as_deref().unwrap_or(""),
            "audit event"
        );
    }
}
