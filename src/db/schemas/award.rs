//! Badge award document schema
//!
//! One document per held badge. The unique (subject_id, definition_id) index
//! is the single source of truth for the at-most-one-award invariant under
//! concurrency; application-level checks are only a fast path for friendly
//! errors. Revocation hard-deletes the document, with the revocation itself
//! recorded in the audit log.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for badge awards
pub const BADGE_AWARD_COLLECTION: &str = "badge_awards";

/// Badge award document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BadgeAwardDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable public identifier
    pub award_id: String,

    /// Subject (student) holding the badge
    pub subject_id: String,

    /// Badge definition this award instantiates
    pub definition_id: String,

    /// Subject's institution at award time; lets revocation gate on scope
    /// without a fresh identity lookup
    pub subject_institution: String,

    /// Subject's department at award time
    #[serde(default)]
    pub subject_department: Option<String>,

    /// Actor who granted the award
    pub awarded_by: String,

    /// Display name of the granting actor, as provided by the caller
    #[serde(default)]
    pub awarded_by_name: Option<String>,

    /// Why the badge was granted
    pub reason: String,

    /// Linked project, when the award recognizes project work
    #[serde(default)]
    pub project_id: Option<String>,

    /// Linked event, when the award recognizes event participation
    #[serde(default)]
    pub event_id: Option<String>,
}

impl IntoIndexes for BadgeAwardDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // The at-most-one-award invariant; the authority under concurrency
            (
                doc! { "subject_id": 1, "definition_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("subject_definition_unique".to_string())
                        .build(),
                ),
            ),
            // Unique public identifier
            (
                doc! { "award_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("award_id_unique".to_string())
                        .build(),
                ),
            ),
            // Profile listing
            (
                doc! { "subject_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("subject_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for BadgeAwardDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
