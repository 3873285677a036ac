//! Badge definition document schema
//!
//! A reusable credential template. Definitions are never physically deleted;
//! deactivation flips `is_active` so awarded history keeps its referent.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for badge definitions
pub const BADGE_DEFINITION_COLLECTION: &str = "badge_definitions";

/// Rarity tiers, ordered from most to least common
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RarityTier {
    #[default]
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

/// Badge definition document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BadgeDefinitionDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable public identifier
    pub definition_id: String,

    /// Display name, unique within the owning institution
    pub name: String,

    /// Description shown on profiles
    #[serde(default)]
    pub description: String,

    /// Icon identifier
    #[serde(default)]
    pub icon: String,

    /// Display color
    #[serde(default)]
    pub color: String,

    /// Category (academic, extracurricular, placement, ...)
    #[serde(default)]
    pub category: String,

    /// Rarity tier
    #[serde(default)]
    pub rarity: RarityTier,

    /// Point value credited to the subject's profile
    #[serde(default)]
    pub points: i32,

    /// Whether the definition can currently be awarded
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Owning institution; None means global (usable by any institution)
    #[serde(default)]
    pub institution_id: Option<String>,

    /// Actor who created the definition
    pub created_by: String,
}

fn default_true() -> bool {
    true
}

impl IntoIndexes for BadgeDefinitionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique public identifier
            (
                doc! { "definition_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("definition_id_unique".to_string())
                        .build(),
                ),
            ),
            // One name per institution (null institution = the global pool)
            (
                doc! { "institution_id": 1, "name": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("institution_name_unique".to_string())
                        .build(),
                ),
            ),
            // Listing active definitions per institution
            (
                doc! { "institution_id": 1, "is_active": 1 },
                Some(
                    IndexOptions::builder()
                        .name("institution_active_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for BadgeDefinitionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rarity_ordering() {
        assert!(RarityTier::Common < RarityTier::Uncommon);
        assert!(RarityTier::Uncommon < RarityTier::Rare);
        assert!(RarityTier::Rare < RarityTier::Epic);
        assert!(RarityTier::Epic < RarityTier::Legendary);
    }

    #[test]
    fn test_rarity_serializes_uppercase() {
        let json = serde_json::to_string(&RarityTier::Legendary).unwrap();
        assert_eq!(json, "\"LEGENDARY\"");
    }
}
