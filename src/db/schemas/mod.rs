//! Document schemas for the badge collections

pub mod award;
pub mod badge;
pub mod metadata;

pub use award::{BadgeAwardDoc, BADGE_AWARD_COLLECTION};
pub use badge::{BadgeDefinitionDoc, RarityTier, BADGE_DEFINITION_COLLECTION};
pub use metadata::Metadata;
