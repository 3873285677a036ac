//! Post-commit hooks shipped with the service.
//!
//! The feed/notification subsystem is external; after an award commits we
//! only hand it the event. Delivery failures stay inside the hook boundary.

use std::time::Duration;

use async_trait::async_trait;

use crate::awards::engine::PostCommitHook;
use crate::db::schemas::BadgeAwardDoc;

/// Notifies the feed service that a badge was awarded.
/// Fire-and-forget: any failure is returned for the engine to log, never to
/// roll back or surface to the award caller.
pub struct FeedNotificationHook {
    http: reqwest::Client,
    feed_url: String,
}

impl FeedNotificationHook {
    pub fn new(feed_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            feed_url: feed_url.into(),
        }
    }
}

#[async_trait]
impl PostCommitHook for FeedNotificationHook {
    async fn after_award(&self, award: &BadgeAwardDoc) -> Result<(), String> {
        let url = format!("{}/api/feed/badge-awarded", self.feed_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "award_id": award.award_id,
                "subject_id": award.subject_id,
                "definition_id": award.definition_id,
                "awarded_by": award.awarded_by,
                "reason": award.reason,
                "project_id": award.project_id,
                "event_id": award.event_id,
            }))
            .send()
            .await
            .map_err(|e| format!("feed post failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("feed post returned {}", response.status()));
        }
        Ok(())
    }
}
