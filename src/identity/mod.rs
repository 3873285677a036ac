//! Identity subsystem client.
//!
//! Resolves subjects (students) against the identity service through the
//! circuit breaker. Not-found, unauthorized, timeout, and breaker-open all
//! collapse to an absence result: calling code has exactly one failure path,
//! and only the logs distinguish the causes. The decision layer therefore
//! cannot leak whether a subject is absent or merely unreachable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::breaker::{BreakerError, CircuitBreaker};

/// Role string the identity service uses for students
pub const STUDENT_ROLE: &str = "STUDENT";

/// Subject record as returned by the identity subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub subject_id: String,
    pub institution_id: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SubjectRecord {
    /// Whether the identity service considers this subject a student
    pub fn is_student(&self) -> bool {
        self.roles.iter().any(|r| r == STUDENT_ROLE)
    }
}

/// Subject resolution seam. The engine and orchestrator only ever use the
/// batch shape, so N=1 is never a special case.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Resolve one subject; absence covers not-found, unauthorized, and
    /// unreachable alike.
    async fn lookup(&self, subject_id: &str) -> Option<SubjectRecord>;

    /// Resolve many subjects in as few round-trips as the identity service
    /// allows. Missing ids are simply absent from the map.
    async fn lookup_batch(&self, subject_ids: &[String]) -> HashMap<String, SubjectRecord>;
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct IdentityClientConfig {
    /// Base URL of the identity service
    pub base_url: String,
    /// Per-request timeout; a timeout counts as a breaker failure
    pub timeout: Duration,
    /// Bounded concurrency for the single-lookup fan-out fallback
    pub batch_concurrency: usize,
}

impl Default for IdentityClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9100".to_string(),
            timeout: Duration::from_secs(5),
            batch_concurrency: 8,
        }
    }
}

enum LookupFailure {
    Transport(String),
    Upstream(u16),
}

impl std::fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupFailure::Transport(e) => write!(f, "transport error: {}", e),
            LookupFailure::Upstream(status) => write!(f, "upstream status {}", status),
        }
    }
}

/// HTTP client over the identity subsystem, breaker-wrapped
pub struct IdentityClient {
    http: reqwest::Client,
    config: IdentityClientConfig,
    breaker: Arc<CircuitBreaker>,
}

impl IdentityClient {
    pub fn new(config: IdentityClientConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            breaker,
        }
    }

    /// One round-trip single lookup. A 404/403 is a *successful* dependency
    /// call that found nothing; only transport errors and 5xx count against
    /// the breaker.
    async fn fetch_one(&self, subject_id: &str) -> Result<Option<SubjectRecord>, LookupFailure> {
        let url = format!("{}/api/subjects/{}", self.config.base_url, subject_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| LookupFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<SubjectRecord>()
                .await
                .map(Some)
                .map_err(|e| LookupFailure::Transport(e.to_string()))
        } else if status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Ok(None)
        } else {
            Err(LookupFailure::Upstream(status.as_u16()))
        }
    }

    /// One round-trip batch lookup. `Ok(None)` means the identity service
    /// does not expose the batch contract and the caller should fan out.
    async fn fetch_batch(
        &self,
        subject_ids: &[String],
    ) -> Result<Option<HashMap<String, SubjectRecord>>, LookupFailure> {
        #[derive(Serialize)]
        struct BatchRequest<'a> {
            ids: &'a [String],
        }

        let url = format!("{}/api/subjects/batch", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .json(&BatchRequest { ids: subject_ids })
            .send()
            .await
            .map_err(|e| LookupFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<HashMap<String, SubjectRecord>>()
                .await
                .map(Some)
                .map_err(|e| LookupFailure::Transport(e.to_string()))
        } else if status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::METHOD_NOT_ALLOWED
        {
            Ok(None)
        } else {
            Err(LookupFailure::Upstream(status.as_u16()))
        }
    }
}

#[async_trait]
impl SubjectDirectory for IdentityClient {
    async fn lookup(&self, subject_id: &str) -> Option<SubjectRecord> {
        let result = self.breaker.call(|| self.fetch_one(subject_id)).await;

        match result {
            Ok(record) => record,
            Err(BreakerError::Open { dependency, .. }) => {
                debug!(subject = %subject_id, dependency = %dependency, "subject lookup skipped, circuit open");
                None
            }
            Err(BreakerError::Inner(e)) => {
                warn!(subject = %subject_id, error = %e, "subject lookup failed");
                None
            }
        }
    }

    async fn lookup_batch(&self, subject_ids: &[String]) -> HashMap<String, SubjectRecord> {
        if subject_ids.is_empty() {
            return HashMap::new();
        }

        match self.breaker.call(|| self.fetch_batch(subject_ids)).await {
            Ok(Some(records)) => return records,
            Ok(None) => {
                debug!("identity service has no batch endpoint, fanning out");
            }
            Err(BreakerError::Open { dependency, .. }) => {
                debug!(dependency = %dependency, "batch lookup skipped, circuit open");
                return HashMap::new();
            }
            Err(BreakerError::Inner(e)) => {
                warn!(error = %e, "batch lookup failed, fanning out");
            }
        }

        // Bounded-concurrency fan-out of single lookups; each one still goes
        // through the breaker.
        let results: Vec<(String, Option<SubjectRecord>)> = stream::iter(subject_ids.iter().cloned())
            .map(|id| async move {
                let record = self.lookup(&id).await;
                (id, record)
            })
            .buffer_unordered(self.config.batch_concurrency)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(id, record)| record.map(|r| (id, r)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;

    #[test]
    fn test_student_role_detection() {
        let mut record = SubjectRecord {
            subject_id: "s-1".into(),
            institution_id: "inst-a".into(),
            department: Some("cs".into()),
            year: Some(3),
            roles: vec!["STUDENT".into()],
        };
        assert!(record.is_student());

        record.roles = vec!["ALUMNUS".into()];
        assert!(!record.is_student());
    }

    #[tokio::test]
    async fn test_open_breaker_collapses_to_absence() {
        let breaker = Arc::new(CircuitBreaker::new(
            "identity",
            BreakerConfig {
                failure_threshold: 1,
                monitoring_window: Duration::from_secs(60),
                recovery_timeout: Duration::from_secs(3600),
            },
        ));
        // Trip the breaker without touching the network
        let _ = breaker.call(|| async { Err::<(), _>("down") }).await;

        let client = IdentityClient::new(IdentityClientConfig::default(), breaker);

        // Fails fast, no transport attempt, absence result
        assert!(client.lookup("s-1").await.is_none());
        assert!(client
            .lookup_batch(&["s-1".to_string(), "s-2".to_string()])
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        let breaker = Arc::new(CircuitBreaker::new("identity", BreakerConfig::default()));
        let client = IdentityClient::new(IdentityClientConfig::default(), breaker.clone());

        assert!(client.lookup_batch(&[]).await.is_empty());
        // No request was made, so the breaker saw no traffic
        assert_eq!(breaker.stats().await.total_requests, 0);
    }
}
