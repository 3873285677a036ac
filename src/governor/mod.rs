//! Throughput governor.
//!
//! Sliding-window-log rate limiter keyed by (actor, operation[, sub-key]).
//! Limits are enforced globally across instances through the shared window
//! store; when that store is unreachable the governor degrades to an
//! in-process approximation rather than failing the caller.

pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use crate::auth::{ActorContext, Role};
use crate::types::LaurelError;

pub use store::{MemoryWindowStore, MongoWindowStore, WindowOutcome, WindowStore};

/// Operation classes with independently configured windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    CreateDefinition,
    Award,
    Revoke,
    Bulk,
    Read,
    Leaderboard,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::CreateDefinition => "create_definition",
            OperationClass::Award => "award",
            OperationClass::Revoke => "revoke",
            OperationClass::Bulk => "bulk",
            OperationClass::Read => "read",
            OperationClass::Leaderboard => "leaderboard",
        }
    }
}

/// Window duration and base ceiling for one operation class
#[derive(Debug, Clone, Copy)]
pub struct WindowRule {
    pub window: Duration,
    pub max_count: u32,
}

/// Per-class window rules
#[derive(Debug, Clone)]
pub struct GovernorLimits {
    pub create_definition: WindowRule,
    pub award: WindowRule,
    pub revoke: WindowRule,
    pub bulk: WindowRule,
    pub read: WindowRule,
    pub leaderboard: WindowRule,
}

impl Default for GovernorLimits {
    fn default() -> Self {
        Self {
            create_definition: WindowRule {
                window: Duration::from_secs(3600),
                max_count: 10,
            },
            award: WindowRule {
                window: Duration::from_secs(60),
                max_count: 30,
            },
            revoke: WindowRule {
                window: Duration::from_secs(60),
                max_count: 15,
            },
            bulk: WindowRule {
                window: Duration::from_secs(300),
                max_count: 3,
            },
            read: WindowRule {
                window: Duration::from_secs(60),
                max_count: 120,
            },
            leaderboard: WindowRule {
                window: Duration::from_secs(60),
                max_count: 30,
            },
        }
    }
}

impl GovernorLimits {
    pub fn rule(&self, class: OperationClass) -> WindowRule {
        match class {
            OperationClass::CreateDefinition => self.create_definition,
            OperationClass::Award => self.award,
            OperationClass::Revoke => self.revoke,
            OperationClass::Bulk => self.bulk,
            OperationClass::Read => self.read,
            OperationClass::Leaderboard => self.leaderboard,
        }
    }
}

/// Admission decision for one call
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    /// Slots left in the window after this call
    pub remaining: u32,
    /// When the window frees up entirely
    pub reset_at: DateTime<Utc>,
    /// Seconds until the next slot opens; present only on rejection
    pub retry_after_secs: Option<u64>,
}

/// Role-based ceiling widening. Higher-privilege roles get a higher ceiling
/// for the same operation; the effective multiplier is the maximum across
/// all roles the actor holds, never below 1.
fn role_multiplier(role: Role) -> u32 {
    match role {
        Role::SuperAdmin => 4,
        Role::InstitutionHead => 2,
        Role::DepartmentAdmin | Role::PlacementsAdmin | Role::Faculty => 1,
    }
}

fn effective_max(base: u32, roles: &[Role]) -> u32 {
    let widest = roles.iter().map(|r| role_multiplier(*r)).max().unwrap_or(1);
    base.saturating_mul(widest.max(1))
}

/// Bucket a bulk batch size into a coarse sub-key so one huge batch does not
/// starve normal bulk traffic.
pub fn bulk_size_bucket(items: usize) -> &'static str {
    if items > 100 {
        "large"
    } else {
        "small"
    }
}

/// Sliding-window rate limiter with shared-store degradation
pub struct ThroughputGovernor {
    limits: GovernorLimits,
    shared: Option<Arc<dyn WindowStore>>,
    local: MemoryWindowStore,
}

impl ThroughputGovernor {
    pub fn new(limits: GovernorLimits, shared: Option<Arc<dyn WindowStore>>) -> Self {
        Self {
            limits,
            shared,
            local: MemoryWindowStore::new(),
        }
    }

    /// In-process-only governor (dev mode, tests)
    pub fn local_only(limits: GovernorLimits) -> Self {
        Self::new(limits, None)
    }

    /// Admit or reject one call for `actor` on `class`.
    ///
    /// Limiter infrastructure failure never propagates: a shared-store error
    /// logs a warning and re-runs the check against the local approximation.
    pub async fn admit(
        &self,
        actor: &ActorContext,
        class: OperationClass,
        sub_key: Option<&str>,
    ) -> RateDecision {
        let rule = self.limits.rule(class);
        let max = effective_max(rule.max_count, &actor.roles);
        let key = match sub_key {
            Some(sub) => format!("rl:{}:{}:{}", actor.actor_id, class.as_str(), sub),
            None => format!("rl:{}:{}", actor.actor_id, class.as_str()),
        };
        let now_ms = Utc::now().timestamp_millis();

        let outcome = match &self.shared {
            Some(shared) => match shared.check_and_record(&key, rule.window, max, now_ms).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(key = %key, error = %e, "shared rate store unavailable, using local window");
                    self.local_outcome(&key, rule.window, max, now_ms).await
                }
            },
            None => self.local_outcome(&key, rule.window, max, now_ms).await,
        };

        decision_from(outcome, rule.window, max, now_ms)
    }

    /// Like [`admit`](Self::admit), mapping rejection to a RateLimited error
    pub async fn admit_or_err(
        &self,
        actor: &ActorContext,
        class: OperationClass,
        sub_key: Option<&str>,
    ) -> Result<RateDecision, LaurelError> {
        let decision = self.admit(actor, class, sub_key).await;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(LaurelError::RateLimited {
                retry_after_secs: decision.retry_after_secs.unwrap_or(1),
            })
        }
    }

    async fn local_outcome(
        &self,
        key: &str,
        window: Duration,
        max: u32,
        now_ms: i64,
    ) -> WindowOutcome {
        // The in-process store cannot fail
        self.local
            .check_and_record(key, window, max, now_ms)
            .await
            .unwrap_or(WindowOutcome {
                allowed: true,
                count: 0,
                oldest_ms: None,
            })
    }
}

fn decision_from(
    outcome: WindowOutcome,
    window: Duration,
    max: u32,
    now_ms: i64,
) -> RateDecision {
    let window_ms = window.as_millis() as i64;
    let reset_ms = outcome.oldest_ms.map_or(now_ms, |o| o + window_ms);
    let reset_at = Utc
        .timestamp_millis_opt(reset_ms)
        .single()
        .unwrap_or_else(Utc::now);

    if outcome.allowed {
        RateDecision {
            allowed: true,
            remaining: max.saturating_sub(outcome.count),
            reset_at,
            retry_after_secs: None,
        }
    } else {
        // The next slot opens when the oldest surviving entry ages out
        let retry_ms = outcome
            .oldest_ms
            .map_or(window_ms, |o| (o + window_ms - now_ms).max(0));
        RateDecision {
            allowed: false,
            remaining: 0,
            reset_at,
            retry_after_secs: Some(((retry_ms + 999) / 1000).max(1) as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(roles: Vec<Role>) -> ActorContext {
        ActorContext::new("actor-1", "inst-a").with_roles(roles)
    }

    fn tight_limits() -> GovernorLimits {
        GovernorLimits {
            award: WindowRule {
                window: Duration::from_secs(60),
                max_count: 3,
            },
            ..GovernorLimits::default()
        }
    }

    #[tokio::test]
    async fn test_rejects_after_max_with_retry_hint() {
        let governor = ThroughputGovernor::local_only(tight_limits());
        let a = actor(vec![Role::DepartmentAdmin]);

        for _ in 0..3 {
            let d = governor.admit(&a, OperationClass::Award, None).await;
            assert!(d.allowed);
        }

        let rejected = governor.admit(&a, OperationClass::Award, None).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        let retry = rejected.retry_after_secs.unwrap();
        assert!(retry >= 1 && retry <= 60, "retry_after was {}", retry);
    }

    #[tokio::test]
    async fn test_admitted_again_after_window() {
        let limits = GovernorLimits {
            award: WindowRule {
                window: Duration::from_millis(50),
                max_count: 1,
            },
            ..GovernorLimits::default()
        };
        let governor = ThroughputGovernor::local_only(limits);
        let a = actor(vec![Role::DepartmentAdmin]);

        assert!(governor.admit(&a, OperationClass::Award, None).await.allowed);
        assert!(!governor.admit(&a, OperationClass::Award, None).await.allowed);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(governor.admit(&a, OperationClass::Award, None).await.allowed);
    }

    #[tokio::test]
    async fn test_role_widens_never_narrows() {
        let governor = ThroughputGovernor::local_only(tight_limits());

        // Institution head gets 2x the base ceiling
        let head = actor(vec![Role::InstitutionHead]);
        for i in 0..6 {
            let d = governor.admit(&head, OperationClass::Award, None).await;
            assert!(d.allowed, "head call {} should be admitted", i);
        }
        assert!(!governor.admit(&head, OperationClass::Award, None).await.allowed);

        // Holding an extra weak role does not narrow the ceiling
        let governor = ThroughputGovernor::local_only(tight_limits());
        let mixed = actor(vec![Role::Faculty, Role::InstitutionHead]);
        for _ in 0..6 {
            assert!(governor.admit(&mixed, OperationClass::Award, None).await.allowed);
        }
    }

    #[tokio::test]
    async fn test_operation_classes_independent() {
        let governor = ThroughputGovernor::local_only(tight_limits());
        let a = actor(vec![Role::DepartmentAdmin]);

        for _ in 0..3 {
            governor.admit(&a, OperationClass::Award, None).await;
        }
        assert!(!governor.admit(&a, OperationClass::Award, None).await.allowed);

        // Exhausting the award class leaves reads untouched
        assert!(governor.admit(&a, OperationClass::Read, None).await.allowed);
    }

    #[tokio::test]
    async fn test_bulk_sub_keys_independent() {
        let limits = GovernorLimits {
            bulk: WindowRule {
                window: Duration::from_secs(300),
                max_count: 1,
            },
            ..GovernorLimits::default()
        };
        let governor = ThroughputGovernor::local_only(limits);
        let a = actor(vec![Role::DepartmentAdmin]);

        assert!(governor
            .admit(&a, OperationClass::Bulk, Some("large"))
            .await
            .allowed);
        assert!(!governor
            .admit(&a, OperationClass::Bulk, Some("large"))
            .await
            .allowed);
        // A small batch is not starved by the large one
        assert!(governor
            .admit(&a, OperationClass::Bulk, Some("small"))
            .await
            .allowed);
    }

    #[tokio::test]
    async fn test_admit_or_err_maps_to_rate_limited() {
        let limits = GovernorLimits {
            award: WindowRule {
                window: Duration::from_secs(60),
                max_count: 1,
            },
            ..GovernorLimits::default()
        };
        let governor = ThroughputGovernor::local_only(limits);
        let a = actor(vec![Role::DepartmentAdmin]);

        assert!(governor
            .admit_or_err(&a, OperationClass::Award, None)
            .await
            .is_ok());
        match governor.admit_or_err(&a, OperationClass::Award, None).await {
            Err(LaurelError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected RateLimited, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_bulk_size_bucket() {
        assert_eq!(bulk_size_bucket(1), "small");
        assert_eq!(bulk_size_bucket(100), "small");
        assert_eq!(bulk_size_bucket(101), "large");
    }
}
