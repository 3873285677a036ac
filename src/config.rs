//! Configuration for Laurel
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::breaker::BreakerConfig;
use crate::governor::{GovernorLimits, WindowRule};
use crate::identity::IdentityClientConfig;

/// Laurel - badge award governance service
#[derive(Parser, Debug, Clone)]
#[command(name = "laurel")]
#[command(about = "Badge award governance service for the Laurel achievement platform")]
pub struct Args {
    /// Unique node identifier for this service instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "laurel")]
    pub mongodb_db: String,

    /// Enable development mode (in-memory stores when MongoDB is absent,
    /// default JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// JWT secret for token verification (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Base URL of the identity subsystem
    #[arg(long, env = "IDENTITY_URL", default_value = "http://localhost:9100")]
    pub identity_url: String,

    /// Identity request timeout in milliseconds
    #[arg(long, env = "IDENTITY_TIMEOUT_MS", default_value = "5000")]
    pub identity_timeout_ms: u64,

    /// Bounded concurrency for identity batch fan-out
    #[arg(long, env = "IDENTITY_BATCH_CONCURRENCY", default_value = "8")]
    pub identity_batch_concurrency: usize,

    /// Circuit breaker: failures within the window that open the circuit
    #[arg(long, env = "BREAKER_FAILURE_THRESHOLD", default_value = "5")]
    pub breaker_failure_threshold: u32,

    /// Circuit breaker: failure monitoring window in seconds
    #[arg(long, env = "BREAKER_WINDOW_SECS", default_value = "60")]
    pub breaker_window_secs: u64,

    /// Circuit breaker: recovery timeout in seconds before a probe
    #[arg(long, env = "BREAKER_RECOVERY_SECS", default_value = "30")]
    pub breaker_recovery_secs: u64,

    /// Badge definition creations allowed per actor per hour
    #[arg(long, env = "LIMIT_CREATE_PER_HOUR", default_value = "10")]
    pub limit_create_per_hour: u32,

    /// Awards allowed per actor per minute
    #[arg(long, env = "LIMIT_AWARD_PER_MINUTE", default_value = "30")]
    pub limit_award_per_minute: u32,

    /// Revocations allowed per actor per minute
    #[arg(long, env = "LIMIT_REVOKE_PER_MINUTE", default_value = "15")]
    pub limit_revoke_per_minute: u32,

    /// Bulk operations allowed per actor per five minutes
    #[arg(long, env = "LIMIT_BULK_PER_5M", default_value = "3")]
    pub limit_bulk_per_5m: u32,

    /// Read operations allowed per actor per minute
    #[arg(long, env = "LIMIT_READ_PER_MINUTE", default_value = "120")]
    pub limit_read_per_minute: u32,

    /// Leaderboard queries allowed per actor per minute
    #[arg(long, env = "LIMIT_LEADERBOARD_PER_MINUTE", default_value = "30")]
    pub limit_leaderboard_per_minute: u32,

    /// Hard ceiling on bulk batch size
    #[arg(long, env = "BULK_MAX_ITEMS", default_value = "500")]
    pub bulk_max_items: usize,

    /// Base URL of the feed service for post-award notifications (optional;
    /// when unset, no notification hook is registered)
    #[arg(long, env = "FEED_URL")]
    pub feed_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> String {
        if self.dev_mode {
            self.jwt_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-secret".to_string())
        } else {
            self.jwt_secret
                .clone()
                .expect("JWT_SECRET is required in production mode")
        }
    }

    /// Governor window rules derived from the configured limits
    pub fn governor_limits(&self) -> GovernorLimits {
        GovernorLimits {
            create_definition: WindowRule {
                window: Duration::from_secs(3600),
                max_count: self.limit_create_per_hour,
            },
            award: WindowRule {
                window: Duration::from_secs(60),
                max_count: self.limit_award_per_minute,
            },
            revoke: WindowRule {
                window: Duration::from_secs(60),
                max_count: self.limit_revoke_per_minute,
            },
            bulk: WindowRule {
                window: Duration::from_secs(300),
                max_count: self.limit_bulk_per_5m,
            },
            read: WindowRule {
                window: Duration::from_secs(60),
                max_count: self.limit_read_per_minute,
            },
            leaderboard: WindowRule {
                window: Duration::from_secs(60),
                max_count: self.limit_leaderboard_per_minute,
            },
        }
    }

    /// Circuit breaker tuning
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            monitoring_window: Duration::from_secs(self.breaker_window_secs),
            recovery_timeout: Duration::from_secs(self.breaker_recovery_secs),
        }
    }

    /// Identity client configuration
    pub fn identity_config(&self) -> IdentityClientConfig {
        IdentityClientConfig {
            base_url: self.identity_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(self.identity_timeout_ms),
            batch_concurrency: self.identity_batch_concurrency.max(1),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.bulk_max_items == 0 {
            return Err("BULK_MAX_ITEMS must be at least 1".to_string());
        }

        if self.breaker_failure_threshold == 0 {
            return Err("BREAKER_FAILURE_THRESHOLD must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args::parse_from(["laurel", "--dev-mode"])
    }

    #[test]
    fn test_dev_mode_defaults() {
        let args = args();
        assert!(args.validate().is_ok());
        assert_eq!(args.jwt_secret(), "dev-only-insecure-secret");
        assert_eq!(args.bulk_max_items, 500);
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        let args = Args::parse_from(["laurel"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["laurel", "--jwt-secret", "s3cret"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_governor_limits_follow_args() {
        let args =
            Args::parse_from(["laurel", "--dev-mode", "--limit-award-per-minute", "7"]);
        let limits = args.governor_limits();
        assert_eq!(limits.award.max_count, 7);
        assert_eq!(limits.award.window, Duration::from_secs(60));
        assert_eq!(limits.bulk.window, Duration::from_secs(300));
    }
}
