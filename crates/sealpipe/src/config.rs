//! Session configuration.

use std::future::Future;
use std::time::Duration;

use sealpipe_core::{SpaceHandle, UserId, KEY_BITS};
use tracing::warn;

use crate::error::{Result, SealpipeError};

/// Local user id environment variable.
pub const ENV_USER: &str = "SEALPIPE_USER";
/// Data space handle environment variable.
pub const ENV_SPACE: &str = "SEALPIPE_SPACE";
/// Maximum attempts per retried step.
pub const ENV_RETRY_ATTEMPTS: &str = "SEALPIPE_RETRY_ATTEMPTS";
/// Initial retry backoff in milliseconds.
pub const ENV_RETRY_BACKOFF_MS: &str = "SEALPIPE_RETRY_BACKOFF_MS";
/// Retry backoff cap in milliseconds.
pub const ENV_RETRY_MAX_BACKOFF_MS: &str = "SEALPIPE_RETRY_MAX_BACKOFF_MS";
/// Concurrent reseals per rotation step.
pub const ENV_ROTATION_PARALLELISM: &str = "SEALPIPE_ROTATION_PARALLELISM";
/// Engine load timeout in seconds.
pub const ENV_LOADER_TIMEOUT_SECS: &str = "SEALPIPE_LOADER_TIMEOUT_SECS";

/// Retry policy for network-bound steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No retries and no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Exponential backoff before retry number `attempt + 1`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<SealpipeError>,
    {
        let mut attempt = 0;
        loop {
            match op().await.map_err(Into::into) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff_for_attempt(attempt);
                    warn!(what, attempt, ?delay, error = %e, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Rotation tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    /// Size of newly generated space keys.
    pub key_bits: u32,
    /// Records resealed concurrently within one step.
    pub max_parallel: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            key_bits: KEY_BITS,
            max_parallel: 16,
        }
    }
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user: UserId,
    pub space: SpaceHandle,
    pub retry: RetryPolicy,
    pub rotation: RotationConfig,
    /// How long to wait for an engine to load.
    pub loader_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user: UserId::from("local"),
            space: SpaceHandle::from("default"),
            retry: RetryPolicy::default(),
            rotation: RotationConfig::default(),
            loader_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn new(user: impl Into<UserId>, space: impl Into<SpaceHandle>) -> Self {
        Self {
            user: user.into(),
            space: space.into(),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rotation(mut self, rotation: RotationConfig) -> Self {
        self.rotation = rotation;
        self
    }

    /// Defaults overlaid with `SEALPIPE_*` environment variables.
    ///
    /// Supported variables:
    /// - `SEALPIPE_USER`, `SEALPIPE_SPACE`
    /// - `SEALPIPE_RETRY_ATTEMPTS`, `SEALPIPE_RETRY_BACKOFF_MS`, `SEALPIPE_RETRY_MAX_BACKOFF_MS`
    /// - `SEALPIPE_ROTATION_PARALLELISM`
    /// - `SEALPIPE_LOADER_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`SessionConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user) = lookup(ENV_USER) {
            config.user = UserId::from(user);
        }
        if let Some(space) = lookup(ENV_SPACE) {
            config.space = SpaceHandle::from(space);
        }
        if let Some(n) = parse::<u32>(&lookup, ENV_RETRY_ATTEMPTS)? {
            if n == 0 {
                return Err(SealpipeError::Config(format!(
                    "invalid {ENV_RETRY_ATTEMPTS}: must be at least 1"
                )));
            }
            config.retry.max_attempts = n;
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_RETRY_BACKOFF_MS)? {
            config.retry.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_RETRY_MAX_BACKOFF_MS)? {
            config.retry.max_backoff = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<usize>(&lookup, ENV_ROTATION_PARALLELISM)? {
            config.rotation.max_parallel = n.max(1);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_LOADER_TIMEOUT_SECS)? {
            config.loader_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|val| {
            val.parse()
                .map_err(|e| SealpipeError::Config(format!("invalid {key}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn test_from_lookup_overlays_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[
            (ENV_USER, "alice"),
            (ENV_SPACE, "sales"),
            (ENV_RETRY_ATTEMPTS, "3"),
            (ENV_RETRY_BACKOFF_MS, "5"),
        ]))
        .unwrap();

        assert_eq!(config.user, UserId::from("alice"));
        assert_eq!(config.space, SpaceHandle::from("sales"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(5));
        assert_eq!(config.rotation, RotationConfig::default());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        assert!(matches!(
            SessionConfig::from_lookup(lookup(&[(ENV_RETRY_ATTEMPTS, "many")])),
            Err(SealpipeError::Config(_))
        ));
        assert!(SessionConfig::from_lookup(lookup(&[(ENV_RETRY_ATTEMPTS, "0")])).is_err());
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        };
        let result: Result<()> = policy
            .run("test", || {
                calls.set(calls.get() + 1);
                async { Err(SealpipeError::ManifestSignatureInvalid) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_retry_transient_until_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        };
        let result = policy
            .run("test", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(SealpipeError::Network("reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts() {
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
        .run("test", || {
            calls.set(calls.get() + 1);
            async { Err(SealpipeError::Network("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(SealpipeError::Network(_))));
        assert_eq!(calls.get(), 2);
    }
}
