//! Tunables for lock acquisition and the withdrawal critical section.
//!
//! Durations are expressed in milliseconds when (de)serialized. Every struct
//! has a `Default` so a configuration file only needs to name what it changes.

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Part of a lease a withdrawal never uses: the debit must be written at least
/// this long before the lock record expires.
pub const COMMIT_MARGIN: Duration = Duration::from_millis(10);

/// Spacing between failed lock acquisition attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    /// Always wait the base delay.
    Fixed,
    /// Multiply the delay by `factor` after every failed attempt, up to `max_delay`.
    Exponential {
        factor: u32,
        #[serde(with = "millis")]
        max_delay: Duration,
    },
}

/// How a held lock is given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStrategy {
    /// Delete the record only while it still carries this acquisition's token.
    #[default]
    Token,
    /// Delete the record whoever holds it. A holder whose lease already expired
    /// can release a lock re-acquired by another replica.
    Unconditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of set-if-absent attempts, the first one included.
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(100),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Wait after the `attempt`-th failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { factor, max_delay } => {
                let exponent = attempt.saturating_sub(1);
                factor
                    .checked_pow(exponent)
                    .and_then(|multiplier| self.delay.checked_mul(multiplier))
                    .map_or(max_delay, |delay| delay.min(max_delay))
            }
        }
    }

    /// Longest time `acquire` spends waiting before giving up.
    pub fn budget(&self) -> Duration {
        (1..self.max_attempts).map(|attempt| self.delay_after(attempt)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Time-to-live of every lock record. Must outlast the critical section.
    #[serde(with = "millis")]
    pub lease: Duration,
    pub retry: RetryPolicy,
    pub release: ReleaseStrategy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            release: ReleaseStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub lock: LockConfig,
    /// Deadline applied to the balance check and debit of a withdrawal. The
    /// critical section is always cut off before the lease runs out, so this
    /// can only shorten it.
    #[serde(with = "option_millis")]
    pub ledger_timeout: Option<Duration>,
}

impl GuardConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| GuardError::Validation(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let lock = &self.lock;
        if lock.lease.is_zero() {
            return Err(GuardError::Validation(
                "lock lease must be longer than zero".to_string(),
            ));
        }
        if lock.lease <= COMMIT_MARGIN {
            return Err(GuardError::Validation(format!(
                "lock lease {:?} leaves no time before the {:?} commit margin",
                lock.lease, COMMIT_MARGIN
            )));
        }
        if lock.retry.max_attempts == 0 {
            return Err(GuardError::Validation(
                "at least one lock acquisition attempt is required".to_string(),
            ));
        }
        if let Backoff::Exponential { factor, max_delay } = lock.retry.backoff {
            if factor == 0 {
                return Err(GuardError::Validation(
                    "exponential backoff factor must be at least 1".to_string(),
                ));
            }
            if max_delay < lock.retry.delay {
                return Err(GuardError::Validation(
                    "backoff max delay is shorter than the base delay".to_string(),
                ));
            }
        }
        if let Some(timeout) = self.ledger_timeout
            && timeout >= lock.lease
        {
            return Err(GuardError::Validation(format!(
                "lock lease {:?} must exceed the ledger timeout {:?}",
                lock.lease, timeout
            )));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::millis::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
