use crate::config::{LockConfig, ReleaseStrategy, RetryPolicy};
use crate::domain::ports::SharedLockService;
use crate::error::{GuardError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Proof of a successful acquisition, consumed by [`DistributedMutex::release`].
///
/// Dropping a guard does not release anything: a holder that never calls
/// `release` keeps the key until the lock service expires it.
#[derive(Debug)]
#[must_use = "a lock that is never released blocks its key for the whole lease"]
pub struct LockGuard {
    key: String,
    token: String,
    acquired_at: Instant,
    lease: Duration,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Moment after which the lock service may hand the key to someone else.
    pub fn expires_at(&self) -> Instant {
        self.acquired_at + self.lease
    }
}

/// Mutual exclusion across processes on top of a [`LockService`].
///
/// `acquire` retries set-if-absent according to the configured [`RetryPolicy`]
/// and fails with [`GuardError::LockUnavailable`] once the attempts run out.
/// Every record carries a lease so a crashed holder cannot block a key forever.
///
/// [`LockService`]: crate::domain::ports::LockService
#[derive(Clone)]
pub struct DistributedMutex {
    locks: SharedLockService,
    retry: RetryPolicy,
    release: ReleaseStrategy,
}

impl DistributedMutex {
    pub fn new(locks: SharedLockService, config: &LockConfig) -> Self {
        Self {
            locks,
            retry: config.retry,
            release: config.release,
        }
    }

    pub async fn acquire(&self, key: &str, lease: Duration) -> Result<LockGuard> {
        let token = Uuid::new_v4().to_string();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let acquired_at = Instant::now();
            // Transport errors end the acquisition here; they are not contention.
            if self.locks.set_if_absent(key, &token, lease).await? {
                debug!(key, attempt, "lock acquired");
                return Ok(LockGuard {
                    key: key.to_string(),
                    token,
                    acquired_at,
                    lease,
                });
            }

            if attempt >= self.retry.max_attempts {
                break;
            }
            let delay = self.retry.delay_after(attempt);
            debug!(key, attempt, ?delay, "lock busy, retrying");
            tokio::time::sleep(delay).await;
        }

        warn!(key, attempts = attempt, "giving up on contended lock");
        Err(GuardError::LockUnavailable {
            key: key.to_string(),
            attempts: attempt,
        })
    }

    pub async fn release(&self, guard: LockGuard) -> Result<()> {
        match self.release {
            ReleaseStrategy::Token => {
                if self.locks.delete_if_value(&guard.key, &guard.token).await? {
                    debug!(key = %guard.key, "lock released");
                    Ok(())
                } else {
                    Err(GuardError::LockNotHeld { key: guard.key })
                }
            }
            ReleaseStrategy::Unconditional => {
                self.locks.delete(&guard.key).await?;
                debug!(key = %guard.key, "lock deleted");
                Ok(())
            }
        }
    }

    /// Deletes `key` regardless of its holder. Operator escape hatch for a lock
    /// left behind by a process that can no longer release it.
    pub async fn force_release(&self, key: &str) -> Result<()> {
        info!(key, "forcing lock release");
        self.locks.delete(key).await
    }
}
