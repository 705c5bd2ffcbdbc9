//! Bounded offload for CPU-bound password hashing.
//!
//! A hash deliberately takes on the order of 100 ms, so it never runs on a
//! request-handler thread: each operation takes a semaphore permit and runs
//! on the blocking pool. The permit count is the admission-control knob;
//! when the queue is full, new logins are rejected with `Throttled` rather
//! than queued without bound. A hash that has started is never abandoned —
//! partial hashes leak timing — so deadlines apply only around this step.

use crate::crypto::password::{PasswordHasher, Verdict};
use crate::error::{AuthError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct HashPool {
    hasher: Arc<PasswordHasher>,
    semaphore: Arc<Semaphore>,
    verify_ops: Arc<AtomicU64>,
}

impl HashPool {
    pub fn new(hasher: Arc<PasswordHasher>, queue_depth: usize) -> Self {
        Self {
            hasher,
            semaphore: Arc::new(Semaphore::new(queue_depth)),
            verify_ops: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Derives a verifier on the blocking pool.
    pub async fn hash(&self, secret: String) -> Result<String> {
        let permit = self.acquire()?;
        let hasher = self.hasher.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = hasher.hash(&secret);
            drop(permit);
            result
        })
        .await
        .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?;
        outcome
    }

    /// Checks a candidate secret against a stored verifier on the blocking
    /// pool.
    pub async fn verify(&self, verifier: String, secret: String) -> Result<Verdict> {
        let permit = self.acquire()?;
        self.verify_ops.fetch_add(1, Ordering::Relaxed);
        let hasher = self.hasher.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = hasher.verify(&verifier, &secret);
            drop(permit);
            result
        })
        .await
        .map_err(|e| AuthError::Internal(format!("verify task: {e}")))?;
        outcome
    }

    /// Burns one verification's worth of work against the sentinel
    /// verifier. Keeps login timing independent of identifier existence.
    pub async fn verify_sentinel(&self, secret: String) -> Result<()> {
        let permit = self.acquire()?;
        self.verify_ops.fetch_add(1, Ordering::Relaxed);
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || {
            hasher.verify_sentinel(&secret);
            drop(permit);
        })
        .await
        .map_err(|e| AuthError::Internal(format!("verify task: {e}")))?;
        Ok(())
    }

    /// Total verifications performed, sentinel verifications included.
    /// Observability for operators and the timing-parity tests.
    pub fn verify_ops(&self) -> u64 {
        self.verify_ops.load(Ordering::Relaxed)
    }

    fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| AuthError::Throttled {
                retry_after_secs: Some(1),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::password::PasswordPolicy;

    fn pool(depth: usize) -> HashPool {
        let hasher = PasswordHasher::new(PasswordPolicy {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        HashPool::new(Arc::new(hasher), depth)
    }

    #[tokio::test]
    async fn hash_and_verify_round_trip_through_the_pool() {
        let pool = pool(4);
        let verifier = pool.hash("hunter2hunter2".to_string()).await.unwrap();
        let verdict = pool
            .verify(verifier, "hunter2hunter2".to_string())
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Match);
    }

    #[tokio::test]
    async fn saturated_pool_rejects_with_throttled() {
        let pool = pool(1);
        // Hold the only permit.
        let _permit = pool.semaphore.clone().try_acquire_owned().unwrap();
        let err = pool.hash("pw".to_string()).await.unwrap_err();
        assert!(matches!(err, AuthError::Throttled { .. }));
    }

    #[tokio::test]
    async fn sentinel_verification_counts_as_a_verify_op() {
        let pool = pool(4);
        assert_eq!(pool.verify_ops(), 0);
        pool.verify_sentinel("whatever".to_string()).await.unwrap();
        assert_eq!(pool.verify_ops(), 1);
    }
}
