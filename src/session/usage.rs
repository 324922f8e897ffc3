//! Usage accounting
//!
//! The session controller only consumes a policy: a locked flag checked at
//! start, and a per-second recorder that reports when the ceiling is hit.
//! Quota persistence lives outside the core.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub trait UsagePolicy: Send + Sync {
    /// Whether new sessions are currently blocked.
    fn is_locked(&self) -> bool;

    /// Record one second of session time; returns true when the ceiling has
    /// been reached and the session must stop.
    fn record_second(&self) -> bool;

    fn seconds_used(&self) -> u64;
}

/// Free tier: bounded seconds, premium removes the ceiling.
pub struct FreeTierUsage {
    limit_seconds: u64,
    premium: AtomicBool,
    used_seconds: AtomicU64,
}

impl FreeTierUsage {
    pub fn new(limit_seconds: u64) -> Self {
        Self {
            limit_seconds,
            premium: AtomicBool::new(false),
            used_seconds: AtomicU64::new(0),
        }
    }

    pub fn set_premium(&self, premium: bool) {
        self.premium.store(premium, Ordering::SeqCst);
    }

    pub fn is_premium(&self) -> bool {
        self.premium.load(Ordering::SeqCst)
    }
}

impl UsagePolicy for FreeTierUsage {
    fn is_locked(&self) -> bool {
        !self.is_premium() && self.used_seconds.load(Ordering::SeqCst) >= self.limit_seconds
    }

    fn record_second(&self) -> bool {
        if self.is_premium() {
            return false;
        }
        let next = self.used_seconds.load(Ordering::SeqCst) + 1;
        if next >= self.limit_seconds {
            // Clamp at the ceiling
            self.used_seconds.store(self.limit_seconds, Ordering::SeqCst);
            true
        } else {
            self.used_seconds.store(next, Ordering::SeqCst);
            false
        }
    }

    fn seconds_used(&self) -> u64 {
        self.used_seconds.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_locks_at_ceiling() {
        let usage = FreeTierUsage::new(3);
        assert!(!usage.is_locked());
        assert!(!usage.record_second());
        assert!(!usage.record_second());
        assert!(usage.record_second()); // third second hits the ceiling
        assert!(usage.is_locked());
        assert_eq!(usage.seconds_used(), 3);
    }

    #[test]
    fn usage_clamps_at_limit() {
        let usage = FreeTierUsage::new(2);
        for _ in 0..5 {
            usage.record_second();
        }
        assert_eq!(usage.seconds_used(), 2);
    }

    #[test]
    fn premium_never_locks() {
        let usage = FreeTierUsage::new(1);
        usage.set_premium(true);
        assert!(!usage.record_second());
        assert!(!usage.record_second());
        assert!(!usage.is_locked());
        assert_eq!(usage.seconds_used(), 0);
    }
}
