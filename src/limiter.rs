//! Release rate limiting per (source, ligand).
//!
//! Each pair owns a token bucket refilled at the ligand's maximum sustainable
//! frequency and capped at the configured burst. Buckets live in a sharded
//! map, so a hot pair only contends with pairs hashed to the same shard and
//! only for a few arithmetic operations.

use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::config::ModulatorConfig;
use crate::error::{ModulatorError, Result};
use crate::ligand::LigandType;
use crate::position::ComponentId;

/// Slack for float rounding when a token has just refilled.
const TOKEN_EPSILON: f64 = 1.0e-9;

#[derive(Clone, Copy, Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn try_take(&mut self, now: Instant, rate_hz: f64, burst: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if now > self.last_refill {
            self.last_refill = now;
        }
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate_hz).min(burst);
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }
}

/// Per-source, per-ligand release frequency gate.
#[derive(Debug)]
pub struct ReleaseRateLimiter {
    buckets: DashMap<(ComponentId, LigandType), TokenBucket>,
    burst: f64,
    max_keys: usize,
}

impl ReleaseRateLimiter {
    pub fn new(config: &ModulatorConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            burst: config.rate_burst as f64,
            max_keys: config.max_rate_keys,
        }
    }

    /// Record a release attempt from `source` at `now`.
    ///
    /// # Errors
    ///
    /// - [`ModulatorError::RateExceeded`] when the pair has no token left; nothing is recorded.
    /// - [`ModulatorError::ResourceExhausted`] when a new pair would exceed the key ceiling.
    pub fn check(&self, source: ComponentId, ligand: LigandType, now: Instant) -> Result<()> {
        let key = (source, ligand);
        let rate = ligand.kinetics().max_frequency_hz as f64;

        if let Some(mut bucket) = self.buckets.get_mut(&key) {
            return if bucket.try_take(now, rate, self.burst) {
                Ok(())
            } else {
                Err(ModulatorError::RateExceeded {
                    ligand,
                    source_id: source,
                })
            };
        }

        if self.buckets.len() >= self.max_keys {
            return Err(ModulatorError::ResourceExhausted {
                resource: "rate limiter keys",
                limit: self.max_keys,
            });
        }

        match self.buckets.entry(key) {
            Entry::Occupied(mut entry) => {
                // Lost a race with another first release from the same pair.
                if entry.get_mut().try_take(now, rate, self.burst) {
                    Ok(())
                } else {
                    Err(ModulatorError::RateExceeded {
                        ligand,
                        source_id: source,
                    })
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(TokenBucket {
                    tokens: self.burst - 1.0,
                    last_refill: now,
                });
                Ok(())
            }
        }
    }

    /// Boolean form of [`check`](Self::check).
    pub fn allow(&self, source: ComponentId, ligand: LigandType, now: Instant) -> bool {
        self.check(source, ligand, now).is_ok()
    }

    /// Clear all recorded history.
    pub fn reset(&self) {
        let pairs = self.buckets.len();
        self.buckets.clear();
        debug!(pairs, "Rate limiter reset");
    }

    /// Drop every bucket belonging to `source`.
    pub fn forget_source(&self, source: ComponentId) {
        self.buckets.retain(|(id, _), _| *id != source);
    }

    /// Number of tracked (source, ligand) pairs.
    pub fn tracked_pairs(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn limiter() -> ReleaseRateLimiter {
        ReleaseRateLimiter::new(&ModulatorConfig::default())
    }

    #[test]
    fn test_first_release_allowed() {
        let l = limiter();
        assert!(l.allow(ComponentId(1), LigandType::Dopamine, Instant::now()));
        assert_eq!(l.tracked_pairs(), 1);
    }

    #[test]
    fn test_burst_rejected_then_refills() {
        let l = limiter();
        let t0 = Instant::now();
        let src = ComponentId(1);
        // Dopamine: 20 Hz, one release per 50ms.
        assert!(l.allow(src, LigandType::Dopamine, t0));
        assert!(matches!(
            l.check(src, LigandType::Dopamine, t0 + Duration::from_millis(10)),
            Err(ModulatorError::RateExceeded { .. })
        ));
        assert!(!l.allow(src, LigandType::Dopamine, t0 + Duration::from_millis(40)));
        assert!(l.allow(src, LigandType::Dopamine, t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_rejection_does_not_consume() {
        let l = limiter();
        let t0 = Instant::now();
        let src = ComponentId(5);
        // Glutamate: 1000 Hz.
        assert!(l.allow(src, LigandType::Glutamate, t0));
        for i in 1..10 {
            assert!(!l.allow(src, LigandType::Glutamate, t0 + Duration::from_micros(i * 50)));
        }
        assert!(l.allow(src, LigandType::Glutamate, t0 + Duration::from_millis(1)));
    }

    #[test]
    fn test_pairs_are_independent() {
        let l = limiter();
        let t0 = Instant::now();
        assert!(l.allow(ComponentId(1), LigandType::Serotonin, t0));
        assert!(!l.allow(ComponentId(1), LigandType::Serotonin, t0));
        assert!(l.allow(ComponentId(2), LigandType::Serotonin, t0));
        assert!(l.allow(ComponentId(1), LigandType::Dopamine, t0));
    }

    #[test]
    fn test_configured_burst() {
        let l = ReleaseRateLimiter::new(&ModulatorConfig::default().with_rate_burst(3.0));
        let t0 = Instant::now();
        let accepted = (0..10)
            .filter(|_| l.allow(ComponentId(9), LigandType::Serotonin, t0))
            .count();
        assert_eq!(accepted, 3);
    }

    #[test]
    fn test_reset_clears_history() {
        let l = limiter();
        let t0 = Instant::now();
        assert!(l.allow(ComponentId(1), LigandType::Serotonin, t0));
        assert!(!l.allow(ComponentId(1), LigandType::Serotonin, t0));
        l.reset();
        assert_eq!(l.tracked_pairs(), 0);
        assert!(l.allow(ComponentId(1), LigandType::Serotonin, t0));
    }

    #[test]
    fn test_forget_source() {
        let l = limiter();
        let t0 = Instant::now();
        l.allow(ComponentId(1), LigandType::Serotonin, t0);
        l.allow(ComponentId(1), LigandType::Dopamine, t0);
        l.allow(ComponentId(2), LigandType::Dopamine, t0);
        l.forget_source(ComponentId(1));
        assert_eq!(l.tracked_pairs(), 1);
    }

    #[test]
    fn test_key_ceiling() {
        let l = ReleaseRateLimiter::new(&ModulatorConfig::default().with_max_rate_keys(2));
        let t0 = Instant::now();
        assert!(l.check(ComponentId(1), LigandType::Gaba, t0).is_ok());
        assert!(l.check(ComponentId(2), LigandType::Gaba, t0).is_ok());
        assert!(matches!(
            l.check(ComponentId(3), LigandType::Gaba, t0),
            Err(ModulatorError::ResourceExhausted { limit: 2, .. })
        ));
    }

    #[test]
    fn test_concurrent_first_release_admits_one() {
        let l = Arc::new(limiter());
        let t0 = Instant::now();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let l = Arc::clone(&l);
                thread::spawn(move || l.allow(ComponentId(42), LigandType::Serotonin, t0))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().expect("limiter thread panicked"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
