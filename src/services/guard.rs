use crate::models::config::GuardConfig;
use crate::models::signal::{SignalKind, SignalValue};
use std::fmt;
use tokio::time::Instant;

/// Per-profile level-up bookkeeping shared by the percentage signals
#[derive(Debug, Clone, Default)]
pub struct LevelUpState {
    last_level_change: Option<Instant>,
    lock_at: Option<Instant>,
}

impl LevelUpState {
    pub fn last_level_change(&self) -> Option<Instant> {
        self.last_level_change
    }

    pub fn lock_at(&self) -> Option<Instant> {
        self.lock_at
    }
}

/// Why a percentage read was rejected
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Drop above the per-tick maximum outside any grace window
    Drop { prev: f64, next: f64 },
    /// 9x% read as 8x%
    DecadeSlip { prev: f64, next: f64 },
    /// Rise above the per-tick maximum
    Spike { prev: f64, next: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Drop { prev, next } => write!(f, "drop {:.4} -> {:.4}", prev, next),
            Rejection::DecadeSlip { prev, next } => write!(f, "decade slip {:.4} -> {:.4}", prev, next),
            Rejection::Spike { prev, next } => write!(f, "spike {:.4} -> {:.4}", prev, next),
        }
    }
}

/// Accepts or rejects freshly parsed values against the previous one and
/// tracks level-up transitions of the experience bar.
#[derive(Debug, Clone, Default)]
pub struct PlausibilityGuard {
    config: GuardConfig,
}

impl PlausibilityGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    fn lock_active(&self, state: &LevelUpState, now: Instant) -> bool {
        state
            .lock_at
            .map_or(false, |at| now.duration_since(at).as_millis() < self.config.levelup_lock_ms as u128)
    }

    fn within_grace(&self, state: &LevelUpState, now: Instant) -> bool {
        state
            .last_level_change
            .map_or(false, |at| now.duration_since(at).as_millis() <= self.config.level_drop_grace_ms as u128)
    }

    /// Large drop from a high value to near zero
    fn is_levelup_drop(&self, prev: f64, next: f64) -> bool {
        prev - next >= self.config.levelup_drop_min
            && next <= self.config.reset_threshold
            && prev >= self.config.levelup_drop_min
    }

    /// Check a new value against the previous one. Only percentage signals
    /// with a previous value are constrained.
    pub fn check(
        &self,
        kind: SignalKind,
        prev: Option<&SignalValue>,
        next: &SignalValue,
        state: &LevelUpState,
        now: Instant,
    ) -> Result<(), Rejection> {
        if !kind.is_percent_like() {
            return Ok(());
        }
        let (Some(prev), Some(next)) = (prev.and_then(SignalValue::as_percent), next.as_percent()) else {
            return Ok(());
        };

        let drop = prev - next;
        let rise = next - prev;
        let reset_drop = self.is_levelup_drop(prev, next) && !self.lock_active(state, now);
        let allow_drop = self.within_grace(state, now) || reset_drop;

        if !allow_drop && drop > self.config.max_drop_per_tick {
            return Err(Rejection::Drop { prev, next });
        }
        if kind == SignalKind::Exp && (90.0..100.0).contains(&prev) && (80.0..90.0).contains(&next) {
            return Err(Rejection::DecadeSlip { prev, next });
        }
        if rise > self.config.max_rise_per_tick {
            return Err(Rejection::Spike { prev, next });
        }
        if !allow_drop && drop > self.config.hard_drop_limit {
            return Err(Rejection::Drop { prev, next });
        }
        Ok(())
    }

    /// Update level-up state after a value was accepted. Returns true when an
    /// experience level-up was detected.
    pub fn observe(
        &self,
        kind: SignalKind,
        prev: Option<&SignalValue>,
        next: &SignalValue,
        state: &mut LevelUpState,
        now: Instant,
    ) -> bool {
        match kind {
            SignalKind::Exp => self.observe_exp(prev.and_then(SignalValue::as_percent), next.as_percent(), state, now),
            SignalKind::Level => {
                let changed = match (prev.and_then(SignalValue::as_level), next.as_level()) {
                    (_, None) => false,
                    (None, Some(_)) => true,
                    (Some(p), Some(n)) => p != n,
                };
                if changed {
                    state.last_level_change = Some(now);
                }
                false
            }
            _ => false,
        }
    }

    fn observe_exp(&self, prev: Option<f64>, next: Option<f64>, state: &mut LevelUpState, now: Instant) -> bool {
        let lock_active = self.lock_active(state, now);
        if let Some(next) = next {
            if next < self.config.reset_threshold && !lock_active {
                state.lock_at = None;
            }
        }
        if lock_active {
            return false;
        }

        let by_threshold = match next {
            Some(n) => n >= self.config.levelup_threshold && prev.unwrap_or(0.0) < self.config.levelup_threshold,
            None => false,
        };
        let by_drop = match (prev, next) {
            (Some(p), Some(n)) => p - n >= self.config.levelup_drop_min && n <= self.config.reset_threshold,
            _ => false,
        };

        if by_threshold || by_drop {
            state.lock_at = Some(now);
            state.last_level_change = Some(now);
            true
        } else {
            false
        }
    }
}
