use crate::models::element::Element;
use crate::models::settings::{clamp_manual_level, ManualLevelOverride, MIN_MANUAL_LEVEL};
use crate::models::signal::{SignalKind, SignalValue};
use crate::models::telemetry::{EventMeta, TelemetryEvent, TelemetrySnapshot};
use crate::services::guard::{LevelUpState, PlausibilityGuard, Rejection};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Last known value of one signal
#[derive(Debug, Clone)]
struct Slot {
    value: Option<SignalValue>,
    updated_at: Instant,
}

/// Cache entry of one profile
#[derive(Debug, Default)]
struct ProfileCache {
    slots: BTreeMap<SignalKind, Slot>,
    updated_at: Option<DateTime<Utc>>,
    element: Option<Element>,
    level_state: LevelUpState,
    manual_level: Option<ManualLevelOverride>,
}

impl ProfileCache {
    fn value(&self, kind: SignalKind) -> Option<&SignalValue> {
        self.slots.get(&kind).and_then(|s| s.value.as_ref())
    }

    fn set(&mut self, kind: SignalKind, value: Option<SignalValue>, now: Instant) {
        self.slots.insert(kind, Slot { value, updated_at: now });
        self.updated_at = Some(Utc::now());
    }

    /// Published view: manual level substituted, enemy label derived
    fn snapshot(&self) -> TelemetrySnapshot {
        let mut values: BTreeMap<SignalKind, SignalValue> = self
            .slots
            .iter()
            .filter_map(|(kind, slot)| slot.value.clone().map(|v| (*kind, v)))
            .collect();
        let mut updated_at = self.updated_at;
        let mut manual_level = false;

        if let Some(manual) = self.manual_level.as_ref().filter(|m| m.enabled) {
            values.insert(SignalKind::Level, SignalValue::Level(manual.value));
            updated_at = Some(updated_at.map_or(manual.updated_at, |at| at.max(manual.updated_at)));
            manual_level = true;
        }

        let enemy_label = values
            .get(&SignalKind::EnemyName)
            .and_then(SignalValue::as_text)
            .map(|name| match self.element {
                Some(element) => format!("{} ({})", name, element),
                None => name.to_string(),
            });

        TelemetrySnapshot {
            values,
            updated_at,
            element: self.element,
            enemy_label,
            manual_level,
        }
    }

    fn event(&self, profile_id: &str, kind: SignalKind, meta: Option<EventMeta>) -> TelemetryEvent {
        let snapshot = self.snapshot();
        TelemetryEvent {
            profile_id: profile_id.to_string(),
            signal: kind,
            value: snapshot.get(kind).cloned(),
            snapshot,
            timestamp: Utc::now(),
            meta,
        }
    }
}

/// Result of offering a recognized value to the store
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Accepted { event: TelemetryEvent, level_up: bool },
    Rejected(Rejection),
}

impl ApplyOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ApplyOutcome::Accepted { .. })
    }
}

/// Last-known-good values per profile.
///
/// Guard checks and cache mutation happen under one lock, so each tick's
/// update is atomic. The lock is never held across an await.
pub struct TelemetryStore {
    guard: PlausibilityGuard,
    stale_clear: Duration,
    profiles: Mutex<HashMap<String, ProfileCache>>,
}

impl TelemetryStore {
    pub fn new(guard: PlausibilityGuard, stale_clear_ms: u64) -> Self {
        Self {
            guard,
            stale_clear: Duration::from_millis(stale_clear_ms),
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Guard a recognized value and store it when plausible
    pub fn apply(&self, profile_id: &str, kind: SignalKind, value: SignalValue) -> ApplyOutcome {
        let now = Instant::now();
        let mut profiles = self.profiles.lock();
        let cache = profiles.entry(profile_id.to_string()).or_default();
        let prev = cache.value(kind).cloned();

        if let Err(rejection) = self.guard.check(kind, prev.as_ref(), &value, &cache.level_state, now) {
            debug!("{}/{} rejected: {}", profile_id, kind, rejection);
            return ApplyOutcome::Rejected(rejection);
        }

        let level_up = self
            .guard
            .observe(kind, prev.as_ref(), &value, &mut cache.level_state, now);
        cache.set(kind, Some(value), now);

        ApplyOutcome::Accepted {
            event: cache.event(profile_id, kind, None),
            level_up,
        }
    }

    /// Clear a slot whose value has not been refreshed for the stale period.
    /// Returns the clearing event, or `None` when nothing was cleared.
    pub fn clear_if_stale(&self, profile_id: &str, kind: SignalKind) -> Option<TelemetryEvent> {
        let now = Instant::now();
        let mut profiles = self.profiles.lock();
        let cache = profiles.get_mut(profile_id)?;
        let slot = cache.slots.get(&kind)?;
        if slot.value.is_none() || now.duration_since(slot.updated_at) < self.stale_clear {
            return None;
        }

        cache.set(kind, None, now);
        if kind == SignalKind::EnemyName {
            cache.element = None;
        }
        debug!("{}/{} cleared after {:?}", profile_id, kind, self.stale_clear);
        Some(cache.event(profile_id, kind, Some(EventMeta::Cleared)))
    }

    /// Patch the manual level override. Returns the new override and the
    /// level event to publish.
    pub fn set_manual_level(
        &self,
        profile_id: &str,
        value: Option<u32>,
        enabled: Option<bool>,
    ) -> (ManualLevelOverride, TelemetryEvent) {
        let mut profiles = self.profiles.lock();
        let cache = profiles.entry(profile_id.to_string()).or_default();

        let current = cache.manual_level.clone();
        let value = value
            .or(current.as_ref().map(|m| m.value))
            .unwrap_or(MIN_MANUAL_LEVEL);
        let enabled = enabled.or(current.as_ref().map(|m| m.enabled)).unwrap_or(false);

        let manual = ManualLevelOverride::new(clamp_manual_level(value), enabled);
        cache.manual_level = Some(manual.clone());
        if manual.enabled {
            cache.updated_at = Some(cache.updated_at.map_or(manual.updated_at, |at| at.max(manual.updated_at)));
        }
        let event = cache.event(profile_id, SignalKind::Level, Some(EventMeta::Manual));
        (manual, event)
    }

    /// Restore a persisted override without publishing
    pub fn restore_manual_level(&self, profile_id: &str, manual: Option<ManualLevelOverride>) {
        let mut profiles = self.profiles.lock();
        let cache = profiles.entry(profile_id.to_string()).or_default();
        cache.manual_level = manual.map(|mut m| {
            m.value = clamp_manual_level(m.value);
            m
        });
    }

    pub fn manual_level(&self, profile_id: &str) -> Option<ManualLevelOverride> {
        self.profiles
            .lock()
            .get(profile_id)
            .and_then(|c| c.manual_level.clone())
    }

    /// Store a user-entered experience percentage. Bypasses the guard but
    /// still runs level-up detection. Non-finite input is refused.
    pub fn set_manual_percent(&self, profile_id: &str, percent: f64) -> Option<TelemetryEvent> {
        if !percent.is_finite() {
            return None;
        }
        let value = SignalValue::Percent(percent.clamp(0.0, 100.0));
        let now = Instant::now();
        let mut profiles = self.profiles.lock();
        let cache = profiles.entry(profile_id.to_string()).or_default();
        let prev = cache.value(SignalKind::Exp).cloned();

        self.guard
            .observe(SignalKind::Exp, prev.as_ref(), &value, &mut cache.level_state, now);
        cache.set(SignalKind::Exp, Some(value), now);
        Some(cache.event(profile_id, SignalKind::Exp, Some(EventMeta::Manual)))
    }

    /// Remember the element detected next to the enemy name
    pub fn record_element(&self, profile_id: &str, element: Option<Element>) {
        if let Some(element) = element {
            let mut profiles = self.profiles.lock();
            profiles.entry(profile_id.to_string()).or_default().element = Some(element);
        }
    }

    pub fn get(&self, profile_id: &str, kind: SignalKind) -> Option<SignalValue> {
        self.profiles
            .lock()
            .get(profile_id)
            .and_then(|c| c.value(kind).cloned())
    }

    pub fn snapshot(&self, profile_id: &str) -> Option<TelemetrySnapshot> {
        self.profiles.lock().get(profile_id).map(ProfileCache::snapshot)
    }

    pub fn level_state(&self, profile_id: &str) -> Option<LevelUpState> {
        self.profiles.lock().get(profile_id).map(|c| c.level_state.clone())
    }

    /// Forget everything cached for a profile
    pub fn remove_profile(&self, profile_id: &str) -> bool {
        self.profiles.lock().remove(profile_id).is_some()
    }
}
