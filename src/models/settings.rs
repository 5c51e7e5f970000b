use crate::models::config::SchedulerConfig;
use crate::models::roi::NormalizedRoi;
use crate::models::signal::SignalKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_MANUAL_LEVEL: u32 = 1;
pub const MAX_MANUAL_LEVEL: u32 = 300;

/// Polling interval per signal kind in milliseconds (0 = disabled)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerSettings {
    pub level: u64,
    pub exp: u64,
    pub remaining_exp: u64,
    pub character_name: u64,
    pub enemy_name: u64,
    pub enemy_hp: u64,
    pub free_text: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            level: SignalKind::Level.profile().default_interval_ms,
            exp: SignalKind::Exp.profile().default_interval_ms,
            remaining_exp: SignalKind::RemainingExp.profile().default_interval_ms,
            character_name: SignalKind::CharacterName.profile().default_interval_ms,
            enemy_name: SignalKind::EnemyName.profile().default_interval_ms,
            enemy_hp: SignalKind::EnemyHp.profile().default_interval_ms,
            free_text: SignalKind::FreeText.profile().default_interval_ms,
        }
    }
}

impl TimerSettings {
    /// All intervals zero
    pub fn disabled() -> Self {
        Self {
            level: 0,
            exp: 0,
            remaining_exp: 0,
            character_name: 0,
            enemy_name: 0,
            enemy_hp: 0,
            free_text: 0,
        }
    }

    pub fn get(&self, kind: SignalKind) -> u64 {
        match kind {
            SignalKind::Level => self.level,
            SignalKind::Exp => self.exp,
            SignalKind::RemainingExp => self.remaining_exp,
            SignalKind::CharacterName => self.character_name,
            SignalKind::EnemyName => self.enemy_name,
            SignalKind::EnemyHp => self.enemy_hp,
            SignalKind::FreeText => self.free_text,
        }
    }

    fn slot_mut(&mut self, kind: SignalKind) -> &mut u64 {
        match kind {
            SignalKind::Level => &mut self.level,
            SignalKind::Exp => &mut self.exp,
            SignalKind::RemainingExp => &mut self.remaining_exp,
            SignalKind::CharacterName => &mut self.character_name,
            SignalKind::EnemyName => &mut self.enemy_name,
            SignalKind::EnemyHp => &mut self.enemy_hp,
            SignalKind::FreeText => &mut self.free_text,
        }
    }

    /// Store a sanitized interval and return the stored value
    pub fn set(&mut self, kind: SignalKind, interval_ms: u64, limits: &SchedulerConfig) -> u64 {
        let sanitized = limits.sanitize_interval(interval_ms);
        *self.slot_mut(kind) = sanitized;
        sanitized
    }

    /// Copy with every interval sanitized
    pub fn sanitized(&self, limits: &SchedulerConfig) -> Self {
        let mut out = self.clone();
        for kind in SignalKind::ALL {
            out.set(kind, self.get(kind), limits);
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (SignalKind, u64)> + '_ {
        SignalKind::ALL.into_iter().map(move |k| (k, self.get(k)))
    }

    pub fn any_active(&self) -> bool {
        self.iter().any(|(_, ms)| ms > 0)
    }
}

/// Manual level override, supersedes the recognized level when enabled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManualLevelOverride {
    pub value: u32,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl ManualLevelOverride {
    pub fn new(value: u32, enabled: bool) -> Self {
        Self {
            value: clamp_manual_level(value),
            enabled,
            updated_at: Utc::now(),
        }
    }

    /// Enabled override value, if any
    pub fn active_value(&self) -> Option<u32> {
        self.enabled.then_some(self.value)
    }
}

pub fn clamp_manual_level(value: u32) -> u32 {
    value.clamp(MIN_MANUAL_LEVEL, MAX_MANUAL_LEVEL)
}

/// Everything the persistence layer stores for one profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileSettings {
    pub timers: TimerSettings,
    pub rois: BTreeMap<SignalKind, NormalizedRoi>,
    pub manual_level: Option<ManualLevelOverride>,
}
