use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of telemetry read from the HUD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    Level,
    Exp,
    RemainingExp,
    CharacterName,
    EnemyName,
    EnemyHp,
    FreeText,
}

/// Preprocessing/recognition plan family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Percent,
    Level,
    Hp,
    Name,
    EnemyName,
    FreeText,
}

/// Static per-kind configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalProfile {
    pub strategy: Strategy,
    pub whitelist: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub default_interval_ms: u64,
}

const PERCENT_WHITELIST: &str = "0123456789.,%";
const DIGIT_WHITELIST: &str = "0123456789";
const HP_WHITELIST: &str = "0123456789/";
const NAME_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789 ";
const ENEMY_NAME_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz -";

impl SignalKind {
    pub const ALL: [SignalKind; 7] = [
        SignalKind::Level,
        SignalKind::Exp,
        SignalKind::RemainingExp,
        SignalKind::CharacterName,
        SignalKind::EnemyName,
        SignalKind::EnemyHp,
        SignalKind::FreeText,
    ];

    /// Lookup table mapping each kind to its strategy, whitelist and unit
    pub const fn profile(self) -> SignalProfile {
        match self {
            SignalKind::Level => SignalProfile {
                strategy: Strategy::Level,
                whitelist: Some(DIGIT_WHITELIST),
                unit: None,
                default_interval_ms: 200,
            },
            SignalKind::Exp => SignalProfile {
                strategy: Strategy::Percent,
                whitelist: Some(PERCENT_WHITELIST),
                unit: Some("%"),
                default_interval_ms: 200,
            },
            SignalKind::RemainingExp => SignalProfile {
                strategy: Strategy::Percent,
                whitelist: Some(PERCENT_WHITELIST),
                unit: Some("%"),
                default_interval_ms: 250,
            },
            SignalKind::CharacterName => SignalProfile {
                strategy: Strategy::Name,
                whitelist: Some(NAME_WHITELIST),
                unit: None,
                default_interval_ms: 300,
            },
            SignalKind::EnemyName => SignalProfile {
                strategy: Strategy::EnemyName,
                whitelist: Some(ENEMY_NAME_WHITELIST),
                unit: None,
                default_interval_ms: 300,
            },
            SignalKind::EnemyHp => SignalProfile {
                strategy: Strategy::Hp,
                whitelist: Some(HP_WHITELIST),
                unit: None,
                default_interval_ms: 200,
            },
            SignalKind::FreeText => SignalProfile {
                strategy: Strategy::FreeText,
                whitelist: None,
                unit: None,
                default_interval_ms: 400,
            },
        }
    }

    /// Percentage bars get the drop/rise plausibility guard
    pub fn is_percent_like(self) -> bool {
        self.profile().strategy == Strategy::Percent
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Level => "level",
            SignalKind::Exp => "exp",
            SignalKind::RemainingExp => "remainingExp",
            SignalKind::CharacterName => "characterName",
            SignalKind::EnemyName => "enemyName",
            SignalKind::EnemyHp => "enemyHp",
            SignalKind::FreeText => "freeText",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown signal kind: {}", s))
    }
}

/// Typed value produced by a parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SignalValue {
    Percent(f64),
    Level(u32),
    Hp { current: u64, max: u64 },
    Text(String),
}

impl SignalValue {
    pub fn as_percent(&self) -> Option<f64> {
        match self {
            SignalValue::Percent(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_level(&self) -> Option<u32> {
        match self {
            SignalValue::Level(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SignalValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Percent(v) => write!(f, "{:.4}%", v),
            SignalValue::Level(v) => write!(f, "{}", v),
            SignalValue::Hp { current, max } => write!(f, "{}/{}", current, max),
            SignalValue::Text(s) => f.write_str(s),
        }
    }
}
