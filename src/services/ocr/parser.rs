use regex::Regex;
use std::sync::OnceLock;

/// Decimal number with `.` or `,` as separator
fn float_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("static pattern compiles"))
}

/// A clean four-decimal percent rendering, e.g. `12.3456%`
fn canonical_percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,3}\.\d{4}%?$").expect("static pattern compiles"))
}

fn hp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d[\d.,]*)\s*[/|]\s*(\d[\d.,]*)").expect("static pattern compiles"))
}

/// Swap a misread first decimal digit at `right` given the last integer
/// digit at `left`.
///
/// `7` followed by `1` becomes `77`; a 5/9 pair becomes the repeated first digit.
fn fix_pair(chars: &mut [char], left: usize, right: usize) {
    if left >= right || right >= chars.len() {
        return;
    }
    let (before, after) = (chars[left], chars[right]);
    if before == '7' && after == '1' {
        chars[right] = '7';
    } else if matches!(before, '5' | '9') && matches!(after, '5' | '9') && before != after {
        chars[right] = before;
    }
}

/// Fix common recognition confusions around the decimal point of a
/// percentage. Without a decimal point, a 5-7 digit string is assumed to
/// carry four implied decimals and the boundary is derived from its length.
pub fn fix_ocr_confusions(text: &str) -> String {
    if text.chars().count() < 5 {
        return text.to_string();
    }

    let normalized: String = text.replace(',', ".").replace(' ', "");
    let mut chars: Vec<char> = normalized.chars().collect();

    if let Some(dot) = chars.iter().position(|&c| c == '.') {
        if dot > 0 && dot + 1 < chars.len() {
            fix_pair(&mut chars, dot - 1, dot + 1);
            return chars.into_iter().collect();
        }
    }

    let mut digits: Vec<char> = chars.iter().copied().filter(|c| c.is_ascii_digit()).collect();
    if (5..=7).contains(&digits.len()) {
        let boundary = digits.len() - 5;
        fix_pair(&mut digits, boundary, boundary + 1);
        return digits.into_iter().collect();
    }

    chars.into_iter().collect()
}

/// All decimal tokens in `text` with their source text, `,` read as the
/// decimal separator
pub fn float_tokens(text: &str) -> Vec<(f64, &str)> {
    float_re()
        .find_iter(text)
        .filter_map(|m| {
            let value = m.as_str().replace(',', ".").parse::<f64>().ok()?;
            Some((value, m.as_str()))
        })
        .collect()
}

/// Parse an experience percentage. Returns the most frequent plausible
/// value in [0,100], or `None` when no token qualifies.
pub fn parse_percent(text: &str) -> Option<f64> {
    let compact: String = text
        .trim()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r' && *c != ' ')
        .map(|c| if c == 'O' || c == 'o' { '0' } else { c })
        .collect();
    if compact.is_empty() {
        return None;
    }

    let fixed = if canonical_percent_re().is_match(&compact) {
        compact
    } else {
        fix_ocr_confusions(&compact)
    };
    let cleaned = fixed.replace(',', ".").replace('%', "");

    let mut values: Vec<f64> = Vec::new();
    for token in float_re().find_iter(&cleaned) {
        let tok = token.as_str();
        // dropped decimal point: four implied decimals
        if !tok.contains('.') && (5..=7).contains(&tok.len()) {
            if let Ok(raw) = tok.parse::<u64>() {
                let v = raw as f64 / 10000.0;
                if (0.0..=100.0).contains(&v) {
                    values.push(v);
                }
            }
            continue;
        }
        if let Ok(v) = tok.parse::<f64>() {
            if v.is_finite() && (0.0..=100.0).contains(&v) {
                values.push(v);
            }
        }
    }

    most_frequent(&values)
}

/// Most common value; the earliest one wins ties
fn most_frequent(values: &[f64]) -> Option<f64> {
    let mut counts: Vec<(f64, usize)> = Vec::new();
    for &v in values {
        match counts.iter_mut().find(|(seen, _)| *seen == v) {
            Some((_, count)) => *count += 1,
            None => counts.push((v, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(f64, usize)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
        .map(|(v, _)| v)
}

/// Canonical rendering with four decimals
pub fn format_percent(value: f64) -> String {
    format!("{:.4}%", value)
}

/// Parse a character level from digits only
pub fn parse_level(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let level: u64 = digits.parse().ok()?;
    if validate_level(level) {
        Some(level as u32)
    } else {
        None
    }
}

/// Parse `current/max` health; `|` is accepted as a misread slash
pub fn parse_hp(text: &str) -> Option<(u64, u64)> {
    let caps = hp_re().captures(text)?;
    let number = |i: usize| -> Option<u64> {
        let digits: String = caps.get(i)?.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    };
    Some((number(1)?, number(2)?))
}

pub fn parse_character_name(text: &str) -> Option<String> {
    let name = text.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Letters, spaces and hyphens; falls back to the trimmed raw text
pub fn parse_enemy_name(text: &str) -> Option<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == ' ' || *c == '-')
        .collect();
    let cleaned = cleaned.trim();
    if !cleaned.is_empty() {
        return Some(cleaned.to_string());
    }
    parse_character_name(text)
}

pub fn parse_free_text(text: &str) -> Option<String> {
    parse_character_name(text)
}

/// Validate level is within the readable range (1-999)
pub fn validate_level(level: u64) -> bool {
    (1..=999).contains(&level)
}

/// Validate percentage is in valid range (0.0-100.0)
pub fn validate_percent(percent: f64) -> bool {
    (0.0..=100.0).contains(&percent)
}
