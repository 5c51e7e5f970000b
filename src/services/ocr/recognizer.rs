//! Multi-variant line recognition.
//!
//! Every signal kind maps to an ordered plan of candidate images. Candidates
//! are rendered lazily, sent to the engine one by one, and the first read that
//! parses into a valid value wins. Percentage reads are additionally checked
//! against the fill ratio measured directly from the bar.

use super::debug::DebugSink;
use super::engine::{LineOptions, OcrEngine};
use super::parser;
use super::pixel_ops;
use super::preprocessing::{MaskStyle, PreprocessingService};
use crate::error::{PixelError, Result};
use crate::models::config::{EngineConfig, FiveNineBias, RecognitionConfig};
use crate::models::ocr_result::RecognitionResult;
use crate::models::raw_image::RawImage;
use crate::models::signal::{SignalKind, SignalValue, Strategy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Which part of the capture a variant is rendered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Full,
    /// Right-hand text area of a percentage bar
    TextSlice,
}

/// Intermediate image a variant starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base {
    Mask(MaskStyle),
    /// Mask thickened with a 2x2 dilation
    DilatedMask(MaskStyle),
    /// Grayscale, resized
    Gray,
    /// Single BGR channel, resized
    Channel(usize),
    /// Grayscale, resized and min-max normalized
    PrepGray,
}

/// Final treatment applied to the base image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Treatment {
    Plain,
    Bold,
    Opened,
    Inverted,
    Otsu,
    OtsuInverted,
    ClaheOtsu,
    ClaheOtsuInverted,
    Binary(u8),
}

/// One candidate image in a recognition plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantSpec {
    pub region: Region,
    pub base: Base,
    pub scale: f64,
    pub treatment: Treatment,
    /// Reconcile percentage reads with the measured fill ratio
    pub snap_to_fill: bool,
}

impl VariantSpec {
    fn new(region: Region, base: Base, scale: f64, treatment: Treatment) -> Self {
        Self {
            region,
            base,
            scale,
            treatment,
            snap_to_fill: false,
        }
    }

    fn snapped(mut self) -> Self {
        self.snap_to_fill = true;
        self
    }

    fn tag(&self) -> String {
        let region = match self.region {
            Region::Full => "full",
            Region::TextSlice => "txt",
        };
        let base = match self.base {
            Base::Mask(style) => style.tag().to_string(),
            Base::DilatedMask(style) => format!("{}-dil", style.tag()),
            Base::Gray => "gray".to_string(),
            Base::Channel(ch) => format!("ch{}", ch),
            Base::PrepGray => "prep".to_string(),
        };
        let treatment = match self.treatment {
            Treatment::Plain => "plain".to_string(),
            Treatment::Bold => "bold".to_string(),
            Treatment::Opened => "open".to_string(),
            Treatment::Inverted => "inv".to_string(),
            Treatment::Otsu => "otsu".to_string(),
            Treatment::OtsuInverted => "otsu-inv".to_string(),
            Treatment::ClaheOtsu => "clahe".to_string(),
            Treatment::ClaheOtsuInverted => "clahe-inv".to_string(),
            Treatment::Binary(t) => format!("bin{}", t),
        };
        format!("{}_{}_{}_{}", region, base, self.scale, treatment)
    }
}

/// A plan step: a single candidate, or a group of reads reconciled with the
/// 5/9 bias before acceptance.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    Single(VariantSpec),
    Consensus(Vec<VariantSpec>),
}

const MASK_SCALES: [f64; 2] = [5.0, 7.0];
const LEVEL_SCALES: [f64; 2] = [4.0, 6.0];

fn gray_fallback(region: Region, steps: &mut Vec<PlanStep>) {
    for scale in MASK_SCALES {
        for treatment in [
            Treatment::Otsu,
            Treatment::OtsuInverted,
            Treatment::ClaheOtsu,
            Treatment::ClaheOtsuInverted,
        ] {
            steps.push(PlanStep::Single(VariantSpec::new(region, Base::Gray, scale, treatment)));
        }
    }
}

fn percent_plan(consensus: bool) -> Vec<PlanStep> {
    let mut steps = Vec::new();
    let single = |spec: VariantSpec| PlanStep::Single(spec.snapped());

    // text slice: white first, then wide gold, then gray
    for scale in MASK_SCALES {
        for treatment in [Treatment::Plain, Treatment::Inverted] {
            steps.push(single(VariantSpec::new(
                Region::TextSlice,
                Base::DilatedMask(MaskStyle::White),
                scale,
                treatment,
            )));
        }
    }
    for scale in MASK_SCALES {
        for treatment in [Treatment::Plain, Treatment::Bold, Treatment::Inverted] {
            steps.push(single(VariantSpec::new(
                Region::TextSlice,
                Base::Mask(MaskStyle::GoldWide),
                scale,
                treatment,
            )));
        }
    }
    gray_fallback(Region::TextSlice, &mut steps);

    // full region: gold, white, gray
    for scale in MASK_SCALES {
        let gold = |treatment| VariantSpec::new(Region::Full, Base::Mask(MaskStyle::Gold), scale, treatment).snapped();
        if consensus {
            steps.push(PlanStep::Consensus(vec![
                gold(Treatment::Plain),
                gold(Treatment::Bold),
                gold(Treatment::Opened),
            ]));
        } else {
            steps.push(PlanStep::Single(gold(Treatment::Plain)));
            steps.push(PlanStep::Single(gold(Treatment::Bold)));
        }
        steps.push(PlanStep::Single(gold(Treatment::Inverted)));
    }
    for scale in MASK_SCALES {
        for treatment in [Treatment::Plain, Treatment::Inverted] {
            steps.push(single(VariantSpec::new(
                Region::Full,
                Base::Mask(MaskStyle::White),
                scale,
                treatment,
            )));
        }
    }
    gray_fallback(Region::Full, &mut steps);
    steps
}

fn level_plan() -> Vec<PlanStep> {
    let mut steps = Vec::new();
    for style in [MaskStyle::Bright, MaskStyle::White] {
        for scale in LEVEL_SCALES {
            for treatment in [Treatment::Plain, Treatment::Inverted] {
                steps.push(PlanStep::Single(VariantSpec::new(
                    Region::Full,
                    Base::Mask(style),
                    scale,
                    treatment,
                )));
            }
        }
    }
    for scale in LEVEL_SCALES {
        for treatment in [Treatment::Otsu, Treatment::OtsuInverted, Treatment::Binary(180)] {
            steps.push(PlanStep::Single(VariantSpec::new(Region::Full, Base::Gray, scale, treatment)));
        }
    }
    steps
}

fn hp_plan() -> Vec<PlanStep> {
    let mut steps = Vec::new();
    for base in [Base::DilatedMask(MaskStyle::White), Base::Mask(MaskStyle::Bright)] {
        for scale in MASK_SCALES {
            for treatment in [Treatment::Plain, Treatment::Inverted] {
                steps.push(PlanStep::Single(VariantSpec::new(Region::Full, base, scale, treatment)));
            }
        }
    }
    let channels = (0..3).map(Base::Channel);
    for base in channels.chain(std::iter::once(Base::Gray)) {
        for scale in MASK_SCALES {
            for treatment in [Treatment::Otsu, Treatment::OtsuInverted] {
                steps.push(PlanStep::Single(VariantSpec::new(Region::Full, base, scale, treatment)));
            }
        }
    }
    steps
}

fn gray_text_plan(scale: f64, with_plain: bool) -> Vec<PlanStep> {
    let mut treatments = vec![Treatment::Otsu, Treatment::OtsuInverted];
    if with_plain {
        treatments.push(Treatment::Plain);
    }
    treatments
        .into_iter()
        .map(|t| PlanStep::Single(VariantSpec::new(Region::Full, Base::PrepGray, scale, t)))
        .collect()
}

/// Ordered candidate plan for a signal kind
pub fn plan_for(kind: SignalKind, consensus: bool) -> Vec<PlanStep> {
    match kind.profile().strategy {
        Strategy::Percent => percent_plan(consensus),
        Strategy::Level => level_plan(),
        Strategy::Hp => hp_plan(),
        Strategy::Name => gray_text_plan(4.0, false),
        Strategy::EnemyName => gray_text_plan(4.0, true),
        Strategy::FreeText => gray_text_plan(3.0, false),
    }
}

// ---------------------------------------------------------------------------
// Percentage correction heuristics
// ---------------------------------------------------------------------------

fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii_digit()).count()
}

/// Replace the first occurrence of `from` with `to`
fn swap_first(raw: &str, from: char, to: char) -> Option<String> {
    let idx = raw.find(from)?;
    let mut out = String::with_capacity(raw.len());
    out.push_str(&raw[..idx]);
    out.push(to);
    out.push_str(&raw[idx + from.len_utf8()..]);
    Some(out)
}

/// Which of two reads a 5/9 tie-break selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    First,
    Second,
}

/// Resolve two reads whose digit strings have the same length and differ in
/// exactly one position, where that position is a 5 in one read and a 9 in
/// the other. Returns `None` when the reads do not form such a pair or the
/// bias is neutral.
pub fn prefer_by_bias(a: &str, b: &str, bias: FiveNineBias) -> Option<Pick> {
    let da: Vec<char> = a.chars().filter(|c| c.is_ascii_digit()).collect();
    let db: Vec<char> = b.chars().filter(|c| c.is_ascii_digit()).collect();
    if da.is_empty() || da.len() != db.len() {
        return None;
    }
    let diffs: Vec<(char, char)> = da
        .iter()
        .zip(db.iter())
        .filter(|(x, y)| x != y)
        .map(|(&x, &y)| (x, y))
        .collect();
    let [(x, y)] = diffs.as_slice() else {
        return None;
    };
    let is_pair = matches!((*x, *y), ('5', '9') | ('9', '5'));
    if !is_pair {
        return None;
    }
    let preferred = match bias {
        FiveNineBias::PreferFive => '5',
        FiveNineBias::PreferNine => '9',
        FiveNineBias::Neutral => return None,
    };
    if *x == preferred {
        Some(Pick::First)
    } else {
        Some(Pick::Second)
    }
}

/// Reconcile a group of accepted reads with the 5/9 bias. The first read
/// is kept unless a later one is the preferred side of a 5/9 pair.
pub fn resolve_consensus(reads: &[(f64, String)], bias: FiveNineBias) -> Option<(f64, String)> {
    let mut iter = reads.iter();
    let mut chosen = iter.next()?.clone();
    for candidate in iter {
        if prefer_by_bias(&chosen.1, &candidate.1, bias) == Some(Pick::Second) {
            chosen = candidate.clone();
        }
    }
    Some(chosen)
}

/// Swap the first non-preferred digit of a 5/9 pair toward the preferred one
/// when that moves the read at least half a point closer to the fill target.
pub fn bias_swap(value: f64, raw: &str, fill: Option<f64>, bias: FiveNineBias) -> (f64, String) {
    let (from, to) = match bias {
        FiveNineBias::PreferFive => ('9', '5'),
        FiveNineBias::PreferNine => ('5', '9'),
        FiveNineBias::Neutral => return (value, raw.to_string()),
    };
    let Some(fill) = fill else {
        return (value, raw.to_string());
    };
    let target = fill * 100.0;
    if (value - target).abs() < 0.5 {
        return (value, raw.to_string());
    }
    let Some(alt_raw) = swap_first(raw, from, to) else {
        return (value, raw.to_string());
    };
    match parser::parse_percent(&alt_raw) {
        Some(alt) if (value - target).abs() - (alt - target).abs() >= 0.5 => (alt, alt_raw),
        _ => (value, raw.to_string()),
    }
}

/// Validate one percentage read: at least four digits, compaction of stray
/// spaces, then the 5/9 bias against the fill ratio.
pub fn read_percent(raw: &str, fill: Option<f64>, bias: FiveNineBias) -> Option<(f64, String)> {
    let mut raw = raw.to_string();
    let mut value = parser::parse_percent(&raw);
    if digit_count(&raw) < 4 {
        return None;
    }

    if value.map_or(true, |v| v < 0.1) && raw.contains(' ') {
        let compact = raw.replace(' ', "");
        let mut candidates = vec![compact.clone()];
        if compact.len() >= 6 && compact.chars().all(|c| c.is_ascii_digit()) {
            candidates.push(format!("{}.{}", &compact[..2], &compact[2..]));
        }
        for candidate in candidates {
            if let Some(v) = parser::parse_percent(&candidate) {
                value = Some(v);
                raw = candidate;
                break;
            }
        }
    }

    let value = value?;
    Some(bias_swap(value, &raw, fill, bias))
}

/// Reconcile a percentage read with the measured fill ratio
pub fn snap_to_fill(value: f64, raw: &str, fill: Option<f64>) -> (f64, String) {
    let Some(fill) = fill else {
        let value = if value < 0.001 { 0.0 } else { value };
        return (value, raw.to_string());
    };
    if digit_count(raw) < 3 {
        return (value, raw.to_string());
    }
    let target = fill * 100.0;
    let mut value = value;
    let mut raw = raw.to_string();

    // token closest to the fill, earlier tokens win ties; its text replaces
    // the raw read so later fixes still see the original digits
    let closest = parser::float_tokens(&raw)
        .into_iter()
        .filter(|(v, _)| parser::validate_percent(*v))
        .fold(None, |best: Option<(f64, &str)>, cur| match best {
            Some(b) if (b.0 - target).abs() <= (cur.0 - target).abs() => Some(b),
            _ => Some(cur),
        })
        .map(|(v, text)| (v, text.to_string()));
    if let Some((c, text)) = closest {
        if (c - target).abs() + 0.25 < (value - target).abs() {
            value = c;
            raw = text;
        }
    }

    if well_formed_percent(raw.trim()) && (value - target).abs() <= 5.0 {
        return (value, raw);
    }

    if (5.0..=99.5).contains(&target) && (value - target).abs() > 12.0 {
        return (round4(target), raw);
    }

    for (from, to) in [('6', '8'), ('9', '8')] {
        if let Some(alt_raw) = swap_first(&raw, from, to) {
            if let Some(alt) = parser::parse_percent(&alt_raw) {
                if (alt - target).abs() + 0.25 < (value - target).abs() {
                    value = alt;
                    raw = alt_raw;
                }
            }
        }
    }

    if target >= 25.0 && value + 8.0 < target {
        return (round4(target), raw);
    }
    if target <= 0.02 && value < 0.05 {
        return (0.0, raw);
    }
    (value, raw)
}

/// `d.dddd` style percentage with 1-3 integer digits and 1-6 decimals
fn well_formed_percent(s: &str) -> bool {
    let s = s.strip_suffix('%').unwrap_or(s);
    let Some((int, frac)) = s.split_once('.') else {
        return false;
    };
    (1..=3).contains(&int.len())
        && (1..=6).contains(&frac.len())
        && int.chars().all(|c| c.is_ascii_digit())
        && frac.chars().all(|c| c.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Recognizer
// ---------------------------------------------------------------------------

/// Rendered images shared by the variants of one request
struct RenderCache<'a> {
    full: &'a RawImage,
    text_slice: Option<RawImage>,
    bases: Vec<(Region, Base, u64, RawImage)>,
}

/// Outcome of reading one candidate
enum Read {
    Accepted(String, SignalValue),
    Percent(f64, String),
    Rejected,
}

/// Drives the engine over the candidate plan of a signal kind
pub struct Recognizer {
    engine: Arc<dyn OcrEngine>,
    preprocessing: Arc<PreprocessingService>,
    config: RecognitionConfig,
    engine_config: EngineConfig,
    debug: DebugSink,
    next_request: AtomicU64,
}

impl Recognizer {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        preprocessing: Arc<PreprocessingService>,
        config: RecognitionConfig,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            preprocessing,
            config,
            engine_config,
            debug: DebugSink::disabled(),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn with_debug(mut self, debug: DebugSink) -> Self {
        self.debug = debug;
        self
    }

    pub fn engine(&self) -> &Arc<dyn OcrEngine> {
        &self.engine
    }

    fn line_options(&self, kind: SignalKind) -> LineOptions {
        LineOptions {
            whitelist: None,
            psm: self.engine_config.psm,
            oem: self.engine_config.oem,
            timeout: Duration::from_millis(self.config.candidate_timeout_ms),
        }
        .with_whitelist(kind.profile().whitelist)
    }

    /// Decode a PNG capture and recognize it
    pub async fn recognize_png(&self, kind: SignalKind, png: &[u8]) -> Result<RecognitionResult> {
        let bgr = self.preprocessing.decode_png(png)?;
        self.recognize(kind, &bgr).await
    }

    /// Run the plan for `kind` over a BGR capture.
    ///
    /// Engine failures abort the plan and come back as a result with `error`
    /// set. Only structural faults are returned as `Err`.
    pub async fn recognize(&self, kind: SignalKind, bgr: &RawImage) -> Result<RecognitionResult> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let unit = kind.profile().unit;
        if bgr.is_empty() {
            return Ok(RecognitionResult::unreadable(request_id, None, unit));
        }

        let started = Instant::now();
        let mut source = bgr.clone();
        if kind.profile().strategy == Strategy::Level && (source.height() < 20 || source.width() < 20) {
            let factor = (40.0 / source.height().max(1) as f64).max(4.0);
            source = self.preprocessing.resize(&source, factor)?;
        }

        let fill = if kind.is_percent_like() {
            self.preprocessing.estimate_fill_ratio(&source)?
        } else {
            None
        };

        let mut cache = RenderCache {
            full: &source,
            text_slice: None,
            bases: Vec::new(),
        };
        let options = self.line_options(kind);
        let mut fallback_raw: Option<String> = None;

        let outcome = self
            .run_plan(kind, &mut cache, &options, fill, &mut fallback_raw)
            .await;

        let elapsed = started.elapsed();
        if elapsed.as_millis() as u64 > self.config.slow_read_warn_ms {
            warn!("Slow {} read: {}ms", kind, elapsed.as_millis());
        }

        let result = match outcome {
            Ok(Some((raw, value))) => {
                debug!("{} read {:?} -> {}", kind, raw, value);
                RecognitionResult::success(request_id, raw, value, unit)
            }
            Ok(None) => RecognitionResult::unreadable(request_id, fallback_raw, unit),
            Err(PlanError::Engine(err)) => {
                debug!("{} read aborted: {}", kind, err);
                RecognitionResult::engine_failure(request_id, err.to_string())
            }
            Err(PlanError::Fatal(err)) => return Err(err),
        };
        Ok(result)
    }

    async fn run_plan(
        &self,
        kind: SignalKind,
        cache: &mut RenderCache<'_>,
        options: &LineOptions,
        fill: Option<f64>,
        fallback_raw: &mut Option<String>,
    ) -> std::result::Result<Option<(String, SignalValue)>, PlanError> {
        let strategy = kind.profile().strategy;
        let bias = self.config.five_nine_bias;

        for step in plan_for(kind, self.config.consensus_reads) {
            match step {
                PlanStep::Single(spec) => {
                    match self.read_variant(kind, &spec, cache, options, fill, fallback_raw).await? {
                        Read::Accepted(raw, value) => return Ok(Some((raw, value))),
                        Read::Percent(value, raw) => {
                            let (value, raw) = if spec.snap_to_fill {
                                snap_to_fill(value, &raw, fill)
                            } else {
                                (value, raw)
                            };
                            return Ok(Some((raw, SignalValue::Percent(round4(value)))));
                        }
                        Read::Rejected => {}
                    }
                }
                PlanStep::Consensus(specs) => {
                    let mut reads = Vec::new();
                    let snap = specs.iter().any(|s| s.snap_to_fill);
                    for spec in &specs {
                        if let Read::Percent(value, raw) =
                            self.read_variant(kind, spec, cache, options, fill, fallback_raw).await?
                        {
                            reads.push((value, raw));
                        }
                    }
                    if let Some((value, raw)) = resolve_consensus(&reads, bias) {
                        let (value, raw) = if snap {
                            snap_to_fill(value, &raw, fill)
                        } else {
                            (value, raw)
                        };
                        return Ok(Some((raw, SignalValue::Percent(round4(value)))));
                    }
                }
            }
        }

        debug!("{} plan exhausted ({:?})", kind, strategy);
        Ok(None)
    }

    async fn read_variant(
        &self,
        kind: SignalKind,
        spec: &VariantSpec,
        cache: &mut RenderCache<'_>,
        options: &LineOptions,
        fill: Option<f64>,
        fallback_raw: &mut Option<String>,
    ) -> std::result::Result<Read, PlanError> {
        let image = self.render(spec, cache).map_err(|e| PlanError::Fatal(e.into()))?;
        let png = self.preprocessing.encode_png(&image).map_err(PlanError::Fatal)?;
        self.debug.save(&format!("{}_{}", kind, spec.tag()), &png);

        let raw = self
            .engine
            .recognize_line(&png, options)
            .await
            .map_err(PlanError::Engine)?;
        if raw.is_empty() {
            return Ok(Read::Rejected);
        }
        if fallback_raw.is_none() {
            *fallback_raw = Some(raw.clone());
        }

        let read = match kind.profile().strategy {
            Strategy::Percent => match read_percent(&raw, fill, self.config.five_nine_bias) {
                Some((value, raw)) => Read::Percent(value, raw),
                None => Read::Rejected,
            },
            Strategy::Level => accept(raw.clone(), parser::parse_level(&raw).map(SignalValue::Level)),
            Strategy::Hp => {
                let parsed = raw
                    .contains('/')
                    .then(|| parser::parse_hp(&raw))
                    .flatten()
                    .map(|(current, max)| SignalValue::Hp { current, max });
                accept(raw.clone(), parsed)
            }
            Strategy::Name => accept(raw.clone(), parser::parse_character_name(&raw).map(SignalValue::Text)),
            Strategy::EnemyName => accept(raw.clone(), parser::parse_enemy_name(&raw).map(SignalValue::Text)),
            Strategy::FreeText => accept(raw.clone(), parser::parse_free_text(&raw).map(SignalValue::Text)),
        };
        Ok(read)
    }

    fn render(&self, spec: &VariantSpec, cache: &mut RenderCache<'_>) -> std::result::Result<RawImage, PixelError> {
        let scale_key = spec.scale.to_bits();
        let cached = cache
            .bases
            .iter()
            .find(|(r, b, s, _)| *r == spec.region && *b == spec.base && *s == scale_key)
            .map(|(_, _, _, img)| img.clone());

        let base = match cached {
            Some(img) => img,
            None => {
                let source = match spec.region {
                    Region::Full => cache.full.clone(),
                    Region::TextSlice => match &cache.text_slice {
                        Some(slice) => slice.clone(),
                        None => {
                            let slice = text_slice(cache.full)?;
                            cache.text_slice = Some(slice.clone());
                            slice
                        }
                    },
                };
                let img = self.render_base(&source, spec.base, spec.scale)?;
                cache.bases.push((spec.region, spec.base, scale_key, img.clone()));
                img
            }
        };

        apply_treatment(&base, spec.treatment)
    }

    fn render_base(&self, src: &RawImage, base: Base, scale: f64) -> std::result::Result<RawImage, PixelError> {
        let prep = &self.preprocessing;
        match base {
            Base::Mask(style) => prep.extract_mask(src, style, scale),
            Base::DilatedMask(style) => pixel_ops::dilate(&prep.extract_mask(src, style, scale)?, 2, 2, 1),
            Base::Gray => prep.resize(&prep.to_grayscale(src)?, scale),
            Base::Channel(ch) => prep.resize(&pixel_ops::extract_channel(src, ch)?, scale),
            Base::PrepGray => prep.prep_gray(src, scale),
        }
    }
}

enum PlanError {
    Engine(crate::error::EngineError),
    Fatal(crate::error::TelemetryError),
}

fn accept(raw: String, value: Option<SignalValue>) -> Read {
    match value {
        Some(value) => Read::Accepted(raw, value),
        None => Read::Rejected,
    }
}

/// Right-hand part of a percentage bar where the number is printed
fn text_slice(bgr: &RawImage) -> std::result::Result<RawImage, PixelError> {
    let (w, h) = (bgr.width(), bgr.height());
    let x = (w as f64 * 0.35).floor() as u32;
    let top = (h as f64 * 0.1).floor() as u32;
    let bottom = (top + 1).max((h as f64 * 0.9).floor() as u32).min(h);
    pixel_ops::crop(bgr, x, top, w - x, bottom - top)
}

fn apply_treatment(img: &RawImage, treatment: Treatment) -> std::result::Result<RawImage, PixelError> {
    match treatment {
        Treatment::Plain => Ok(img.clone()),
        Treatment::Bold => pixel_ops::dilate(img, 2, 2, 1),
        Treatment::Opened => pixel_ops::morph_open(img, 2, 2, 1),
        Treatment::Inverted => pixel_ops::invert(img),
        Treatment::Otsu => Ok(pixel_ops::threshold_otsu(img)?.1),
        Treatment::OtsuInverted => pixel_ops::invert(&pixel_ops::threshold_otsu(img)?.1),
        Treatment::ClaheOtsu => Ok(pixel_ops::threshold_otsu(&pixel_ops::clahe(img, 2.0, 8, 8)?)?.1),
        Treatment::ClaheOtsuInverted => {
            pixel_ops::invert(&pixel_ops::threshold_otsu(&pixel_ops::clahe(img, 2.0, 8, 8)?)?.1)
        }
        Treatment::Binary(t) => pixel_ops::threshold_binary(img, t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::services::ocr::engine::testing::ScriptedEngine;

    /// Helper: recognizer over a scripted engine
    fn recognizer(engine: Arc<ScriptedEngine>, config: RecognitionConfig) -> Recognizer {
        Recognizer::new(
            engine,
            Arc::new(PreprocessingService::default()),
            config,
            EngineConfig::default(),
        )
    }

    /// Helper: experience bar, left half filled blue, dark elsewhere
    fn half_bar() -> RawImage {
        RawImage::bgr_from_fn(400, 20, |x, _| if x < 200 { [200, 100, 30] } else { [25, 25, 25] })
    }

    /// Helper: small text-like capture
    fn text_capture() -> RawImage {
        RawImage::bgr_from_fn(40, 24, |x, y| {
            if (10..30).contains(&x) && (8..16).contains(&y) {
                [240, 240, 240]
            } else {
                [20, 20, 20]
            }
        })
    }

    fn count_reads(steps: &[PlanStep]) -> usize {
        steps
            .iter()
            .map(|s| match s {
                PlanStep::Single(_) => 1,
                PlanStep::Consensus(v) => v.len(),
            })
            .sum()
    }

    // ========== plans ==========

    #[test]
    fn test_plan_sizes() {
        assert_eq!(count_reads(&plan_for(SignalKind::Exp, false)), 36);
        assert_eq!(count_reads(&plan_for(SignalKind::Level, false)), 14);
        assert_eq!(count_reads(&plan_for(SignalKind::EnemyHp, false)), 24);
        assert_eq!(count_reads(&plan_for(SignalKind::CharacterName, false)), 2);
        assert_eq!(count_reads(&plan_for(SignalKind::EnemyName, false)), 3);
        assert_eq!(count_reads(&plan_for(SignalKind::FreeText, false)), 2);
    }

    #[test]
    fn test_percent_plan_starts_with_text_slice_white() {
        let plan = plan_for(SignalKind::RemainingExp, false);
        match &plan[0] {
            PlanStep::Single(spec) => {
                assert_eq!(spec.region, Region::TextSlice);
                assert_eq!(spec.base, Base::DilatedMask(MaskStyle::White));
                assert_eq!(spec.scale, 5.0);
                assert!(spec.snap_to_fill);
            }
            other => panic!("Unexpected first step {:?}", other),
        }
    }

    #[test]
    fn test_gray_fallback_is_not_snapped() {
        let plan = plan_for(SignalKind::Exp, false);
        let gray: Vec<_> = plan
            .iter()
            .filter_map(|s| match s {
                PlanStep::Single(spec) if spec.base == Base::Gray => Some(spec),
                _ => None,
            })
            .collect();
        assert_eq!(gray.len(), 16);
        assert!(gray.iter().all(|s| !s.snap_to_fill));
    }

    #[test]
    fn test_consensus_plan_groups_gold_reads() {
        let plan = plan_for(SignalKind::Exp, true);
        let groups: Vec<_> = plan
            .iter()
            .filter_map(|s| match s {
                PlanStep::Consensus(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(groups.len(), 2, "One group per gold scale");
        assert_eq!(groups[0][2].treatment, Treatment::Opened);
        assert_eq!(count_reads(&plan), 38);
    }

    // ========== heuristics ==========

    #[test]
    fn test_prefer_by_bias() {
        assert_eq!(prefer_by_bias("15.5", "19.5", FiveNineBias::PreferFive), Some(Pick::First));
        assert_eq!(prefer_by_bias("19.5", "15.5", FiveNineBias::PreferFive), Some(Pick::Second));
        assert_eq!(prefer_by_bias("15.5", "19.5", FiveNineBias::PreferNine), Some(Pick::Second));
        assert_eq!(prefer_by_bias("15.5", "19.5", FiveNineBias::Neutral), None);
        // two differences, other digits, different lengths
        assert_eq!(prefer_by_bias("15.5", "19.9", FiveNineBias::PreferFive), None);
        assert_eq!(prefer_by_bias("15.5", "16.5", FiveNineBias::PreferFive), None);
        assert_eq!(prefer_by_bias("15.5", "15.55", FiveNineBias::PreferFive), None);
    }

    #[test]
    fn test_resolve_consensus() {
        let reads = vec![(19.5, "19.5000".to_string()), (15.5, "15.5000".to_string())];
        assert_eq!(
            resolve_consensus(&reads, FiveNineBias::PreferFive),
            Some((15.5, "15.5000".to_string()))
        );
        assert_eq!(
            resolve_consensus(&reads, FiveNineBias::Neutral),
            Some((19.5, "19.5000".to_string())),
            "Neutral keeps the first read"
        );
        assert_eq!(resolve_consensus(&[], FiveNineBias::PreferFive), None);
    }

    #[test]
    fn test_read_percent_needs_four_digits() {
        assert_eq!(read_percent("12%", None, FiveNineBias::PreferFive), None);
        assert_eq!(
            read_percent("12.3456%", None, FiveNineBias::PreferFive),
            Some((12.3456, "12.3456%".to_string()))
        );
    }

    #[test]
    fn test_bias_swap_toward_fill() {
        let (v, raw) = bias_swap(59.5, "59.5000%", Some(0.515), FiveNineBias::PreferFive);
        assert_eq!(v, 55.5);
        assert_eq!(raw, "55.5000%");

        // close enough to the fill: untouched
        let (v, _) = bias_swap(51.9, "51.9000%", Some(0.515), FiveNineBias::PreferFive);
        assert_eq!(v, 51.9);

        // no fill: untouched
        let (v, _) = bias_swap(59.5, "59.5000%", None, FiveNineBias::PreferFive);
        assert_eq!(v, 59.5);
    }

    #[test]
    fn test_snap_without_fill() {
        assert_eq!(snap_to_fill(0.0005, "0.0005%", None).0, 0.0);
        assert_eq!(snap_to_fill(12.5, "12.5%", None).0, 12.5);
    }

    #[test]
    fn test_snap_far_off_read() {
        let (v, _) = snap_to_fill(21.5, "21.5000%", Some(0.515));
        assert!((v - 51.5).abs() < 1e-9, "Expected snap to the fill, got {}", v);
    }

    #[test]
    fn test_snap_trusts_close_well_formed_read() {
        let (v, raw) = snap_to_fill(49.1234, "49.1234%", Some(0.515));
        assert_eq!(v, 49.1234);
        assert_eq!(raw, "49.1234%");
    }

    #[test]
    fn test_snap_six_to_eight() {
        // 6 read instead of 8, within the 12 point window
        let (v, raw) = snap_to_fill(46.0, "46 0000", Some(0.48));
        assert_eq!(v, 48.0);
        assert_eq!(raw, "48 0000");
    }

    #[test]
    fn test_snap_substituted_token_keeps_its_text() {
        // the closest token is malformed, so the 6/8 fix still applies to it
        let (v, raw) = snap_to_fill(3.0, "3 46,00000000", Some(0.48));
        assert_eq!(v, 48.0);
        assert_eq!(raw, "48,00000000");

        let (v, raw) = snap_to_fill(3.0, "3 47,912345678", Some(0.48));
        assert!((v - 47.912345678).abs() < 1e-9, "Closest token taken, got {}", v);
        assert_eq!(raw, "47,912345678");
    }

    #[test]
    fn test_snap_empty_bar() {
        let (v, _) = snap_to_fill(0.03, "0 0300", Some(0.0));
        assert_eq!(v, 0.0);
        let (v, _) = snap_to_fill(3.5, "3.5000%", Some(0.0));
        assert_eq!(v, 3.5, "Well-formed reads near the fill are kept");
    }

    #[test]
    fn test_snap_short_raw_untouched() {
        assert_eq!(snap_to_fill(5.0, "5%", Some(0.5)).0, 5.0);
    }

    #[test]
    fn test_well_formed_percent() {
        assert!(well_formed_percent("12.3456%"));
        assert!(well_formed_percent("1.5"));
        assert!(!well_formed_percent("1234.5"));
        assert!(!well_formed_percent("12"));
        assert!(!well_formed_percent("12.1234567"));
    }

    #[test]
    fn test_text_slice_geometry() {
        let slice = text_slice(&half_bar()).unwrap();
        assert_eq!(slice.width(), 260);
        assert_eq!(slice.height(), 16);
    }

    // ========== end to end with a scripted engine ==========

    #[tokio::test]
    async fn test_level_first_read_wins() {
        let engine = Arc::new(ScriptedEngine::constant("126"));
        let rec = recognizer(engine.clone(), RecognitionConfig::default());
        let result = rec.recognize(SignalKind::Level, &text_capture()).await.unwrap();

        assert!(result.ok);
        assert_eq!(result.value, Some(SignalValue::Level(126)));
        assert_eq!(engine.calls(), 1);
        assert_eq!(
            engine.seen_options()[0].whitelist.as_deref(),
            Some("0123456789"),
            "Level reads use the digit whitelist"
        );
    }

    #[tokio::test]
    async fn test_level_falls_through_invalid_reads() {
        let engine = Arc::new(ScriptedEngine::sequence(vec!["", "abc", "42"]));
        let rec = recognizer(engine.clone(), RecognitionConfig::default());
        let result = rec.recognize(SignalKind::Level, &text_capture()).await.unwrap();

        assert_eq!(result.value, Some(SignalValue::Level(42)));
        assert_eq!(result.raw_text.as_deref(), Some("42"));
        assert_eq!(engine.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_plan_is_unreadable() {
        let engine = Arc::new(ScriptedEngine::constant(""));
        let rec = recognizer(engine.clone(), RecognitionConfig::default());
        let result = rec.recognize(SignalKind::Level, &text_capture()).await.unwrap();

        assert!(!result.ok);
        assert!(!result.is_engine_failure());
        assert_eq!(result.raw_text, None);
        assert_eq!(engine.calls(), 14, "Every candidate is tried once");
    }

    #[tokio::test]
    async fn test_unreadable_keeps_first_raw() {
        let engine = Arc::new(ScriptedEngine::sequence(vec!["", "xx", "yy"]));
        let rec = recognizer(engine, RecognitionConfig::default());
        let result = rec.recognize(SignalKind::Level, &text_capture()).await.unwrap();
        assert!(!result.ok);
        assert_eq!(result.raw_text.as_deref(), Some("xx"));
    }

    #[tokio::test]
    async fn test_engine_error_aborts_plan() {
        let engine = Arc::new(ScriptedEngine::new(|_, _| Err(EngineError::Timeout(1000))));
        let rec = recognizer(engine.clone(), RecognitionConfig::default());
        let result = rec.recognize(SignalKind::Exp, &half_bar()).await.unwrap();

        assert!(!result.ok);
        assert!(result.is_engine_failure());
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_percent_snaps_to_fill() {
        let engine = Arc::new(ScriptedEngine::constant("21.5000%"));
        let rec = recognizer(engine, RecognitionConfig::default());
        let result = rec.recognize(SignalKind::Exp, &half_bar()).await.unwrap();

        assert!(result.ok);
        assert_eq!(result.unit.as_deref(), Some("%"));
        let value = result.value.and_then(|v| v.as_percent()).unwrap();
        assert!((value - 51.5).abs() < 1e-9, "Expected 51.5, got {}", value);
    }

    #[tokio::test]
    async fn test_percent_bias_policy() {
        let engine = Arc::new(ScriptedEngine::constant("59.5000%"));
        let rec = recognizer(engine, RecognitionConfig::default());
        let result = rec.recognize(SignalKind::Exp, &half_bar()).await.unwrap();
        assert_eq!(result.value, Some(SignalValue::Percent(55.5)));
        assert_eq!(result.raw_text.as_deref(), Some("55.5000%"));

        let engine = Arc::new(ScriptedEngine::constant("59.5000%"));
        let config = RecognitionConfig {
            five_nine_bias: FiveNineBias::Neutral,
            ..RecognitionConfig::default()
        };
        let rec = recognizer(engine, config);
        let result = rec.recognize(SignalKind::Exp, &half_bar()).await.unwrap();
        assert_eq!(
            result.value,
            Some(SignalValue::Percent(58.5)),
            "Without the bias only the 9->8 swap applies"
        );
    }

    #[tokio::test]
    async fn test_percent_short_reads_rejected() {
        let engine = Arc::new(ScriptedEngine::constant("12%"));
        let rec = recognizer(engine.clone(), RecognitionConfig::default());
        let result = rec.recognize(SignalKind::Exp, &half_bar()).await.unwrap();
        assert!(!result.ok);
        assert_eq!(result.raw_text.as_deref(), Some("12%"));
        assert_eq!(engine.calls(), 36);
    }

    #[tokio::test]
    async fn test_hp_requires_slash() {
        let engine = Arc::new(ScriptedEngine::sequence(vec!["12005000", "1200/5000"]));
        let rec = recognizer(engine.clone(), RecognitionConfig::default());
        let result = rec.recognize(SignalKind::EnemyHp, &text_capture()).await.unwrap();
        assert_eq!(
            result.value,
            Some(SignalValue::Hp {
                current: 1200,
                max: 5000
            })
        );
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_enemy_name_cleaned() {
        let engine = Arc::new(ScriptedEngine::constant("Red-Eye Bat 7"));
        let rec = recognizer(engine, RecognitionConfig::default());
        let result = rec.recognize(SignalKind::EnemyName, &text_capture()).await.unwrap();
        assert_eq!(result.value, Some(SignalValue::Text("Red-Eye Bat".to_string())));
        assert_eq!(result.raw_text.as_deref(), Some("Red-Eye Bat 7"));
    }

    #[tokio::test]
    async fn test_free_text_has_no_whitelist() {
        let engine = Arc::new(ScriptedEngine::constant("Quest complete"));
        let rec = recognizer(engine.clone(), RecognitionConfig::default());
        let result = rec.recognize(SignalKind::FreeText, &text_capture()).await.unwrap();
        assert!(result.ok);
        assert!(engine.seen_options()[0].whitelist.is_none());
    }

    #[tokio::test]
    async fn test_empty_capture() {
        let engine = Arc::new(ScriptedEngine::constant("1"));
        let rec = recognizer(engine.clone(), RecognitionConfig::default());
        let empty = RawImage::zeros(0, 0, crate::models::raw_image::Channels::Bgr);
        let result = rec.recognize(SignalKind::Level, &empty).await.unwrap();
        assert!(!result.ok);
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_request_ids_increase() {
        let engine = Arc::new(ScriptedEngine::constant("7"));
        let rec = recognizer(engine, RecognitionConfig::default());
        let a = rec.recognize(SignalKind::Level, &text_capture()).await.unwrap();
        let b = rec.recognize(SignalKind::Level, &text_capture()).await.unwrap();
        assert!(b.request_id > a.request_id);
    }

    #[tokio::test]
    async fn test_recognize_png() {
        let engine = Arc::new(ScriptedEngine::constant("88"));
        let rec = recognizer(engine, RecognitionConfig::default());
        let png = PreprocessingService::default().encode_png(&text_capture()).unwrap();
        let result = rec.recognize_png(SignalKind::Level, &png).await.unwrap();
        assert_eq!(result.value, Some(SignalValue::Level(88)));
    }
}
