use crate::error::TelemetryError;
use crate::models::config::{AppConfig, SchedulerConfig, TrackerConfig};
use crate::models::raw_image::RawImage;
use crate::models::roi::NormalizedRoi;
use crate::models::settings::{ManualLevelOverride, ProfileSettings, TimerSettings};
use crate::models::signal::SignalKind;
use crate::models::telemetry::{TelemetryEvent, TelemetrySnapshot};
use crate::services::capture::CaptureSource;
use crate::services::guard::PlausibilityGuard;
use crate::services::ocr::debug::DebugSink;
use crate::services::ocr::engine::OcrEngine;
use crate::services::ocr::preprocessing::PreprocessingService;
use crate::services::ocr::recognizer::Recognizer;
use crate::services::scheduler::{ScheduleKey, Scheduler, SchedulerHandle, Tick};
use crate::services::store::{ApplyOutcome, TelemetryStore};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What happened to one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Value passed the guard and was published
    Accepted { level_up: bool },
    /// Value parsed but was implausible; the previous value is kept
    Rejected,
    /// Engine ran but nothing parsed
    ReadFailed { cleared: bool },
    /// Engine failed; `backoff` is set when this failure opened a backoff window
    EngineFailed { cleared: bool, backoff: bool },
    /// The same signal of the same profile is still being read
    SkippedDuplicate,
    /// Signal kind is inside its backoff window
    SkippedBackoff,
    /// Disabled interval, missing region or no capture surface
    SkippedInactive,
    /// Structural error in the pipeline
    Fault(String),
}

/// Consecutive engine failures of one signal kind
#[derive(Debug, Default)]
struct FailureState {
    consecutive: u32,
    backoff_until: Option<Instant>,
}

/// Ties capture, recognition, plausibility checks and publication together
/// for every tracked profile.
pub struct OcrTracker {
    config: TrackerConfig,
    scheduler_config: SchedulerConfig,
    capture: Arc<dyn CaptureSource>,
    preprocessing: Arc<PreprocessingService>,
    recognizer: Recognizer,
    store: TelemetryStore,
    scheduler: SchedulerHandle,
    settings: RwLock<HashMap<String, ProfileSettings>>,
    in_progress: Mutex<HashSet<ScheduleKey>>,
    failures: Mutex<HashMap<SignalKind, FailureState>>,
    events: broadcast::Sender<TelemetryEvent>,
}

impl OcrTracker {
    /// Build the tracker and its scheduler. Ticks start flowing once
    /// [`OcrTracker::start`] is called with the returned receiver.
    pub fn new(
        config: &AppConfig,
        capture: Arc<dyn CaptureSource>,
        engine: Arc<dyn OcrEngine>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Tick>) {
        let preprocessing = Arc::new(PreprocessingService::new(config.preprocessing.clone()));
        let recognizer = Recognizer::new(
            engine,
            Arc::clone(&preprocessing),
            config.recognition.clone(),
            config.engine.clone(),
        )
        .with_debug(DebugSink::new(&config.debug));
        let store = TelemetryStore::new(
            PlausibilityGuard::new(config.guard.clone()),
            config.tracker.stale_clear_ms,
        );
        let (scheduler, ticks) = Scheduler::spawn(config.scheduler.clone());
        let (events, _) = broadcast::channel(config.tracker.event_capacity.max(1));

        let tracker = Arc::new(Self {
            config: config.tracker.clone(),
            scheduler_config: config.scheduler.clone(),
            capture,
            preprocessing,
            recognizer,
            store,
            scheduler,
            settings: RwLock::new(HashMap::new()),
            in_progress: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            events,
        });
        (tracker, ticks)
    }

    /// Handle scheduler ticks until the scheduler stops. Each tick runs in
    /// its own task so slow reads of one signal do not delay the others.
    pub fn start(self: &Arc<Self>, mut ticks: mpsc::UnboundedReceiver<Tick>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            info!("OCR tracker started");
            while let Some(tick) = ticks.recv().await {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    let outcome = tracker.handle_tick(tick.clone()).await;
                    debug!("{}/{} -> {:?}", tick.profile_id, tick.kind, outcome);
                });
            }
            info!("OCR tracker stopped");
        })
    }

    /// Stop scheduling; in-flight ticks finish on their own
    pub fn stop(&self) {
        self.scheduler.shutdown();
    }

    /// Process one tick and acknowledge it to the scheduler
    pub async fn handle_tick(&self, tick: Tick) -> TickOutcome {
        let key = ScheduleKey::new(tick.profile_id.clone(), tick.kind);
        if !self.in_progress.lock().insert(key.clone()) {
            self.scheduler.ack(&tick);
            return TickOutcome::SkippedDuplicate;
        }

        let outcome = self.process(&tick.profile_id, tick.kind).await;

        self.in_progress.lock().remove(&key);
        self.scheduler.ack(&tick);
        outcome
    }

    async fn process(&self, profile_id: &str, kind: SignalKind) -> TickOutcome {
        let Some(roi) = self.active_roi(profile_id, kind) else {
            return TickOutcome::SkippedInactive;
        };
        if self.in_backoff(kind) {
            return TickOutcome::SkippedBackoff;
        }

        let image = match self.grab(profile_id, kind, &roi) {
            Ok(Some(image)) => image,
            Ok(None) => return TickOutcome::SkippedInactive,
            Err(TelemetryError::Pixel(e)) => {
                error!("{}/{} capture fault: {}", profile_id, kind, e);
                return TickOutcome::Fault(e.to_string());
            }
            Err(e) => {
                warn!("{}/{} capture failed: {}", profile_id, kind, e);
                return self.read_failed(profile_id, kind);
            }
        };

        if !self.precheck(profile_id, kind, &image) {
            return self.read_failed(profile_id, kind);
        }

        let result = match self.recognizer.recognize(kind, &image).await {
            Ok(result) => result,
            Err(e) => {
                error!("{}/{} recognition fault: {}", profile_id, kind, e);
                return TickOutcome::Fault(e.to_string());
            }
        };

        if let Some(err) = &result.error {
            let backoff = self.record_engine_failure(kind, err);
            let cleared = self.clear_stale(profile_id, kind);
            return TickOutcome::EngineFailed { cleared, backoff };
        }
        self.failures.lock().entry(kind).or_default().consecutive = 0;

        let Some(value) = result.value.filter(|_| result.ok) else {
            debug!("{}/{} unreadable (raw {:?})", profile_id, kind, result.raw_text);
            return self.read_failed(profile_id, kind);
        };

        match self.store.apply(profile_id, kind, value) {
            ApplyOutcome::Accepted { event, level_up } => {
                if level_up {
                    info!("{} level-up detected", profile_id);
                }
                self.publish(event);
                TickOutcome::Accepted { level_up }
            }
            ApplyOutcome::Rejected(rejection) => {
                debug!("{}/{} rejected: {}", profile_id, kind, rejection);
                TickOutcome::Rejected
            }
        }
    }

    /// Region of an enabled signal, if both interval and ROI are set
    fn active_roi(&self, profile_id: &str, kind: SignalKind) -> Option<NormalizedRoi> {
        let settings = self.settings.read();
        let profile = settings.get(profile_id)?;
        if profile.timers.get(kind) == 0 {
            return None;
        }
        profile.rois.get(&kind).copied()
    }

    fn grab(&self, profile_id: &str, kind: SignalKind, roi: &NormalizedRoi) -> Result<Option<RawImage>, TelemetryError> {
        let Some((surface_w, surface_h)) = self.capture.surface_size(profile_id) else {
            debug!("{} has no capture surface", profile_id);
            return Ok(None);
        };
        let Some(mut rect) = roi.to_pixels(surface_w, surface_h) else {
            return Ok(None);
        };
        if kind.is_percent_like() {
            rect = rect.pad_to_min(
                self.config.percent_min_width,
                self.config.percent_min_height,
                surface_w,
                surface_h,
            );
        }
        self.capture.grab(profile_id, rect).map(Some)
    }

    /// Cheap checks that spare the engine obviously unreadable captures
    fn precheck(&self, profile_id: &str, kind: SignalKind, image: &RawImage) -> bool {
        if !kind.is_percent_like() && self.preprocessing.is_nearly_uniform(image) {
            debug!("{}/{} blank capture", profile_id, kind);
            return false;
        }
        match kind {
            SignalKind::EnemyHp => self.preprocessing.detect_hp_bar(image),
            SignalKind::EnemyName => {
                self.store
                    .record_element(profile_id, self.preprocessing.detect_element(image));
                true
            }
            _ => true,
        }
    }

    fn in_backoff(&self, kind: SignalKind) -> bool {
        let failures = self.failures.lock();
        failures
            .get(&kind)
            .and_then(|f| f.backoff_until)
            .map_or(false, |until| Instant::now() < until)
    }

    /// Count an engine failure; returns true when it opened a backoff window
    fn record_engine_failure(&self, kind: SignalKind, err: &str) -> bool {
        let mut failures = self.failures.lock();
        let state = failures.entry(kind).or_default();
        state.consecutive += 1;
        if state.consecutive < self.config.failures_before_backoff {
            debug!("{} engine failure {}: {}", kind, state.consecutive, err);
            return false;
        }
        state.consecutive = 0;
        state.backoff_until = Some(Instant::now() + Duration::from_millis(self.config.backoff_ms));
        warn!("{} engine failing ({}), backing off {}ms", kind, err, self.config.backoff_ms);
        true
    }

    fn read_failed(&self, profile_id: &str, kind: SignalKind) -> TickOutcome {
        TickOutcome::ReadFailed {
            cleared: self.clear_stale(profile_id, kind),
        }
    }

    fn clear_stale(&self, profile_id: &str, kind: SignalKind) -> bool {
        match self.store.clear_if_stale(profile_id, kind) {
            Some(event) => {
                self.publish(event);
                true
            }
            None => false,
        }
    }

    fn publish(&self, event: TelemetryEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ---------------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------------

    fn with_profile<R>(&self, profile_id: &str, f: impl FnOnce(&mut ProfileSettings) -> R) -> R {
        let mut settings = self.settings.write();
        f(settings.entry(profile_id.to_string()).or_default())
    }

    /// Set one polling interval; returns the sanitized value
    pub fn set_interval(&self, profile_id: &str, kind: SignalKind, interval_ms: u64) -> u64 {
        let (stored, timers) = self.with_profile(profile_id, |p| {
            let stored = p.timers.set(kind, interval_ms, &self.scheduler_config);
            (stored, p.timers.clone())
        });
        self.scheduler.update(profile_id, &timers);
        stored
    }

    pub fn set_timers(&self, profile_id: &str, timers: &TimerSettings) {
        let timers = timers.sanitized(&self.scheduler_config);
        self.with_profile(profile_id, |p| p.timers = timers.clone());
        self.scheduler.update(profile_id, &timers);
    }

    pub fn timers(&self, profile_id: &str) -> TimerSettings {
        self.settings
            .read()
            .get(profile_id)
            .map(|p| p.timers.clone())
            .unwrap_or_default()
    }

    /// Set or remove the capture region of a signal
    pub fn set_roi(&self, profile_id: &str, kind: SignalKind, roi: Option<NormalizedRoi>) -> Result<(), TelemetryError> {
        if let Some(roi) = &roi {
            roi.validate().map_err(TelemetryError::Config)?;
        }
        self.with_profile(profile_id, |p| match roi {
            Some(roi) => {
                p.rois.insert(kind, roi);
            }
            None => {
                p.rois.remove(&kind);
            }
        });
        Ok(())
    }

    /// Patch the manual level override and publish the effective level
    pub fn set_manual_level(&self, profile_id: &str, value: Option<u32>, enabled: Option<bool>) -> ManualLevelOverride {
        let (manual, event) = self.store.set_manual_level(profile_id, value, enabled);
        self.with_profile(profile_id, |p| p.manual_level = Some(manual.clone()));
        self.publish(event);
        manual
    }

    pub fn manual_level(&self, profile_id: &str) -> Option<ManualLevelOverride> {
        self.store.manual_level(profile_id)
    }

    /// Publish a user-entered experience percentage; false for non-finite input
    pub fn set_manual_percent(&self, profile_id: &str, percent: f64) -> bool {
        match self.store.set_manual_percent(profile_id, percent) {
            Some(event) => {
                self.publish(event);
                true
            }
            None => false,
        }
    }

    pub fn latest(&self, profile_id: &str) -> Option<TelemetrySnapshot> {
        self.store.snapshot(profile_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.events.subscribe()
    }

    /// All profile settings, for the persistence layer
    pub fn export_settings(&self) -> BTreeMap<String, ProfileSettings> {
        self.settings
            .read()
            .iter()
            .map(|(id, p)| {
                let mut p = p.clone();
                p.manual_level = self.store.manual_level(id).or(p.manual_level);
                (id.clone(), p)
            })
            .collect()
    }

    /// Replace profile settings and reschedule. Invalid regions are dropped.
    pub fn import_settings(&self, profiles: BTreeMap<String, ProfileSettings>) {
        for (id, mut profile) in profiles {
            profile.timers = profile.timers.sanitized(&self.scheduler_config);
            profile.rois.retain(|kind, roi| match roi.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("{}/{} region dropped: {}", id, kind, e);
                    false
                }
            });
            self.store.restore_manual_level(&id, profile.manual_level.clone());
            self.scheduler.update(&id, &profile.timers);
            self.settings.write().insert(id, profile);
        }
    }

    /// Stop scheduling a profile and forget its settings and cached values
    pub fn remove_profile(&self, profile_id: &str) {
        self.scheduler.update(profile_id, &TimerSettings::disabled());
        self.settings.write().remove(profile_id);
        self.store.remove_profile(profile_id);
    }
}
