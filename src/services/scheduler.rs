//! Polling scheduler.
//!
//! One actor task owns the schedule table. Each armed entry has a single
//! timer task that sleeps for the entry's interval and reports back with a
//! `Fire` message; ticks go out on an mpsc channel and the entry is re-armed
//! only after the consumer acknowledges the tick. A watchdog sweep resets
//! entries whose acknowledgement never arrived.
//!
//! Every tick carries a sequence number that its ack must echo. Acks for
//! ticks the watchdog already gave up on are dropped, and ticks of removed
//! entries hold their in-flight slot until acknowledged or expired.

use crate::models::config::SchedulerConfig;
use crate::models::settings::TimerSettings;
use crate::models::signal::SignalKind;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleKey {
    pub profile_id: String,
    pub kind: SignalKind,
}

impl ScheduleKey {
    pub fn new(profile_id: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            profile_id: profile_id.into(),
            kind,
        }
    }
}

/// A request to read one signal of one profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub profile_id: String,
    pub kind: SignalKind,
    /// Echoed back by [`SchedulerHandle::ack`]
    pub seq: u64,
}

/// Read-only view of a schedule entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryStatus {
    pub key: ScheduleKey,
    pub interval_ms: u64,
    pub in_flight: usize,
    pub pending: bool,
    pub armed: bool,
    pub last_tick: Option<Instant>,
    pub last_ack: Option<Instant>,
}

enum Command {
    Update {
        profile_id: String,
        timers: TimerSettings,
    },
    Ack {
        key: ScheduleKey,
        seq: u64,
    },
    Fire {
        key: ScheduleKey,
        generation: u64,
    },
    Sweep,
    Snapshot(oneshot::Sender<Vec<EntryStatus>>),
    Shutdown,
}

struct Entry {
    interval_ms: u64,
    /// Sequence numbers of unacknowledged ticks
    outstanding: Vec<u64>,
    pending: bool,
    last_tick: Option<Instant>,
    last_ack: Option<Instant>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Entry {
    fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            outstanding: Vec::new(),
            pending: false,
            last_tick: None,
            last_ack: None,
            generation: 0,
            timer: None,
        }
    }

    fn disarm(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

/// Cloneable handle to the scheduler actor
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Scheduler already stopped");
        }
    }

    /// Replace the intervals of a profile. Zero intervals remove entries.
    pub fn update(&self, profile_id: &str, timers: &TimerSettings) {
        self.send(Command::Update {
            profile_id: profile_id.to_string(),
            timers: timers.clone(),
        });
    }

    /// Acknowledge a finished tick
    pub fn ack(&self, tick: &Tick) {
        self.send(Command::Ack {
            key: ScheduleKey::new(tick.profile_id.clone(), tick.kind),
            seq: tick.seq,
        });
    }

    /// Current schedule table, sorted by key
    pub async fn snapshot(&self) -> Vec<EntryStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx));
        rx.await.unwrap_or_default()
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }
}

/// Actor state
pub struct Scheduler {
    config: SchedulerConfig,
    entries: BTreeMap<ScheduleKey, Entry>,
    in_flight_by_kind: HashMap<SignalKind, usize>,
    /// Ticks of removed entries: kind and the instant their slot expires
    detached: HashMap<u64, (SignalKind, Instant)>,
    next_seq: u64,
    commands: mpsc::UnboundedSender<Command>,
    ticks: mpsc::UnboundedSender<Tick>,
}

impl Scheduler {
    /// Start the actor and its watchdog. Returns the handle and the tick stream.
    pub fn spawn(config: SchedulerConfig) -> (SchedulerHandle, mpsc::UnboundedReceiver<Tick>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();

        let watchdog_every = Duration::from_millis(config.watchdog_ms.max(1));
        let scheduler = Scheduler {
            config,
            entries: BTreeMap::new(),
            in_flight_by_kind: HashMap::new(),
            detached: HashMap::new(),
            next_seq: 0,
            commands: cmd_tx.clone(),
            ticks: tick_tx,
        };
        tokio::spawn(scheduler.run(cmd_rx));

        let watchdog_tx = cmd_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(watchdog_every);
            interval.tick().await;
            loop {
                interval.tick().await;
                if watchdog_tx.send(Command::Sweep).is_err() {
                    break;
                }
            }
        });

        info!("Scheduler started");
        (SchedulerHandle { commands: cmd_tx }, tick_rx)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Update { profile_id, timers } => self.handle_update(&profile_id, &timers),
                Command::Ack { key, seq } => self.handle_ack(key, seq),
                Command::Fire { key, generation } => self.handle_fire(key, generation),
                Command::Sweep => self.sweep(),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.statuses());
                }
                Command::Shutdown => break,
            }
        }

        for entry in self.entries.values_mut() {
            entry.disarm();
        }
        info!("Scheduler stopped");
    }

    fn handle_update(&mut self, profile_id: &str, timers: &TimerSettings) {
        for (kind, requested) in timers.iter() {
            let interval_ms = self.config.sanitize_interval(requested);
            let key = ScheduleKey::new(profile_id, kind);

            if interval_ms == 0 {
                if let Some(mut entry) = self.entries.remove(&key) {
                    entry.disarm();
                    // running ticks keep their slot until acknowledged
                    let threshold = Duration::from_millis(self.config.stall_threshold_ms(entry.interval_ms));
                    let expires = entry.last_tick.unwrap_or_else(Instant::now) + threshold;
                    for seq in entry.outstanding.drain(..) {
                        self.detached.insert(seq, (kind, expires));
                    }
                    debug!("{}/{} disabled", profile_id, kind);
                }
                continue;
            }

            let entry = self.entries.entry(key.clone()).or_insert_with(|| Entry::new(interval_ms));
            let changed = entry.interval_ms != interval_ms;
            entry.interval_ms = interval_ms;
            let idle = entry.outstanding.is_empty() && !entry.pending;
            if idle && (changed || entry.timer.is_none()) {
                self.arm(&key);
            }
        }
    }

    fn handle_ack(&mut self, key: ScheduleKey, seq: u64) {
        if let Some((kind, _)) = self.detached.remove(&seq) {
            self.release(kind, 1);
            self.dispatch_next_pending(kind, None);
            return;
        }
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        let Some(pos) = entry.outstanding.iter().position(|s| *s == seq) else {
            debug!("{}/{} stale ack {} ignored", key.profile_id, key.kind, seq);
            return;
        };
        entry.outstanding.remove(pos);
        entry.last_ack = Some(Instant::now());
        self.release(key.kind, 1);

        // a tick held back by the ceiling goes first
        self.dispatch_next_pending(key.kind, Some(&key));

        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        if entry.pending {
            entry.pending = false;
            self.dispatch(&key);
        } else if entry.outstanding.is_empty() {
            self.arm(&key);
        }
    }

    fn handle_fire(&mut self, key: ScheduleKey, generation: u64) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.timer = None;
        self.dispatch(&key);
    }

    /// Send a tick, or mark it pending when the kind is at its ceiling
    fn dispatch(&mut self, key: &ScheduleKey) {
        let in_flight = self.in_flight_by_kind.get(&key.kind).copied().unwrap_or(0);
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if in_flight >= self.config.max_inflight_per_kind {
            debug!("{}/{} at ceiling, tick pending", key.profile_id, key.kind);
            entry.pending = true;
            return;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        entry.outstanding.push(seq);
        entry.last_tick = Some(Instant::now());
        *self.in_flight_by_kind.entry(key.kind).or_insert(0) += 1;
        let tick = Tick {
            profile_id: key.profile_id.clone(),
            kind: key.kind,
            seq,
        };
        if self.ticks.send(tick).is_err() {
            debug!("Tick receiver dropped");
        }
    }

    fn arm(&mut self, key: &ScheduleKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.disarm();
        entry.generation += 1;

        let generation = entry.generation;
        let delay = Duration::from_millis(entry.interval_ms);
        let commands = self.commands.clone();
        let fire_key = key.clone();
        entry.timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = commands.send(Command::Fire {
                key: fire_key,
                generation,
            });
        }));
    }

    fn release(&mut self, kind: SignalKind, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(n) = self.in_flight_by_kind.get_mut(&kind) {
            *n = n.saturating_sub(count);
        }
    }

    fn next_pending(&self, kind: SignalKind, except: Option<&ScheduleKey>) -> Option<ScheduleKey> {
        self.entries
            .iter()
            .filter(|(k, e)| k.kind == kind && Some(*k) != except && e.pending)
            .min_by_key(|(_, e)| e.last_tick)
            .map(|(k, _)| k.clone())
    }

    /// Hand a freed slot to the oldest entry of `kind` held back by the ceiling
    fn dispatch_next_pending(&mut self, kind: SignalKind, except: Option<&ScheduleKey>) {
        if let Some(waiting) = self.next_pending(kind, except) {
            if let Some(entry) = self.entries.get_mut(&waiting) {
                entry.pending = false;
            }
            self.dispatch(&waiting);
        }
    }

    /// Reset entries whose tick was never acknowledged
    fn sweep(&mut self) {
        let now = Instant::now();
        let stalled: Vec<(ScheduleKey, usize)> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.outstanding.is_empty())
            .filter(|(_, e)| {
                let threshold = self.config.stall_threshold_ms(e.interval_ms) as u128;
                e.last_tick
                    .map_or(false, |at| now.duration_since(at).as_millis() > threshold)
            })
            .map(|(k, e)| (k.clone(), e.outstanding.len()))
            .collect();

        for (key, in_flight) in stalled {
            warn!("{}/{} stalled, resetting", key.profile_id, key.kind);
            self.release(key.kind, in_flight);
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.outstanding.clear();
                entry.pending = false;
            }
            self.arm(&key);
            self.dispatch_next_pending(key.kind, Some(&key));
        }

        let expired: Vec<u64> = self
            .detached
            .iter()
            .filter(|(_, (_, expires))| *expires <= now)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in expired {
            if let Some((kind, _)) = self.detached.remove(&seq) {
                warn!("{} tick {} of a removed entry never acknowledged", kind, seq);
                self.release(kind, 1);
                self.dispatch_next_pending(kind, None);
            }
        }
    }

    fn statuses(&self) -> Vec<EntryStatus> {
        self.entries
            .iter()
            .map(|(key, e)| EntryStatus {
                key: key.clone(),
                interval_ms: e.interval_ms,
                in_flight: e.outstanding.len(),
                pending: e.pending,
                armed: e.timer.is_some(),
                last_tick: e.last_tick,
                last_ack: e.last_ack,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    /// Helper: timers with only `kind` enabled
    fn only(kind: SignalKind, interval_ms: u64) -> TimerSettings {
        let mut timers = TimerSettings::disabled();
        timers.set(kind, interval_ms, &SchedulerConfig::default());
        timers
    }

    async fn no_tick_within(ticks: &mut mpsc::UnboundedReceiver<Tick>, ms: u64) -> bool {
        timeout(Duration::from_millis(ms), ticks.recv()).await.is_err()
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_after_interval() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        let start = Instant::now();
        handle.update("p1", &only(SignalKind::Exp, 200));

        let tick = ticks.recv().await.unwrap();
        assert_eq!(tick.profile_id, "p1");
        assert_eq!(tick.kind, SignalKind::Exp);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearmed_only_after_ack() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        handle.update("p1", &only(SignalKind::Level, 100));
        let first = ticks.recv().await.unwrap();

        assert!(no_tick_within(&mut ticks, 1500).await, "No tick while unacknowledged");

        handle.ack(&first);
        let tick = timeout(Duration::from_millis(150), ticks.recv()).await;
        assert!(tick.is_ok(), "Ack re-arms the entry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_removes_entry() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        handle.update("p1", &only(SignalKind::Exp, 300));
        assert_eq!(handle.snapshot().await.len(), 1);

        handle.update("p1", &TimerSettings::disabled());
        assert!(handle.snapshot().await.is_empty());
        assert!(no_tick_within(&mut ticks, 2000).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_clamped() {
        let (handle, _ticks) = Scheduler::spawn(SchedulerConfig::default());
        let mut timers = TimerSettings::disabled();
        timers.exp = 10;
        timers.level = 60_000;
        handle.update("p1", &timers);

        let table = handle.snapshot().await;
        let interval = |kind| table.iter().find(|s| s.key.kind == kind).map(|s| s.interval_ms);
        assert_eq!(interval(SignalKind::Exp), Some(50));
        assert_eq!(interval(SignalKind::Level), Some(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_marks_pending_and_dispatches_on_ack() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        for profile in ["a", "b", "c", "d"] {
            handle.update(profile, &only(SignalKind::Exp, 100));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(ticks.recv().await.unwrap());
        }
        assert!(no_tick_within(&mut ticks, 500).await, "Fourth tick held back");

        let table = handle.snapshot().await;
        let pending: Vec<_> = table.iter().filter(|s| s.pending).collect();
        assert_eq!(pending.len(), 1);
        let waiting = pending[0].key.profile_id.clone();
        assert!(seen.iter().all(|t| t.profile_id != waiting));

        handle.ack(&seen[0]);
        let tick = timeout(Duration::from_millis(10), ticks.recv()).await.unwrap().unwrap();
        assert_eq!(tick.profile_id, waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_is_per_kind() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        for profile in ["a", "b", "c"] {
            handle.update(profile, &only(SignalKind::Exp, 100));
        }
        handle.update("a", &{
            let mut t = only(SignalKind::Exp, 100);
            t.level = 100;
            t
        });

        let mut kinds = Vec::new();
        for _ in 0..4 {
            kinds.push(ticks.recv().await.unwrap().kind);
        }
        assert_eq!(kinds.iter().filter(|k| **k == SignalKind::Exp).count(), 3);
        assert!(kinds.contains(&SignalKind::Level));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_resets_stalled_entry() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        handle.update("p1", &only(SignalKind::Exp, 200));
        ticks.recv().await.unwrap();

        // never acknowledged: the stall threshold is max(3x200, 2000)
        let tick = timeout(Duration::from_millis(4000), ticks.recv()).await;
        assert!(tick.is_ok(), "Watchdog re-arms a stalled entry");

        let table = handle.snapshot().await;
        assert_eq!(table[0].in_flight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_after_removal_is_ignored() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        handle.update("p1", &only(SignalKind::Exp, 100));
        let tick = ticks.recv().await.unwrap();

        handle.update("p1", &TimerSettings::disabled());
        handle.ack(&tick);
        assert!(handle.snapshot().await.is_empty());
        assert!(no_tick_within(&mut ticks, 1000).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ack_after_reset_is_ignored() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        handle.update("p1", &only(SignalKind::Exp, 200));
        let stalled = ticks.recv().await.unwrap();

        // watchdog gives up on the first tick and fires a new one
        let current = timeout(Duration::from_millis(4000), ticks.recv())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stalled.seq, current.seq);

        // the first tick finishes late
        handle.ack(&stalled);
        let table = handle.snapshot().await;
        assert_eq!(table[0].in_flight, 1, "Running tick keeps its slot");
        assert!(!table[0].armed, "Late ack does not re-arm");
        assert!(no_tick_within(&mut ticks, 1500).await);

        handle.ack(&current);
        let next = timeout(Duration::from_millis(250), ticks.recv()).await;
        assert!(next.is_ok(), "Ack of the running tick re-arms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_entry_holds_slot_until_ack() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        for profile in ["a", "b", "c"] {
            handle.update(profile, &only(SignalKind::Exp, 100));
        }
        let mut running = Vec::new();
        for _ in 0..3 {
            running.push(ticks.recv().await.unwrap());
        }

        handle.update("a", &TimerSettings::disabled());
        handle.update("d", &only(SignalKind::Exp, 100));
        assert!(no_tick_within(&mut ticks, 500).await, "Removed tick still counts");

        let removed = running.iter().find(|t| t.profile_id == "a").unwrap();
        handle.ack(removed);
        let tick = timeout(Duration::from_millis(10), ticks.recv()).await.unwrap().unwrap();
        assert_eq!(tick.profile_id, "d");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticks() {
        let (handle, mut ticks) = Scheduler::spawn(SchedulerConfig::default());
        handle.update("p1", &only(SignalKind::Exp, 100));
        handle.shutdown();
        // the actor drops the tick sender on exit
        let next = timeout(Duration::from_millis(500), ticks.recv()).await;
        assert!(matches!(next, Ok(None)));
        assert!(handle.snapshot().await.is_empty());
    }
}
