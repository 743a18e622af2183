use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::{
    BeatId, BeatMatchError, BeatsMatch, MatchDispatcher, MatchResults, MatchSettings, MissedBeat,
    Pattern, PerformanceSummary, Result, SessionSettings, SoundId, TimedBeatId, Velocity,
};

/// Accuracy magnitude above which a played beat is shown as early or late.
const STATUS_TOLERANCE: f32 = 0.25;

/// Outcome of a beat as presented to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeatStatus {
    /// Not decided yet.
    Pending,
    Early,
    Late,
    Correct,
    /// Played beat with no pattern beat to match.
    MissedPlay,
    /// Pattern beat that was never played.
    MissedPattern,
}

impl BeatStatus {
    pub fn from_accuracy(accuracy: f32) -> Self {
        if accuracy < -STATUS_TOLERANCE {
            BeatStatus::Early
        } else if accuracy > STATUS_TOLERANCE {
            BeatStatus::Late
        } else {
            BeatStatus::Correct
        }
    }
}

/// Notifications published by a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    NewPlayedBeat {
        beat: TimedBeatId,
        sound: SoundId,
        velocity: Velocity,
    },
    StatusSet {
        id: BeatId,
        status: BeatStatus,
    },
    PatternMissed(TimedBeatId),
    Tick(f32),
}

/// Session time in beats, measured on a monotonic clock.
#[derive(Debug)]
pub struct SessionClock {
    started: Mutex<Instant>,
    beats_per_ms: f64,
}

impl SessionClock {
    pub fn new(bpm: u32) -> Self {
        Self {
            started: Mutex::new(Instant::now()),
            beats_per_ms: bpm as f64 / 60_000.0,
        }
    }

    pub fn now(&self) -> f32 {
        let started = *self.started.lock().unwrap_or_else(PoisonError::into_inner);
        (started.elapsed().as_secs_f64() * 1000.0 * self.beats_per_ms) as f32
    }

    pub fn restart(&self) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Wall-clock duration of `beats` at this clock's tempo.
    pub fn duration_of(&self, beats: f32) -> Duration {
        Duration::from_secs_f64((beats.max(0.0) as f64 / self.beats_per_ms) / 1000.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct PlayedHit {
    time: f32,
    sound: SoundId,
    velocity: Velocity,
}

/// Cloneable handle for registering played beats from any thread.
#[derive(Debug, Clone)]
pub struct PlayInput {
    clock: Arc<SessionClock>,
    tx: Sender<PlayedHit>,
}

impl PlayInput {
    /// Registers a hit stamped with the current session time and returns
    /// that time.
    pub fn hit(&self, sound: SoundId, velocity: Velocity) -> Result<f32> {
        let time = self.clock.now();
        self.hit_at(time, sound, velocity)?;
        Ok(time)
    }

    pub fn hit_at(&self, time: f32, sound: SoundId, velocity: Velocity) -> Result<()> {
        self.tx
            .send(PlayedHit {
                time,
                sound,
                velocity,
            })
            .map_err(|_| BeatMatchError::msg("session input has been closed"))
    }

    pub fn now(&self) -> f32 {
        self.clock.now()
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }
}

/// Results sink of a session: feeds the summary and publishes events.
#[derive(Debug)]
struct SessionResults {
    summary: RwLock<Arc<PerformanceSummary>>,
    events: Sender<SessionEvent>,
}

impl SessionResults {
    fn summary(&self) -> Arc<PerformanceSummary> {
        self.summary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_summary(&self, summary: PerformanceSummary) {
        *self.summary.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(summary);
    }

    fn publish(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "session event queue full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("session event receiver dropped");
            }
        }
    }

    // Ticks are frequent and superseded by the next one, so a full queue
    // drops them quietly.
    fn publish_tick(&self, now: f32) {
        match self.events.try_send(SessionEvent::Tick(now)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!(now, "tick event dropped"),
            Err(TrySendError::Disconnected(_)) => {
                debug!("session event receiver dropped");
            }
        }
    }
}

impl MatchResults for SessionResults {
    fn on_match(&self, found: BeatsMatch) {
        self.summary().on_match(found);
        self.publish(SessionEvent::StatusSet {
            id: found.played_beat.id,
            status: BeatStatus::from_accuracy(found.accuracy),
        });
    }

    fn on_missed(&self, missed: MissedBeat) {
        self.summary().on_missed(missed);
        if missed.beat.id.is_pattern() {
            self.publish(SessionEvent::PatternMissed(missed.beat));
            self.publish(SessionEvent::StatusSet {
                id: missed.beat.id,
                status: BeatStatus::MissedPattern,
            });
        } else {
            self.publish(SessionEvent::StatusSet {
                id: missed.beat.id,
                status: BeatStatus::MissedPlay,
            });
        }
    }
}

#[derive(Debug)]
struct SessionCore {
    pattern: Pattern,
    dispatcher: MatchDispatcher<SessionResults>,
    clock: Arc<SessionClock>,
    input: Receiver<PlayedHit>,
    next_played: AtomicU32,
    // Serialises whole steps against resets so a reset never lands between
    // two instruments of the same tick.
    step_lock: Mutex<()>,
}

impl SessionCore {
    fn step(&self, now: f32) -> Result<()> {
        let _step = self.lock_step()?;
        self.step_locked(now)
    }

    /// One loop iteration at the current clock time. The clock is read under
    /// the step lock so a concurrent reset is never ticked with a stale time.
    fn step_now(&self) -> Result<f32> {
        let _step = self.lock_step()?;
        let now = self.clock.now();
        self.step_locked(now)?;
        Ok(now)
    }

    fn step_locked(&self, now: f32) -> Result<()> {
        let results = self.dispatcher.results();

        for hit in self.input.try_iter() {
            let id = BeatId::played(self.next_played.fetch_add(1, Ordering::SeqCst))?;
            let beat = TimedBeatId::new(hit.time, id);
            results.publish(SessionEvent::NewPlayedBeat {
                beat,
                sound: hit.sound,
                velocity: hit.velocity,
            });

            match self
                .dispatcher
                .add_beat(hit.sound.instrument(), beat, hit.velocity)
            {
                Err(BeatMatchError::UnknownInstrument(instrument)) => {
                    warn!(%instrument, beat = id.value(), "hit on an instrument outside the pattern");
                    results.publish(SessionEvent::StatusSet {
                        id,
                        status: BeatStatus::MissedPlay,
                    });
                }
                other => other?,
            }
        }

        self.dispatcher.tick(now)?;
        results.publish_tick(now);
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let _step = self.lock_step()?;
        self.dispatcher
            .results()
            .replace_summary(PerformanceSummary::new(&self.pattern));
        self.clock.restart();
        self.dispatcher.reset()?;
        let discarded = self.input.try_iter().count();
        debug!(discarded, "pending input discarded");
        Ok(())
    }

    fn lock_step(&self) -> Result<MutexGuard<'_, ()>> {
        self.step_lock
            .lock()
            .map_err(|_| BeatMatchError::Poisoned("session step"))
    }
}

/// Real-time play analysis: a background loop that feeds played beats to a
/// [`MatchDispatcher`] and ticks it at a fixed interval.
#[derive(Debug)]
pub struct PlayAnalysisSession {
    core: Arc<SessionCore>,
    settings: SessionSettings,
    input: PlayInput,
    events: Receiver<SessionEvent>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PlayAnalysisSession {
    pub fn new(pattern: Pattern, matching: MatchSettings, settings: SessionSettings) -> Result<Self> {
        settings.validate()?;

        let (events_tx, events) = bounded(settings.event_capacity);
        let (input_tx, input_rx) = unbounded();
        let clock = Arc::new(SessionClock::new(pattern.info().suggested_bpm()));

        let results = SessionResults {
            summary: RwLock::new(Arc::new(PerformanceSummary::new(&pattern))),
            events: events_tx,
        };
        let dispatcher = MatchDispatcher::create(&pattern, matching, results)?;

        Ok(Self {
            core: Arc::new(SessionCore {
                pattern,
                dispatcher,
                clock: clock.clone(),
                input: input_rx,
                next_played: AtomicU32::new(1),
                step_lock: Mutex::new(()),
            }),
            settings,
            input: PlayInput {
                clock,
                tx: input_tx,
            },
            events,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Resets the session and starts the matching loop on its own thread.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(BeatMatchError::AlreadyRunning);
        }
        self.join_worker();
        self.reset()?;

        self.stop_flag.store(false, Ordering::SeqCst);
        let core = self.core.clone();
        let stop_flag = self.stop_flag.clone();
        let interval = Duration::from_millis(self.settings.refresh_interval_ms);

        let worker = thread::Builder::new()
            .name("beat-matcher-session".to_string())
            .spawn(move || run_loop(core, stop_flag, interval))?;
        self.worker = Some(worker);

        info!(
            interval_ms = self.settings.refresh_interval_ms,
            "play analysis session started"
        );
        Ok(())
    }

    /// Signals the loop to stop and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if self.worker.is_some() {
            self.join_worker();
            info!("play analysis session stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Starts a fresh attempt: new summary, clock at zero, empty queues.
    /// May be called while the loop is running.
    pub fn reset(&self) -> Result<()> {
        self.core.reset()?;
        info!("play analysis session reset");
        Ok(())
    }

    /// Drains pending input and ticks the matchers at `now`, exactly as one
    /// loop iteration does.
    pub fn step(&self, now: f32) -> Result<()> {
        self.core.step(now)
    }

    pub fn register_played_beat(&self, sound: SoundId, velocity: Velocity) -> Result<f32> {
        self.input.hit(sound, velocity)
    }

    pub fn register_played_beat_at(&self, time: f32, sound: SoundId, velocity: Velocity) -> Result<()> {
        self.input.hit_at(time, sound, velocity)
    }

    pub fn input(&self) -> PlayInput {
        self.input.clone()
    }

    pub fn now(&self) -> f32 {
        self.core.clock.now()
    }

    pub fn summary(&self) -> Arc<PerformanceSummary> {
        self.core.dispatcher.results().summary()
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    pub fn pattern(&self) -> &Pattern {
        &self.core.pattern
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("session loop panicked");
            }
        }
    }
}

impl Drop for PlayAnalysisSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(core: Arc<SessionCore>, stop_flag: Arc<AtomicBool>, interval: Duration) {
    while !stop_flag.load(Ordering::SeqCst) {
        let started = Instant::now();
        if let Err(err) = core.step_now() {
            error!(%err, "session step failed, stopping loop");
            break;
        }
        thread::sleep(interval.saturating_sub(started.elapsed()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstrumentTable, PatternInfo, TimeInUnits};

    // Four quarter notes on the snare at 600 bpm, so one beat lasts 100 ms.
    fn session(table: &mut InstrumentTable, settings: SessionSettings) -> PlayAnalysisSession {
        let snare = table.sound("SN", "hit").unwrap();
        let info = PatternInfo::builder()
            .bars_count(1)
            .beats_per_bar(4)
            .units_per_beat(TimeInUnits(1))
            .suggested_bpm(600)
            .build()
            .unwrap();
        let mut builder = Pattern::builder().info(info);
        for t in 0..4 {
            builder.add(TimeInUnits(t), snare, Velocity::MEDIUM).unwrap();
        }
        PlayAnalysisSession::new(
            builder.build().unwrap(),
            MatchSettings {
                max_matching_time: 0.5,
            },
            settings,
        )
        .unwrap()
    }

    fn drain(session: &PlayAnalysisSession) -> Vec<SessionEvent> {
        session.events().try_iter().collect()
    }

    #[test]
    fn classifies_status_from_accuracy() {
        assert_eq!(BeatStatus::from_accuracy(-0.3), BeatStatus::Early);
        assert_eq!(BeatStatus::from_accuracy(0.3), BeatStatus::Late);
        assert_eq!(BeatStatus::from_accuracy(0.2), BeatStatus::Correct);
        assert_eq!(BeatStatus::from_accuracy(-0.25), BeatStatus::Correct);
    }

    #[test]
    fn step_routes_queued_hits_and_publishes_events() {
        let mut table = InstrumentTable::new();
        let session = session(&mut table, SessionSettings::default());
        let snare = table.sound("SN", "hit").unwrap();

        session
            .register_played_beat_at(0.05, snare, Velocity::LOUD)
            .unwrap();
        session.step(0.0).unwrap();

        let events = drain(&session);
        let played = BeatId::played(1).unwrap();
        assert!(matches!(
            events[0],
            SessionEvent::NewPlayedBeat { beat, .. } if beat.id == played
        ));
        assert_eq!(
            events[1],
            SessionEvent::StatusSet {
                id: played,
                status: BeatStatus::Correct
            }
        );
        assert_eq!(events[2], SessionEvent::Tick(0.0));

        let report = session.summary().beat_summary(BeatId::pattern(0)).unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.miss, Some(0.0));
    }

    #[test]
    fn expired_pattern_beats_are_published() {
        let mut table = InstrumentTable::new();
        let session = session(&mut table, SessionSettings::default());

        session.step(0.0).unwrap();
        session.step(0.6).unwrap();

        let events = drain(&session);
        let first = BeatId::pattern(0);
        assert!(events.contains(&SessionEvent::StatusSet {
            id: first,
            status: BeatStatus::MissedPattern
        }));
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::PatternMissed(beat) if beat.id == first)));
        assert_eq!(
            session.summary().beat_summary(first).unwrap().miss,
            Some(1.0)
        );
    }

    #[test]
    fn hits_outside_the_pattern_are_extra_plays() {
        let mut table = InstrumentTable::new();
        let session = session(&mut table, SessionSettings::default());
        let ride = table.sound("ride", "bell").unwrap();

        session
            .register_played_beat_at(0.0, ride, Velocity::SOFT)
            .unwrap();
        session.step(0.0).unwrap();

        let events = drain(&session);
        assert!(events.contains(&SessionEvent::StatusSet {
            id: BeatId::played(1).unwrap(),
            status: BeatStatus::MissedPlay
        }));
    }

    #[test]
    fn reset_starts_a_fresh_summary() {
        let mut table = InstrumentTable::new();
        let session = session(&mut table, SessionSettings::default());
        let snare = table.sound("SN", "hit").unwrap();

        session
            .register_played_beat_at(0.0, snare, Velocity::MEDIUM)
            .unwrap();
        session.step(0.0).unwrap();
        let before = session.summary();
        assert_eq!(before.beat_summary(BeatId::pattern(0)).unwrap().attempts, 1);

        session
            .register_played_beat_at(1.0, snare, Velocity::MEDIUM)
            .unwrap();
        session.reset().unwrap();
        session.step(0.0).unwrap();

        let after = session.summary();
        assert_eq!(after.beat_summary(BeatId::pattern(0)).unwrap().attempts, 0);
        assert_eq!(after.beat_summary(BeatId::pattern(1)).unwrap().attempts, 0);
    }

    #[test]
    fn background_loop_ticks_until_stopped() {
        let mut table = InstrumentTable::new();
        let mut session = session(
            &mut table,
            SessionSettings {
                refresh_interval_ms: 5,
                event_capacity: 4096,
            },
        );
        let snare = table.sound("SN", "hit").unwrap();

        session.start().unwrap();
        assert!(session.is_running());
        assert!(matches!(session.start(), Err(BeatMatchError::AlreadyRunning)));

        let input = session.input();
        let sender = thread::spawn(move || input.hit(snare, Velocity::LOUD).unwrap());
        let stamped = sender.join().unwrap();
        assert!(stamped >= 0.0);

        thread::sleep(Duration::from_millis(60));
        session.stop();
        assert!(!session.is_running());

        let events = drain(&session);
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::Tick(_))));
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::NewPlayedBeat { .. })));
    }

    #[test]
    fn reset_from_another_thread_while_running() {
        let mut table = InstrumentTable::new();
        let mut session = session(
            &mut table,
            SessionSettings {
                refresh_interval_ms: 2,
                event_capacity: 4096,
            },
        );
        let snare = table.sound("SN", "hit").unwrap();

        session.start().unwrap();
        let before = session.summary();

        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..20 {
                    session.register_played_beat(snare, Velocity::MEDIUM).unwrap();
                    session.reset().unwrap();
                    thread::sleep(Duration::from_millis(3));
                }
            });
        });

        let fresh = session.summary();
        assert!(!Arc::ptr_eq(&before, &fresh));
        assert!(fresh.reports().unwrap().iter().all(|report| report.attempts == 0));
        assert!(session.is_running());

        drain(&session);
        thread::sleep(Duration::from_millis(30));
        assert!(session.is_running());
        assert!(drain(&session)
            .iter()
            .any(|event| matches!(event, SessionEvent::Tick(_))));
        session.stop();
    }

    #[test]
    fn loop_step_reads_the_clock_after_reset() {
        let mut table = InstrumentTable::new();
        let session = session(&mut table, SessionSettings::default());

        thread::sleep(Duration::from_millis(80));
        session.reset().unwrap();
        let now = session.core.step_now().unwrap();

        assert!(now < 0.5, "stepped at {now} beats after reset");
        assert!(drain(&session).contains(&SessionEvent::Tick(now)));
    }

    #[test]
    fn full_event_queue_does_not_fail_steps() {
        let mut table = InstrumentTable::new();
        let session = session(
            &mut table,
            SessionSettings {
                refresh_interval_ms: 20,
                event_capacity: 1,
            },
        );

        for step in 0..5 {
            session.step(step as f32 * 0.1).unwrap();
        }
        assert_eq!(drain(&session), vec![SessionEvent::Tick(0.0)]);
    }

    #[test]
    fn clock_converts_beats_to_wall_time() {
        let clock = SessionClock::new(120);
        assert!((clock.duration_of(1.0).as_secs_f64() - 0.5).abs() < 1e-9);
        assert!(clock.now() >= 0.0);
    }
}
