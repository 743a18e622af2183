use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use beat_matcher_core::{
    AppConfig, BeatId, BeatMatchError, BeatStatus, InstrumentTable, MatchDispatcher, Pattern,
    PatternDocument, PerformanceSummary, PlayAnalysisSession, SessionEvent, SoundId,
    TimedBeatId, Velocity,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> beat_matcher_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            pattern,
            config,
            drummer,
        } => run_simulate(&pattern, config.as_deref(), &drummer),
        Commands::Live {
            pattern,
            config,
            seconds,
            drummer,
        } => run_live(&pattern, config.as_deref(), seconds, &drummer),
    }
}

fn run_simulate(
    pattern_path: &Path,
    config_path: Option<&Path>,
    drummer: &DrummerArgs,
) -> beat_matcher_core::Result<()> {
    let config = load_config(config_path)?;
    let mut table = InstrumentTable::new();
    let pattern = load_pattern(pattern_path, &mut table)?;
    tracing::info!(?pattern_path, beats = pattern.len(), "running offline simulation");

    let summary = Arc::new(PerformanceSummary::new(&pattern));
    let dispatcher = MatchDispatcher::create(&pattern, config.matching, summary.clone())?;

    let hits = synthetic_hits(&pattern, drummer);
    let end = drummer.loops as f32 * pattern.length_in_beats()
        + 2.0 * config.matching.max_matching_time;
    let resolution = config.matching.max_matching_time / 4.0;

    let mut pending = hits.iter().peekable();
    let mut ordinal = 1;
    let mut step = 0u32;
    loop {
        let now = step as f32 * resolution;
        while let Some(hit) = pending.next_if(|hit| hit.time <= now) {
            let beat = TimedBeatId::new(hit.time, BeatId::played(ordinal)?);
            ordinal += 1;
            if dispatcher.contains(hit.sound.instrument()) {
                dispatcher.add_beat(hit.sound.instrument(), beat, hit.velocity)?;
            }
        }
        dispatcher.tick(now)?;
        if now > end {
            break;
        }
        step += 1;
    }

    print_reports(&pattern, &table, &summary)
}

fn run_live(
    pattern_path: &Path,
    config_path: Option<&Path>,
    seconds: u64,
    drummer: &DrummerArgs,
) -> beat_matcher_core::Result<()> {
    let config = load_config(config_path)?;
    let mut table = InstrumentTable::new();
    let pattern = load_pattern(pattern_path, &mut table)?;
    tracing::info!(?pattern_path, seconds, "starting live session");

    let hits = synthetic_hits(&pattern, drummer);
    let mut session = PlayAnalysisSession::new(pattern, config.matching, config.session.clone())?;
    session.start()?;

    let input = session.input();
    let done = Arc::new(AtomicBool::new(false));
    let drummer_done = done.clone();
    let drummer_thread = thread::spawn(move || {
        for hit in hits {
            if drummer_done.load(Ordering::SeqCst) {
                break;
            }
            let now = input.now();
            if hit.time > now {
                thread::sleep(input.clock().duration_of(hit.time - now));
            }
            if input.hit(hit.sound, hit.velocity).is_err() {
                break;
            }
        }
    });

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut statuses: HashMap<BeatStatus, u32> = HashMap::new();
    while Instant::now() < deadline {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match session.events().recv_timeout(timeout) {
            Ok(SessionEvent::StatusSet { id, status }) => {
                tracing::debug!(beat = id.value(), ?status, "beat status");
                *statuses.entry(status).or_default() += 1;
            }
            Ok(SessionEvent::NewPlayedBeat { beat, sound, .. }) => {
                tracing::debug!(
                    beat = beat.id.value(),
                    time = beat.time,
                    sound = table.sound_name(sound).unwrap_or_default(),
                    "played"
                );
            }
            Ok(SessionEvent::PatternMissed(beat)) => {
                tracing::debug!(beat = beat.id.value(), time = beat.time, "pattern beat missed");
            }
            Ok(SessionEvent::Tick(_)) => {}
            Err(_) => break,
        }
    }

    done.store(true, Ordering::SeqCst);
    session.stop();
    if drummer_thread.join().is_err() {
        tracing::error!("drummer thread panicked");
    }

    for (status, count) in &statuses {
        tracing::info!(?status, count, "status totals");
    }
    let summary = session.summary();
    print_reports(session.pattern(), &table, &summary)
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    time: f32,
    sound: SoundId,
    velocity: Velocity,
}

/// Plays the pattern `loops` times, nudging every other hit early or late by
/// `offset` beats and skipping every `skip_every`-th hit.
fn synthetic_hits(pattern: &Pattern, drummer: &DrummerArgs) -> Vec<Hit> {
    let info = pattern.info();
    let mut hits = Vec::new();
    let mut index = 0usize;
    for pass in 0..drummer.loops {
        let pass_offset = pass as f32 * pattern.length_in_beats();
        for beat in pattern.beats() {
            index += 1;
            if drummer.skip_every > 0 && index % drummer.skip_every == 0 {
                continue;
            }
            let nudge = if index % 2 == 0 {
                drummer.offset
            } else {
                -drummer.offset
            };
            hits.push(Hit {
                time: (info.time_in_beats(beat.time) + pass_offset + nudge).max(0.0),
                sound: beat.sound,
                velocity: beat.velocity,
            });
        }
    }
    hits.sort_by(|a, b| a.time.total_cmp(&b.time));
    hits
}

fn load_config(path: Option<&Path>) -> beat_matcher_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_json_file(path),
        None => Ok(AppConfig::default()),
    }
}

fn load_pattern(path: &Path, table: &mut InstrumentTable) -> beat_matcher_core::Result<Pattern> {
    let json = std::fs::read_to_string(path)?;
    let pattern = PatternDocument::from_json_str(&json)?.into_pattern(table)?;
    if pattern.is_empty() {
        return Err(BeatMatchError::msg(format!(
            "pattern `{}` has no beats",
            path.display()
        )));
    }
    Ok(pattern)
}

fn print_reports(
    pattern: &Pattern,
    table: &InstrumentTable,
    summary: &PerformanceSummary,
) -> beat_matcher_core::Result<()> {
    println!(
        "{:>5}  {:<16} {:>8} {:>6} {:>6} {:>6} {:>8} {:>6}",
        "beat", "sound", "attempts", "miss", "early", "late", "average", "value"
    );
    for report in summary.reports()? {
        let beat = pattern.beat(report.id)?;
        println!(
            "{:>5}  {:<16} {:>8} {:>6} {:>6} {:>6} {:>8} {:>6}",
            report.id,
            table.sound_name(beat.sound).unwrap_or_default(),
            report.attempts,
            ratio(report.miss),
            ratio(report.early),
            ratio(report.late),
            ratio(report.average),
            ratio(report.value),
        );
    }
    println!("overall: {}", ratio(summary.overall()?));
    Ok(())
}

fn ratio(value: Option<f64>) -> String {
    value
        .map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drum pattern practice matcher", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a synthetic drummer against the pattern on a simulated clock.
    Simulate {
        /// Pattern document (JSON).
        #[arg(short, long)]
        pattern: PathBuf,
        /// Optional configuration file (JSON).
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        drummer: DrummerArgs,
    },
    /// Run the real-time session loop with a synthetic drummer thread.
    Live {
        /// Pattern document (JSON).
        #[arg(short, long)]
        pattern: PathBuf,
        /// Optional configuration file (JSON).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// How long to keep the session running.
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
        #[command(flatten)]
        drummer: DrummerArgs,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct DrummerArgs {
    /// Number of pattern passes the drummer plays.
    #[arg(long, default_value_t = 4)]
    loops: u32,
    /// Timing error, in beats, alternately applied early and late.
    #[arg(long, default_value_t = 0.05, allow_hyphen_values = true)]
    offset: f32,
    /// Skip every n-th hit; 0 plays everything.
    #[arg(long, default_value_t = 0)]
    skip_every: usize,
}
