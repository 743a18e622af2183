use std::sync::Arc;

use approx::assert_relative_eq;
use beat_matcher_core::{
    BeatId, InstrumentTable, MatchDispatcher, MatchSettings, Pattern, PatternDocument,
    PatternInfo, PerformanceSummary, SoundId, TimeInUnits, TimedBeatId, Velocity,
};

// KICK x---x---
// SNR  --x---x-
fn rock_pattern(table: &mut InstrumentTable) -> (Pattern, SoundId, SoundId) {
    let kick = table.sound("kick", "hit").unwrap();
    let snare = table.sound("snare", "hit").unwrap();
    let info = PatternInfo::builder()
        .bars_count(1)
        .beats_per_bar(4)
        .units_per_beat(TimeInUnits(2))
        .suggested_bpm(90)
        .build()
        .unwrap();

    let mut builder = Pattern::builder().info(info);
    builder.add(TimeInUnits(0), kick, Velocity::LOUD).unwrap();
    builder.add(TimeInUnits(2), snare, Velocity::MEDIUM).unwrap();
    builder.add(TimeInUnits(4), kick, Velocity::LOUD).unwrap();
    builder.add(TimeInUnits(6), snare, Velocity::MEDIUM).unwrap();
    (builder.build().unwrap(), kick, snare)
}

#[test]
fn two_loops_feed_the_performance_summary() {
    let mut table = InstrumentTable::new();
    let (pattern, kick, snare) = rock_pattern(&mut table);
    let summary = Arc::new(PerformanceSummary::new(&pattern));
    let dispatcher = MatchDispatcher::create(
        &pattern,
        MatchSettings {
            max_matching_time: 0.25,
        },
        summary.clone(),
    )
    .unwrap();

    // First pass: late kick, early snare, clean kick, snare on beat 3 skipped.
    // Second pass: everything on time.
    let hits = [
        (0.1, kick),
        (0.9, snare),
        (2.0, kick),
        (4.0, kick),
        (5.0, snare),
        (6.0, kick),
        (7.0, snare),
    ];

    let mut next_hit = 0;
    let mut ordinal = 1;
    for step in 0..=150 {
        let now = step as f32 * 0.05;
        while let Some((time, sound)) = hits.get(next_hit).copied() {
            if time > now + 1e-4 {
                break;
            }
            let beat = TimedBeatId::new(time, BeatId::played(ordinal).unwrap());
            dispatcher
                .add_beat(sound.instrument(), beat, Velocity::MEDIUM)
                .unwrap();
            ordinal += 1;
            next_hit += 1;
        }
        dispatcher.tick(now).unwrap();
    }
    assert_eq!(next_hit, hits.len());

    let window = 1.01 * 0.25;
    let first_kick = summary.beat_summary(BeatId::pattern(0)).unwrap();
    assert_eq!(first_kick.attempts, 2);
    assert_eq!(first_kick.late, Some(0.5));
    assert_relative_eq!(first_kick.average.unwrap(), 0.05 / window, epsilon = 1e-5);
    assert_relative_eq!(
        first_kick.value.unwrap(),
        (2.0 - 0.1 / window) / 2.0,
        epsilon = 1e-5
    );

    let first_snare = summary.beat_summary(BeatId::pattern(1)).unwrap();
    assert_eq!(first_snare.early, Some(0.5));
    assert_eq!(first_snare.miss, Some(0.0));

    let second_kick = summary.beat_summary(BeatId::pattern(2)).unwrap();
    assert_eq!(second_kick.attempts, 2);
    assert_relative_eq!(second_kick.value.unwrap(), 1.0, epsilon = 1e-6);

    let second_snare = summary.beat_summary(BeatId::pattern(3)).unwrap();
    assert_eq!(second_snare.attempts, 2);
    assert_eq!(second_snare.miss, Some(0.5));
    assert_relative_eq!(second_snare.average.unwrap(), 0.0, epsilon = 1e-6);
    assert_relative_eq!(second_snare.value.unwrap(), 0.5, epsilon = 1e-6);

    for instrument in dispatcher.instruments() {
        let matcher = dispatcher.matcher(instrument).unwrap();
        assert_eq!(matcher.pending_played().unwrap(), 0);
        assert_eq!(matcher.pattern_offset().unwrap(), 4.0);
    }
}

#[test]
fn missing_every_hit_only_counts_misses() {
    let mut table = InstrumentTable::new();
    let (pattern, _, _) = rock_pattern(&mut table);
    let summary = Arc::new(PerformanceSummary::new(&pattern));
    let dispatcher =
        MatchDispatcher::create(&pattern, MatchSettings::default(), summary.clone()).unwrap();

    for step in 0..=40 {
        dispatcher.tick(step as f32 * 0.25).unwrap();
    }

    for report in summary.reports().unwrap() {
        assert!(report.attempts >= 2, "beat {} attempted {}", report.id, report.attempts);
        assert_eq!(report.miss, Some(1.0));
        assert_eq!(report.value, Some(0.0));
        assert_eq!(report.average, None);
    }
    assert_eq!(summary.overall().unwrap(), Some(0.0));
}

#[test]
fn bundled_rock_pattern_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../patterns/rock.json");
    let json = std::fs::read_to_string(path).unwrap();

    let mut table = InstrumentTable::new();
    let pattern = PatternDocument::from_json_str(&json)
        .unwrap()
        .into_pattern(&mut table)
        .unwrap();

    assert_eq!(pattern.len(), 13);
    assert_eq!(pattern.instruments().len(), 3);
    assert_eq!(pattern.length_in_beats(), 4.0);

    let kick = table.find_instrument("KICK").unwrap();
    let kicks = &pattern.beats_by_instrument()[&kick];
    let times: Vec<f32> = kicks.iter().map(|beat| beat.time).collect();
    assert_eq!(times, vec![0.0, 2.0, 2.5]);
}
