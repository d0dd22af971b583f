use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use guitar_trainer::analysis::classifier::standard_catalogue;
use guitar_trainer::audio::fixture::synthesize_chord;
use guitar_trainer::audio::{
    CaptureBackend, CpalCaptureBackend, FixtureCaptureBackend, FIXTURE_SAMPLE_RATE,
};
use guitar_trainer::timeline::{chord_shape, shapes::shape_positions};
use guitar_trainer::{
    init_logging, AppConfig, ChordEvent, Difficulty, Lifecycle, RecognitionMode, Session,
    SessionOptions,
};
use serde::{Deserialize, Serialize};

/// Frame period of the tick loop (~60 Hz)
const TICK_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(
    name = "chord_session",
    about = "Run chord practice sessions against fixtures or the microphone"
)]
struct Cli {
    /// JSON configuration file (defaults are used when missing)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Judge a timeline against a WAV file, or against audio synthesized from the timeline
    Replay {
        #[arg(long)]
        timeline: PathBuf,
        #[arg(long)]
        wav: Option<PathBuf>,
        /// Override the timeline's difficulty
        #[arg(long)]
        difficulty: Option<Difficulty>,
        /// Write verdicts as JSON lines here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Judge a timeline against the default microphone
    Live {
        #[arg(long)]
        timeline: PathBuf,
        #[arg(long)]
        difficulty: Option<Difficulty>,
        /// Never use the remote recognizer
        #[arg(long)]
        local_only: bool,
    },
    /// List the chords the local classifier knows
    Chords,
    /// Write a synthesized chord to a WAV file
    Synth {
        #[arg(long)]
        chord: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 2000)]
        duration_ms: u64,
    },
}

/// Timeline file supplied by song selection
#[derive(Debug, Deserialize)]
struct TimelineFile {
    #[serde(default)]
    difficulty: Option<Difficulty>,
    events: Vec<ChordEvent>,
}

#[derive(Debug, Serialize)]
struct ChordListing {
    label: String,
    pitch_classes: Vec<usize>,
    required_strings: Vec<u8>,
}

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .as_deref()
        .map(AppConfig::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::Replay {
            timeline,
            wav,
            difficulty,
            output,
        } => run_replay(config, &timeline, wav, difficulty, output),
        Commands::Live {
            timeline,
            difficulty,
            local_only,
        } => run_live(config, &timeline, difficulty, local_only),
        Commands::Chords => run_chords(),
        Commands::Synth {
            chord,
            out,
            duration_ms,
        } => run_synth(&chord, &out, duration_ms),
    }
}

fn run_replay(
    config: AppConfig,
    timeline_path: &Path,
    wav: Option<PathBuf>,
    difficulty: Option<Difficulty>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let (events, options) = load_timeline(timeline_path, &config, difficulty)?;
    let backend = match wav {
        Some(path) => FixtureCaptureBackend::from_wav(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FixtureCaptureBackend::from_samples(
            "synthesized-timeline",
            render_timeline(&events)?,
            FIXTURE_SAMPLE_RATE,
        ),
    };

    let lines = drive_session(Box::new(backend), config, events, options)?;
    match output {
        Some(path) => fs::write(&path, lines.join("\n") + "\n")
            .with_context(|| format!("writing verdicts to {}", path.display()))?,
        None => lines.iter().for_each(|line| println!("{line}")),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_live(
    config: AppConfig,
    timeline_path: &Path,
    difficulty: Option<Difficulty>,
    local_only: bool,
) -> Result<ExitCode> {
    let (events, mut options) = load_timeline(timeline_path, &config, difficulty)?;
    if local_only {
        options.recognition_mode = RecognitionMode::Local;
    }

    let lines = drive_session(Box::new(CpalCaptureBackend::new()), config, events, options)?;
    lines.iter().for_each(|line| println!("{line}"));
    Ok(ExitCode::SUCCESS)
}

/// Tick a session until the timeline is exhausted; returns the verdicts and
/// the final state as JSON lines
fn drive_session(
    backend: Box<dyn CaptureBackend>,
    config: AppConfig,
    events: Vec<ChordEvent>,
    options: SessionOptions,
) -> Result<Vec<String>> {
    let mut session = Session::new(backend, config);
    guitar_trainer::http::spawn_if_enabled(session.broadcasts());
    session.start(events, options).context("starting session")?;

    let mut reported = 0;
    let mut lines = Vec::new();
    loop {
        let published = session.tick();
        for verdict in &session.verdicts()[reported..] {
            eprintln!(
                "[chord_session] event {} -> {:?} ({:+}ms)",
                verdict.chord_event_id, verdict.outcome, verdict.timing_delta_ms
            );
            lines.push(serde_json::to_string(verdict)?);
        }
        reported = session.verdicts().len();

        if published.lifecycle == Lifecycle::Stopped {
            break;
        }
        thread::sleep(TICK_INTERVAL);
    }

    let final_state = session.stop();
    lines.push(serde_json::to_string(&final_state)?);
    Ok(lines)
}

fn load_timeline(
    path: &Path,
    config: &AppConfig,
    difficulty: Option<Difficulty>,
) -> Result<(Vec<ChordEvent>, SessionOptions)> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: TimelineFile =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let mut events = file.events;
    for event in &mut events {
        event.fill_shape();
    }

    let mut options = config.session.clone();
    if let Some(difficulty) = difficulty.or(file.difficulty) {
        options.difficulty = difficulty;
    }
    Ok((events, options))
}

/// Audio that plays every event's chord over its span, silence in between
fn render_timeline(events: &[ChordEvent]) -> Result<Vec<f32>> {
    let sample_index = |ms: u64| (ms * FIXTURE_SAMPLE_RATE as u64 / 1000) as usize;
    let end_ms = events.iter().map(ChordEvent::end_ms).max().unwrap_or(0);
    let mut samples = vec![0.0_f32; sample_index(end_ms)];

    for event in events {
        let chord = synthesize_chord(&event.chord_label, FIXTURE_SAMPLE_RATE, event.duration_ms, 0.5)
            .with_context(|| format!("synthesizing event {}", event.id))?;
        let offset = sample_index(event.start_offset_ms).min(samples.len());
        for (slot, sample) in samples[offset..].iter_mut().zip(chord) {
            *slot = sample;
        }
    }
    Ok(samples)
}

fn run_chords() -> Result<ExitCode> {
    for template in standard_catalogue() {
        let required_strings = chord_shape(&template.label)
            .map(|shape| shape_positions(shape).0.into_iter().collect())
            .unwrap_or_default();
        let listing = ChordListing {
            pitch_classes: template.pitch_classes(),
            label: template.label,
            required_strings,
        };
        println!("{}", serde_json::to_string(&listing)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_synth(chord: &str, out: &Path, duration_ms: u64) -> Result<ExitCode> {
    if duration_ms == 0 {
        bail!("duration must be positive");
    }
    let samples = synthesize_chord(chord, FIXTURE_SAMPLE_RATE, duration_ms, 0.5)
        .with_context(|| format!("synthesizing {chord}"))?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FIXTURE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(out, spec)
        .with_context(|| format!("creating {}", out.display()))?;
    for sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;

    eprintln!("Wrote {} ({}ms of {})", out.display(), duration_ms, chord);
    Ok(ExitCode::SUCCESS)
}
