use std::{
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use spectra_core::{
    analyse_reader, AppConfig, AudioSource, FileIngest, LiveCapture, WavFrameReader,
};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cpal")]
mod device;
#[cfg(not(feature = "cpal"))]
mod sim;

const TICK: Duration = Duration::from_micros(16_667);
const STATUS_EVERY: Duration = Duration::from_secs(1);

fn main() -> spectra_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Live { seconds } => run_live(&config, seconds),
        Commands::Play { input, seconds } => run_play(&config, &input, seconds),
        Commands::Analyse { input, output } => run_analyse(&config, &input, &output),
    }
}

fn run_live(config: &AppConfig, seconds: Option<f32>) -> spectra_core::Result<()> {
    tracing::info!(?seconds, "starting live mode");

    #[cfg(feature = "cpal")]
    let backend = device::CpalCapture::default();
    #[cfg(not(feature = "cpal"))]
    let backend = sim::SignalGenerator::default();

    let mut source = LiveCapture::new(config.analysis.clone(), backend)?;
    source.start()?;
    let result = drive(&mut source, config, seconds, |_| false);
    source.stop();
    result
}

fn run_play(config: &AppConfig, input: &Path, seconds: Option<f32>) -> spectra_core::Result<()> {
    tracing::info!(?input, ?seconds, "starting file playback");

    #[cfg(feature = "cpal")]
    let sink = device::CpalOutput::default();
    #[cfg(not(feature = "cpal"))]
    let sink = sim::PacedOutput::new(config.playback.output_latency());

    let mut source = FileIngest::new(config, sink)?;
    source.load_path(input, true)?;
    let result = drive(&mut source, config, seconds, |source| {
        let ended = source.consume_track_ended();
        if ended {
            tracing::info!(track = ?source.track_name(), "track ended");
        }
        ended
    });
    source.stop();
    result
}

fn run_analyse(config: &AppConfig, input: &Path, output: &Path) -> spectra_core::Result<()> {
    tracing::info!(?input, ?output, "running offline analysis");
    let mut reader = WavFrameReader::open(input)?;
    let summary = analyse_reader(&mut reader, &config.analysis)?;
    summary.write_json(output)?;
    tracing::info!(tempo = ?summary.tempo_bpm, beats = summary.beats.len(), "analysis written");
    Ok(())
}

/// Runs the update loop at roughly 60 Hz until `seconds` elapse or `done`
/// reports the source has nothing left to show.
fn drive<S: AudioSource>(
    source: &mut S,
    config: &AppConfig,
    seconds: Option<f32>,
    mut done: impl FnMut(&mut S) -> bool,
) -> spectra_core::Result<()> {
    let analysis = &config.analysis;
    let mut bars = vec![0.0_f32; analysis.bars_count];
    let mut wave = vec![0.0_f32; analysis.waveform_length];
    let mut left = vec![0.0_f32; analysis.waveform_length];
    let mut right = vec![0.0_f32; analysis.waveform_length];

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs_f32(s.max(0.0)));
    let mut last = Instant::now();
    let mut last_status = last;
    let mut beats = 0_usize;
    let mut strongest = 0.0_f32;

    loop {
        thread::sleep(TICK);
        let now = Instant::now();
        source.update((now - last).as_secs_f32());
        last = now;

        source.copy_bars(&mut bars)?;
        source.copy_waveform(&mut wave)?;
        source.copy_stereo(&mut left, &mut right)?;
        while let Some(beat) = source.try_dequeue_beat() {
            beats += 1;
            strongest = strongest.max(beat.strength);
        }

        if now - last_status >= STATUS_EVERY {
            last_status = now;
            let (loudest, level) = bars
                .iter()
                .copied()
                .enumerate()
                .fold((0, 0.0_f32), |best, (bar, value)| {
                    if value > best.1 {
                        (bar, value)
                    } else {
                        best
                    }
                });
            let peak = wave.iter().fold(0.0_f32, |peak, sample| peak.max(sample.abs()));
            let balance = rms(&left) - rms(&right);
            tracing::info!(
                bpm = source.bpm_smoothed(),
                loudest_bar = loudest,
                level,
                peak,
                balance,
                beats,
                strongest,
                "status"
            );
            beats = 0;
            strongest = 0.0;
        }

        if done(source) || deadline.map(|at| now >= at).unwrap_or(false) {
            return Ok(());
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time audio feature extraction for visualisers", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyse live capture and log the extracted features.
    Live {
        /// Stop after this many seconds instead of running until killed.
        #[arg(short, long)]
        seconds: Option<f32>,
    },
    /// Play a WAV file and log the features of what is audible.
    Play {
        /// Path to the WAV file to play.
        input: PathBuf,
        /// Stop after this many seconds instead of at the end of the track.
        #[arg(short, long)]
        seconds: Option<f32>,
    },
    /// Analyse a WAV file ahead of time and persist the results.
    Analyse {
        /// Path to the WAV file that should be analysed.
        input: PathBuf,
        /// Output path for the generated JSON summary.
        output: PathBuf,
    },
}
