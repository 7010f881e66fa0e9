use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use layerdeck_core::assets::{decode_wav, load_preset_directory};
use layerdeck_core::{
    AppConfig, AudioSource, Compositor, CompositorError, MediaFile, MilkTextConverter,
    PresetBank, LAYER_COUNT,
};
use tracing_subscriber::EnvFilter;

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> layerdeck_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };

    match cli.command {
        Commands::Live {
            files,
            presets,
            bank_layer,
            audio,
            open_output,
            frames,
            snapshot,
        } => run_live(
            config,
            LiveOptions {
                files,
                presets,
                bank_layer,
                audio,
                open_output,
                frames,
                snapshot,
            },
        ),
        Commands::Inspect { files } => run_inspect(config, &files),
    }
}

struct LiveOptions {
    files: Vec<PathBuf>,
    presets: Option<PathBuf>,
    bank_layer: Option<usize>,
    audio: Option<PathBuf>,
    open_output: bool,
    frames: u64,
    snapshot: Option<PathBuf>,
}

fn run_live(config: AppConfig, options: LiveOptions) -> layerdeck_core::Result<()> {
    tracing::info!(frames = options.frames, files = options.files.len(), "starting live mode");

    let bank = match &options.presets {
        Some(dir) => spawn_preset_bank(dir.clone()),
        None => PresetBank::unavailable(),
    };
    let refresh_hz = config.output.refresh_hz;
    let mut compositor = Compositor::new(config)?.with_preset_bank(bank);
    request_files(&mut compositor, &options.files)?;

    let mut feed = None;
    if let Some(path) = &options.audio {
        let (samples, rate) = decode_wav(path)?;
        let audio = &compositor.config().audio;
        if rate != audio.sample_rate {
            tracing::warn!(
                rate,
                expected = audio.sample_rate,
                "audio file sample rate differs from config"
            );
        }
        let per_frame = (audio.sample_rate / refresh_hz) as usize;
        feed = Some(AudioFeed::new(samples, per_frame, audio.block_size));
        compositor.request_audio_source(AudioSource::File { path: path.clone() });
    }

    if options.open_output {
        compositor.request_output_display_open()?;
    }

    let mut bank_pending = match options.bank_layer {
        Some(layer) if layer >= LAYER_COUNT => return Err(CompositorError::UnknownLayer(layer)),
        Some(layer) if options.presets.is_none() => {
            tracing::warn!(layer, "--bank-layer needs --presets; ignoring");
            None
        }
        other => other,
    };
    compositor.run(options.frames, |compositor, _stats| {
        if let Some(layer) = bank_pending {
            if compositor.preset_bank_ready() {
                // Failures are reported as notifications below.
                let _ = compositor.request_preset_bank(layer);
                bank_pending = None;
            }
        }
        if let Some(feed) = feed.as_mut() {
            feed.advance(|block| {
                if let Err(err) = compositor.push_audio(block) {
                    tracing::debug!(%err, "skipped audio block");
                }
            });
        }
        for note in compositor.drain_notifications() {
            tracing::warn!(
                layer = ?note.layer,
                kind = ?note.kind,
                transient = note.transient,
                "{}",
                note.message
            );
        }
    });

    if let Some(path) = &options.snapshot {
        match compositor.output_composite() {
            Some(surface) => {
                surface.save_png(path)?;
                tracing::info!(path = %path.display(), "saved output snapshot");
            }
            None => tracing::warn!("output display is closed; no snapshot written"),
        }
    }
    Ok(())
}

/// Loops decoded samples, handing one frame's worth per tick to the router
/// in blocks of the configured size.
struct AudioFeed {
    samples: Vec<f32>,
    cursor: usize,
    per_frame: usize,
    block_size: usize,
}

impl AudioFeed {
    fn new(samples: Vec<f32>, per_frame: usize, block_size: usize) -> Self {
        Self {
            samples,
            cursor: 0,
            per_frame: per_frame.max(1),
            block_size: block_size.max(2),
        }
    }

    fn advance(&mut self, mut push: impl FnMut(&[f32])) {
        if self.samples.is_empty() {
            return;
        }
        let mut remaining = self.per_frame;
        while remaining > 0 {
            let len = remaining.min(self.block_size).min(self.samples.len() - self.cursor);
            push(&self.samples[self.cursor..self.cursor + len]);
            remaining -= len;
            self.cursor += len;
            if self.cursor == self.samples.len() {
                self.cursor = 0;
            }
        }
    }
}

fn run_inspect(config: AppConfig, files: &[PathBuf]) -> layerdeck_core::Result<()> {
    let mut compositor = Compositor::new(config)?;
    request_files(&mut compositor, files)?;
    if !compositor.wait_for_loads(LOAD_TIMEOUT) {
        tracing::warn!(pending = compositor.pending_loads(), "timed out waiting for loads");
    }

    let report = serde_json::json!({
        "layers": compositor.layer_views(),
        "notifications": compositor.drain_notifications(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn request_files(compositor: &mut Compositor, files: &[PathBuf]) -> layerdeck_core::Result<()> {
    if files.len() > LAYER_COUNT {
        tracing::warn!(ignored = files.len() - LAYER_COUNT, "more files than layers");
    }
    for (layer, path) in files.iter().take(LAYER_COUNT).enumerate() {
        let file = MediaFile::from_path(path)?;
        if let Err(err) = compositor.request_file(layer, file) {
            tracing::warn!(layer, path = %path.display(), %err, "file refused");
        }
    }
    Ok(())
}

/// Loads the preset directory on a worker thread; the bank becomes ready
/// whenever that finishes.
fn spawn_preset_bank(dir: PathBuf) -> PresetBank {
    let (sender, bank) = PresetBank::pending();
    thread::spawn(move || match load_preset_directory(Path::new(&dir), &MilkTextConverter) {
        Ok(presets) => {
            sender.publish(presets);
        }
        Err(err) => tracing::warn!(dir = %dir.display(), %err, "could not load preset bank"),
    });
    bank
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Four-layer live visual compositor", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the render loop with content on each layer.
    Live {
        /// Content files, assigned to layers 0.. in order.
        files: Vec<PathBuf>,
        /// Directory of .json/.milk presets used as the shared bank.
        #[arg(short, long)]
        presets: Option<PathBuf>,
        /// Layer that receives a random bank preset once the bank is ready.
        #[arg(long)]
        bank_layer: Option<usize>,
        /// WAV file driving audio-reactive layers.
        #[arg(short, long)]
        audio: Option<PathBuf>,
        /// Mirror every layer to the external output.
        #[arg(long)]
        open_output: bool,
        /// Number of frames to render before exiting.
        #[arg(short, long, default_value_t = 300)]
        frames: u64,
        /// Write the final output composite as PNG.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Load files and print the resulting layer state as JSON.
    Inspect {
        files: Vec<PathBuf>,
    },
}
