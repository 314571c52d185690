use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use confique::Config;
use fasst::nmf::{initialize_with_nmf, NmfInit};
use fasst::{
    separate, Audio, CaponSteering, DirectivityConfig, GemConfig, Grouping, ModelConfig,
    SignalCovariance, StftConfig, TimeFrequencyTransform,
};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Separates a stereo wav file into one stereo wav file per source.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Stereo mixture.
    input: PathBuf,
    /// Directory receiving `source_<n>.wav`.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
    /// TOML file with `[gem]`, `[model]` and `[stft]` tables.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Overrides the number of sources.
    #[arg(short, long)]
    sources: Option<usize>,
    /// Overrides the number of GEM iterations.
    #[arg(short, long)]
    iterations: Option<usize>,
    /// IS-NMF iterations initializing the spectral components, skipped at 0.
    #[arg(long, default_value_t = 10)]
    nmf_iterations: usize,
    /// Seeds convolutive mixing from the peaks of the Capon directivity.
    #[arg(long)]
    capon: bool,
}

#[derive(Config)]
struct Settings {
    gem: Option<GemConfig>,
    model: Option<ModelConfig>,
    stft: Option<StftConfig>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::builder()
            .file(path)
            .load()
            .with_context(|| format!("loading {}", path.display()))?,
        None => Settings {
            gem: None,
            model: None,
            stft: None,
        },
    };
    let mut gem = settings.gem.unwrap_or_default();
    let mut model_config = settings.model.unwrap_or_default();
    if let Some(iterations) = args.iterations {
        gem.iterations = iterations;
    }
    if let Some(sources) = args.sources {
        model_config.sources = sources;
    }

    let audio = Audio::from_file(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    if audio.channels() != 2 {
        bail!("expected a stereo mixture, got {} channels", audio.channels());
    }
    let stft = settings.stft.unwrap_or_default().create()?;
    let x_ft = stft.forward(audio.data())?;
    let covariance = SignalCovariance::from_spectrogram(x_ft.view())?;
    info!(
        "{} samples at {} Hz, {} bins x {} frames",
        audio.samples(),
        audio.sample_rate(),
        covariance.bins(),
        covariance.frames()
    );

    let mut rng = ChaCha8Rng::seed_from_u64(gem.seed);
    let mut model = model_config.create(covariance.bins(), covariance.frames(), &mut rng)?;
    if args.capon {
        let steering = CaponSteering(DirectivityConfig {
            sample_rate: audio.sample_rate(),
            ..DirectivityConfig::default()
        });
        model.seed_convolutive(&steering, x_ft.view())?;
    }
    if args.nmf_iterations > 0 {
        initialize_with_nmf(
            &mut model,
            &covariance,
            NmfInit::Individual,
            args.nmf_iterations,
            gem.epsilon,
            &mut rng,
        )?;
    }

    let eps = gem.epsilon;
    let mut estimation = gem.create(model, &covariance)?;
    estimation.run()?;
    let (model, noise, loglik) = estimation.into_parts();
    if let Some(last) = loglik.last() {
        info!("final loglik {last}");
    }

    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let sources = separate(
        &model,
        &audio,
        &stft,
        noise.current(),
        &Grouping::BySpatial,
        eps,
    )?;
    for (n, source) in sources.iter().enumerate() {
        let path = args.output.join(format!("source_{n}.wav"));
        source
            .write(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("wrote {}", path.display());
    }
    Ok(())
}
