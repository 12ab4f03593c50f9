use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use binaural_engine::config::secs_to_duration;
use binaural_engine::engine::{AudioBackend, DesktopStubBackend};
use binaural_engine::{
    breath_target, recommended_band, Band, BinauralEngine, BreathPhase, EngineConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "binaural_cli",
    about = "Diagnostic harness for the binaural entrainment engine"
)]
struct Cli {
    /// Engine configuration JSON (defaults to assets/binaural_config.json)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the band registry as JSON
    Bands,
    /// Print the band recommended for an arousal target in [0, 1]
    Recommend {
        #[arg(long)]
        arousal: f32,
    },
    /// Print the band and ramp a breath phase maps to
    Breath {
        #[arg(long)]
        phase: BreathPhase,
        #[arg(long, default_value_t = 0.5)]
        arousal: f32,
    },
    /// Run a scripted session and stream telemetry events as JSON lines
    Session {
        #[arg(long, value_enum, default_value_t = BackendChoice::Stub)]
        backend: BackendChoice,
        /// Starting band (defaults to the configured initial band)
        #[arg(long)]
        band: Option<Band>,
        #[arg(long, default_value_t = 0.5)]
        arousal: f32,
        /// Seconds spent in each breath phase
        #[arg(long, default_value_t = 4.0)]
        phase_secs: f32,
        /// Number of inhale/hold/exhale cycles
        #[arg(long, default_value_t = 1)]
        cycles: u32,
        #[arg(long, default_value_t = 0.8)]
        volume: f32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendChoice {
    Stub,
    Cpal,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

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
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path),
        None => EngineConfig::load(),
    };

    match cli.command {
        Commands::Bands => run_bands(),
        Commands::Recommend { arousal } => {
            println!("{}", recommended_band(arousal));
            Ok(ExitCode::from(0))
        }
        Commands::Breath { phase, arousal } => {
            let target = breath_target(phase, arousal);
            println!("{}", serde_json::to_string(&target)?);
            Ok(ExitCode::from(0))
        }
        Commands::Session {
            backend,
            band,
            arousal,
            phase_secs,
            cycles,
            volume,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            let script = SessionScript {
                band,
                arousal,
                phase: secs_to_duration(phase_secs),
                cycles,
                volume,
            };
            runtime.block_on(run_session(config, backend, script))
        }
    }
}

fn run_bands() -> Result<ExitCode> {
    let registry: serde_json::Map<String, serde_json::Value> = Band::ALL
        .iter()
        .map(|band| Ok((band.to_string(), serde_json::to_value(band.config())?)))
        .collect::<Result<_>>()?;
    println!("{}", serde_json::to_string_pretty(&registry)?);
    Ok(ExitCode::from(0))
}

struct SessionScript {
    band: Option<Band>,
    arousal: f32,
    phase: Duration,
    cycles: u32,
    volume: f32,
}

fn make_backend(choice: BackendChoice) -> Result<Arc<dyn AudioBackend>> {
    match choice {
        BackendChoice::Stub => Ok(Arc::new(DesktopStubBackend::new())),
        BackendChoice::Cpal => cpal_backend(),
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "cpal-backend")] {
        fn cpal_backend() -> Result<Arc<dyn AudioBackend>> {
            Ok(Arc::new(binaural_engine::engine::CpalBackend::new()))
        }
    } else {
        fn cpal_backend() -> Result<Arc<dyn AudioBackend>> {
            anyhow::bail!("built without the `cpal-backend` feature")
        }
    }
}

async fn run_session(
    config: EngineConfig,
    choice: BackendChoice,
    script: SessionScript,
) -> Result<ExitCode> {
    let backend = make_backend(choice)?;
    let engine = BinauralEngine::with_config(backend, config);

    let mut events = engine.telemetry_stream();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => tracing::warn!("[binaural_cli] Unserialisable event: {}", err),
                },
                Err(err) => tracing::warn!("[binaural_cli] Telemetry lagged: {}", err),
            }
        }
    });

    let interrupted = tokio::select! {
        result = scripted_session(&engine, &script) => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[binaural_cli] Interrupted, stopping session");
            true
        }
    };

    if interrupted && engine.is_running() {
        engine.stop_with_fade(Duration::ZERO);
    }
    engine.dispose();
    drop(engine);

    // The stream ends once the engine's collector is dropped.
    let _ = tokio::time::timeout(Duration::from_millis(500), printer).await;

    Ok(ExitCode::from(if interrupted { 130 } else { 0 }))
}

async fn scripted_session(engine: &BinauralEngine, script: &SessionScript) -> Result<()> {
    let band = script
        .band
        .unwrap_or(engine.session_config().initial_band);

    engine.initialize();
    engine.set_volume(script.volume);
    engine
        .start(band)
        .await
        .with_context(|| format!("starting session in {band}"))?;
    tokio::time::sleep(engine.session_config().fade_in()).await;

    for _ in 0..script.cycles {
        for phase in [BreathPhase::Inhale, BreathPhase::Hold, BreathPhase::Exhale] {
            if let Some(target) = engine.on_breath_phase(phase, script.arousal) {
                tracing::info!(
                    "[binaural_cli] {} -> {} over {:?}",
                    phase,
                    target.band,
                    target.transition
                );
            }
            tokio::time::sleep(script.phase).await;
        }
    }

    engine.stop();
    tokio::time::sleep(engine.session_config().fade_out() + Duration::from_millis(50)).await;
    Ok(())
}
