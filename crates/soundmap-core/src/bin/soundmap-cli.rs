use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use soundmap_core::{
    EngineConfig, EngineKind, SoundmapConfig, create_engine, create_engine_with_fallback,
    diagnostics::init_tracing_from_config,
    fixtures::demo_scenario,
    generate_parity_report,
    parity::{render_scenario, write_parity_report},
    recorder::{RecordingSink, WavRecorder},
};

#[derive(Debug, Parser)]
#[command(name = "soundmap-cli")]
#[command(about = "Headless render, engine parity and diagnostics tools for soundmap")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file; defaults to the usual lookup order.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Renders the demo scenario through the mixer into a WAV file, using the
    /// configured sample rate, master volume and envelope preset.
    Render {
        #[arg(long, default_value = "data/renders/demo.wav")]
        output: PathBuf,

        /// Overrides the configured engine (sequential, parallel or gpu).
        #[arg(long)]
        engine: Option<EngineKind>,
    },
    /// Renders the demo scenario through every available engine and compares them.
    ParityReport {
        #[arg(long, default_value = "data/parity/report.json")]
        output: PathBuf,
    },
    /// Lists the engines and whether they can be created here.
    Engines,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SoundmapConfig::from_path(path)?,
        None => SoundmapConfig::load_or_default()?,
    };
    if let Some(log_dir) = cli.log_dir {
        config.diagnostics.log_dir = log_dir;
    }
    let _telemetry = init_tracing_from_config(&config.diagnostics)?;

    match cli.command {
        Commands::Render { output, engine } => {
            let engine_config = EngineConfig {
                kind: engine.unwrap_or(config.engine.kind),
                ..config.engine.clone()
            };
            let engine = create_engine_with_fallback(&engine_config)
                .context("failed to create render engine")?;
            let engine_name = engine.name();

            let scenario = config.apply_to_scenario(demo_scenario());
            let samples = render_scenario(&scenario, engine)?;

            let recorder =
                WavRecorder::create(&output, scenario.format, config.recording.queue_blocks)
                    .with_context(|| format!("failed to create {}", output.display()))?;
            recorder.write_block(&samples);
            let summary = recorder.finish().context("failed to finish recording")?;
            tracing::info!(
                path = %summary.path.display(),
                engine = engine_name,
                samples = summary.samples_written,
                "demo render written"
            );
        }
        Commands::ParityReport { output } => {
            let scenario = config.apply_to_scenario(demo_scenario());
            let report = generate_parity_report(&scenario, &config.engine)?;
            write_parity_report(&output, &report)?;
            tracing::info!(
                path = %output.display(),
                max_abs_diff = report.max_abs_diff,
                "parity report generated"
            );
        }
        Commands::Engines => {
            for kind in EngineKind::ALL {
                if !kind.is_compiled() {
                    println!("{:<12} {:<14} not compiled in", kind.id(), kind.display_name());
                    continue;
                }
                let status = match create_engine(&EngineConfig {
                    kind,
                    ..config.engine.clone()
                }) {
                    Ok(_) => "available".to_string(),
                    Err(error) => format!("unavailable ({error})"),
                };
                println!("{:<12} {:<14} {status}", kind.id(), kind.display_name());
            }
        }
    }

    Ok(())
}
