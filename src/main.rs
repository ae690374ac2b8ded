use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use streaming_videos::{
    CbcSolver, Instance, Placement, SolverSettings, build_model, solve_model, write_placement,
};

#[derive(Parser, Debug)]
#[command(
    name = "streaming-videos",
    about = "Decide which videos to store in which cache servers",
    version
)]
struct Cli {
    /// Path to the instance file.
    instance: PathBuf,

    /// Where to write the placement.
    #[arg(short, long, default_value = "videos.out")]
    output: PathBuf,

    /// Also write the integer program in MPS format (CBC adds a `.mps` extension).
    #[arg(long)]
    model: Option<PathBuf>,

    /// YAML file with solver settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relative optimality gap, overrides the settings file.
    #[arg(long)]
    mip_gap: Option<f64>,

    /// Time budget in seconds, overrides the settings file.
    #[arg(long)]
    time_limit: Option<f64>,

    /// Show the solver's own log.
    #[arg(long)]
    solver_log: bool,

    /// Check and score an existing placement file instead of solving.
    #[arg(long, value_name = "PLACEMENT")]
    evaluate: Option<PathBuf>,

    /// Increase logging verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn settings(&self) -> Result<SolverSettings> {
        let mut settings = match &self.config {
            Some(path) => SolverSettings::from_path(path)?,
            None => SolverSettings::default(),
        };
        if let Some(gap) = self.mip_gap {
            settings.mip_gap = gap;
        }
        if let Some(seconds) = self.time_limit {
            settings.time_limit = seconds;
        }
        settings.verbose |= self.solver_log;
        if let Err(reason) = settings.validate() {
            bail!("invalid solver settings: {reason}");
        }
        Ok(settings)
    }
}

fn set_up_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    set_up_logging(cli.verbose);

    let instance = Instance::from_path(&cli.instance)
        .with_context(|| format!("failed to load {}", cli.instance.display()))?;

    if let Some(path) = &cli.evaluate {
        return evaluate(&instance, path);
    }

    let settings = cli.settings()?;
    let model = build_model(&instance);

    let mut solver = CbcSolver::default();
    if let Some(path) = &cli.model {
        solver = solver.with_mps_export(path);
    }

    let report = solve_model(&model, &settings, &solver)?;
    if write_placement(&report, &cli.output)? {
        info!(
            score = report.objective.unwrap_or_default(),
            caches = report.placement.as_ref().map_or(0, |p| p.caches().len()),
            output = %cli.output.display(),
            "placement written"
        );
    } else {
        warn!(status = %report.status, "no usable solution, nothing written");
    }
    Ok(())
}

fn evaluate(instance: &Instance, path: &Path) -> Result<()> {
    let content =
        read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let placement: Placement = content
        .parse()
        .with_context(|| format!("failed to parse {}", path.display()))?;
    placement.check(instance)?;
    info!(
        score = %placement.savings(instance),
        caches = placement.caches().len(),
        "placement is valid"
    );
    Ok(())
}
