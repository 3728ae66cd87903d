use anyhow::{bail, Context, Result};
use clap::Parser;
use logweave::config::ConfigLoader;
use logweave::weaver::{ProjectProcessor, WeaveOptions};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "logweave", version, about = "Weave logging and action-recording calls into a source tree")]
struct Args {
    /// Root of the source units to weave (read only)
    #[arg(long)]
    input: PathBuf,

    /// Root the woven tree is written to
    #[arg(long)]
    output: PathBuf,

    /// Rule source file or directory; defaults to $LOGWEAVE_RULES_DIR or the working directory
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Do not insert action-recorder calls
    #[arg(long)]
    no_actions: bool,

    /// Error type caught by the exception wrapper
    #[arg(long, default_value = logweave::weaver::injector::DEFAULT_CATCH_TYPE)]
    catch_type: String,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let store = match &args.rules {
        Some(path) => ConfigLoader::load_path(path),
        None => ConfigLoader::load_default(),
    }
    .context("loading logging rules")?;

    let mut options = WeaveOptions::default().with_catch_type(args.catch_type);
    if args.no_actions {
        options = options.without_actions();
    }

    let report = ProjectProcessor::with_options(options)
        .process(&args.input, &args.output, Some(&store))
        .with_context(|| format!("weaving {}", args.input.display()))?;

    for failure in &report.failures {
        warn!("{}: {}", failure.target, failure.reason);
    }
    println!(
        "{} units, {} methods woven, {} skipped, {} failed, {} files copied",
        report.units,
        report.methods_woven,
        report.methods_skipped,
        report.failures.len(),
        report.copied
    );

    if report.units == 0 && report.copied == 0 {
        bail!("no files found under {}", args.input.display());
    }
    Ok(())
}
