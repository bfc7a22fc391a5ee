use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use clap::Parser;
use tierscope::{
    config::{self, Config},
    series::{self, Inputs},
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// path on disk to the configuration file, defaults apply when absent
    #[clap(long)]
    config: Option<PathBuf>,

    /// path to write derived series JSON to, stdout when absent
    #[clap(long)]
    output: Option<PathBuf>,

    /// directory holding the telemetry of one benchmark run
    run_dir: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("Invalid arguments specified")]
    InvalidArgs,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to load tierscope config: {0}")]
    Config(#[from] config::Error),
    #[error(transparent)]
    Series(#[from] series::Error),
    #[error("Failed to serialize derived series: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn run(args: Args) -> Result<(), Error> {
    if !args.run_dir.is_dir() {
        error!("Run directory {} does not exist", args.run_dir.display());
        return Err(Error::InvalidArgs);
    }

    let config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    let inputs = Inputs::load(&config, &args.run_dir)?;
    let derived = series::assemble(&config, &inputs)?;

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    serde_json::to_writer_pretty(&mut writer, &derived)?;
    writeln!(writer)?;
    writer.flush()?;

    if let Some(path) = &args.output {
        info!("Derived series written to {}", path.display());
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting tierscope {version}.");
    let args = Args::parse();
    run(args)
}
