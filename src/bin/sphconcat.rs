//! sphconcat CLI
//!
//! Rebuilds one SPH file per time step from the per-process bricks of a
//! domain-decomposed run:
//!
//! ```sh
//! sphconcat run/index.dfi out/prs_%s.sph
//! sphconcat run/index.dfi out/prs_%s.sph --step 1200 --region 0,0,0,1,1,0
//! sphconcat run/index.dfi out/prs_%s.sph --info
//! ```

use anyhow::Context;
use clap::Parser;
use sphconcat::config::parse_region;
use sphconcat::{ConcatConfig, DomainIndex, FieldAssembler, Precision};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sphconcat")]
#[command(version)]
#[command(about = "Concatenate per-process SPH bricks into one field per time step")]
struct Cli {
    /// Index manifest (.dfi) of the run
    manifest: PathBuf,

    /// Output path template; %s is replaced by the zero-padded step number
    output: String,

    /// Assemble only this simulation step
    #[arg(long)]
    step: Option<i64>,

    /// Division-grid sub-region as i0,j0,k0,i1,j1,k1 (inclusive)
    #[arg(long)]
    region: Option<String>,

    /// Write double precision files
    #[arg(long)]
    double: bool,

    /// Print the decomposition summary as JSON and exit
    #[arg(long)]
    info: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sphconcat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("sphconcat: {:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ConcatConfig::new(&cli.manifest, cli.output);
    if let Some(step) = cli.step {
        config = config.with_step(step);
    }
    if let Some(text) = cli.region.as_deref() {
        config = config.with_region(parse_region(text).context("parsing --region")?);
    }
    if cli.double {
        config = config.with_precision(Precision::Double);
    }

    let domain = DomainIndex::load(&config.manifest)
        .with_context(|| format!("loading manifest {}", config.manifest.display()))?;

    if cli.info {
        println!("{}", serde_json::to_string_pretty(&domain.summary())?);
        return Ok(());
    }
    config.validate()?;

    let positions: Vec<usize> = match config.step {
        Some(step) => vec![domain.step_position(step).with_context(|| {
            format!(
                "step {} is not declared in {}",
                step,
                config.manifest.display()
            )
        })?],
        None => (0..domain.time_slices.len()).collect(),
    };

    let mut session = FieldAssembler::bind(&domain, config.region).with_context(|| {
        format!(
            "assembling first step of {} under {}",
            config.manifest.display(),
            domain.base_dir.join(&domain.dir_path).display()
        )
    })?;

    for position in positions {
        if position != session.current_index() {
            let step = domain.time_slices[position].step;
            session.load_step(position).with_context(|| {
                format!(
                    "assembling step {} under {}",
                    step,
                    domain.base_dir.join(&domain.dir_path).display()
                )
            })?;
        }
        let step = session.current_step().step;
        let out = config.output_path(step);
        session
            .save_with(&out, config.precision)
            .with_context(|| format!("writing {}", out.display()))?;
        info!(step, path = %out.display(), "step written");
    }
    Ok(())
}
