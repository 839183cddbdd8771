use std::path::PathBuf;
use std::process;

use clap::Parser;
use thiserror::Error;

use forecast_core::instrument::RunRecorder;
use forecast_core::instrument::polars::prelude::PolarsError;
use forecast_core::{AllocationError, Scenario, ScenarioError, Year};

#[derive(Parser, Debug)]
#[command(
    name = "hu-forecast",
    about = "Allocate yearly housing-unit demand onto parcels with remaining capacity"
)]
struct Cli {
    #[arg(long, help = "Scenario JSON with parcels, sites, controls and demand")]
    scenario: PathBuf,
    #[arg(long, default_value_t = 2018)]
    start: Year,
    #[arg(long, default_value_t = 2050)]
    end: Year,
    #[arg(long, help = "Random seed; overrides the scenario's seed")]
    seed: Option<u64>,
    #[arg(long, default_value = "data/runs", help = "Parent directory for recorded runs")]
    out: PathBuf,
    #[arg(long, help = "Write recorded tables as parquet")]
    write: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("failed to record run: {0}")]
    Record(#[from] PolarsError),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("hu-forecast: {e}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.start > cli.end {
        return Err(ScenarioError::YearRange {
            start: cli.start,
            end: cli.end,
        }
        .into());
    }

    let mut scenario = Scenario::load(&cli.scenario)?.normalize()?;
    if let Some(seed) = cli.seed {
        scenario.seed = seed;
    }
    let mut rec = RunRecorder::new(&cli.out, &scenario.name, scenario.seed, cli.start..=cli.end);
    println!(
        "{}: {} parcels, {} scheduled sites, seed {}",
        scenario.name,
        scenario.ledger.len(),
        scenario.sites.len(),
        scenario.seed
    );

    let mut sim = scenario.into_simulation();
    println!(
        "{:>6} {:>8} {:>9} {:>6} {:>8} {:>8} {:>10} {:>9}",
        "year", "demand", "scheduled", "adu", "regional", "residual", "correction", "shortfall"
    );
    for year in cli.start..=cli.end {
        let s = sim.run_year(year)?;
        println!(
            "{:>6} {:>8} {:>9} {:>6} {:>8} {:>8} {:>10} {:>9}",
            s.year, s.demand, s.scheduled, s.adu, s.regional, s.residual, s.correction, s.shortfall
        );
    }
    sim.ledger.record_snapshot(cli.end);

    let run = &sim.summary;
    println!(
        "total: demand {} built {} shortfall {}",
        run.total_demand(),
        run.total_built(),
        run.total_shortfall()
    );

    let dfs = rec.take()?;
    match dfs.get("shortfall") {
        Some(df) => println!("\nshortfalls:\n{df}"),
        None => println!("\nno shortfalls"),
    }

    if cli.write {
        let dir = rec.persist()?;
        println!("wrote {}", dir.display());
    } else {
        println!("not written; pass --write to save to {}", rec.run_dir().display());
    }
    Ok(())
}
