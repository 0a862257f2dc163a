use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use reservoir_sim::allocation::FloorPolicy;
use reservoir_sim::analysis::{self, DistStats};
use reservoir_sim::baseline::{self, BaselineModel};
use reservoir_sim::config::{ReservoirConfig, ScenarioConfig};
use reservoir_sim::demand::DeliveryFactors;
use reservoir_sim::hydrology::HydrologyTable;
use reservoir_sim::kpi::{self, RunKpis};
use reservoir_sim::montecarlo::{self, McOutcome, MonteCarloConfig, Resampling};
use reservoir_sim::sensitivity::{self, SensitivityGrid, SensitivityRow};
use reservoir_sim::simulation::SimulationRunner;
use reservoir_sim::types::HydroYear;

#[derive(Parser)]
#[command(name = "reservoir-sim")]
#[command(about = "Monthly allocation simulator for a partitioned reservoir", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the scenario years once and write every month as NDJSON.
    Run {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, default_value = "results.ndjson")]
        output: PathBuf,
        /// Per-year summary CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Resample the historical years into many independent runs.
    MonteCarlo {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, default_value_t = 100)]
        runs: usize,
        /// Years per run.
        #[arg(long, default_value_t = 30)]
        horizon: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Draw years with replacement (bootstrap).
        #[arg(long)]
        with_replacement: bool,
        /// Per-run KPI CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Scan delivery factor × initial stock over consecutive blocks of years.
    /// The grid sets FE and initial stock, so `--fe-a`, `--fe-b` and
    /// `--initial-fraction` are rejected here.
    Sensitivity {
        #[command(flatten)]
        common: CommonArgs,
        /// Delivery factors to scan (repeatable). Defaults to 0.5..1.0 step 0.1.
        #[arg(long = "fe")]
        delivery_factors: Vec<f64>,
        /// Block lengths in years (repeatable). Defaults to 5, 10 and 15.
        #[arg(long = "block")]
        blocks: Vec<usize>,
        #[arg(long, default_value = "sensitivity.csv")]
        csv: PathBuf,
    },

    /// Run the single-pool comparison model.
    Baseline {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, default_value = "baseline.ndjson")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Hydrology NDJSON: one {year, month, inflow, sub_basins} record per line.
    #[arg(long)]
    hydrology: PathBuf,
    /// Reservoir description JSON. Missing fields take canonical values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// First hydrological year of the scenario.
    #[arg(long, default_value_t = 1989)]
    first_year: u16,
    /// Last hydrological year of the scenario (inclusive).
    #[arg(long, default_value_t = 2018)]
    last_year: u16,
    #[arg(long, default_value_t = 1.0)]
    fe_a: f64,
    #[arg(long, default_value_t = 1.0)]
    fe_b: f64,
    /// Initial stock of every account as a fraction of its capacity.
    #[arg(long, default_value_t = 0.0)]
    initial_fraction: f64,
    /// Forgive unpaid SSR at each year boundary.
    #[arg(long)]
    reset_backlog: bool,
    /// Let an empty sector draw on the reserve floor.
    #[arg(long)]
    tap_floor: bool,
    #[arg(long)]
    quiet: bool,
}

impl CommonArgs {
    fn load(&self) -> Result<(ReservoirConfig, ScenarioConfig, HydrologyTable)> {
        let mut reservoir = match &self.config {
            Some(path) => {
                let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
                ReservoirConfig::from_json(BufReader::new(file))
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => ReservoirConfig::canonical(),
        };
        if self.tap_floor {
            reservoir.floor_policy = FloorPolicy::TapWhenSectorEmpty;
        }

        let file = File::open(&self.hydrology)
            .with_context(|| format!("failed to open {}", self.hydrology.display()))?;
        let hydrology = HydrologyTable::read_ndjson(BufReader::new(file))?;
        tracing::info!(years = hydrology.len_years(), path = %self.hydrology.display(), "hydrology loaded");

        let scenario = ScenarioConfig {
            years: (self.first_year..=self.last_year).map(HydroYear).collect(),
            delivery: DeliveryFactors { a: self.fe_a, b: self.fe_b },
            initial: reservoir.capacities.scaled(self.initial_fraction),
            carry_backlog: !self.reset_backlog,
        };
        Ok((reservoir, scenario, hydrology))
    }

    /// Fail when a flag the sensitivity grid overrides was set.
    fn reject_grid_axes(&self) -> Result<()> {
        if self.fe_a != 1.0 || self.fe_b != 1.0 {
            bail!("--fe-a/--fe-b have no effect on a sensitivity scan; use --fe");
        }
        if self.initial_fraction != 0.0 {
            bail!("--initial-fraction has no effect on a sensitivity scan; the grid scans 0, 25, 50, 75 and 100 %");
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Run { common, output, csv } => {
            let (reservoir, scenario, hydrology) = common.load()?;
            let mut runner = SimulationRunner::from_config(&reservoir, scenario, &hydrology)?;
            runner.run()?;
            let results = runner.results();

            write_ndjson(&output, results)?;
            if let Some(path) = csv {
                write_annual_csv(&path, &kpi::annual_summaries(results))?;
            }
            if !common.quiet {
                println!("Months simulated: {} → {}", results.len(), output.display());
                print_kpis(&kpi::aggregate(results));
            }
        }

        Commands::MonteCarlo { common, runs, horizon, seed, with_replacement, csv } => {
            let (reservoir, template, hydrology) = common.load()?;
            let mc = MonteCarloConfig {
                runs,
                years_per_run: horizon,
                seed,
                resampling: if with_replacement { Resampling::WithReplacement } else { Resampling::WithoutReplacement },
            };
            let outcomes = montecarlo::run_monte_carlo(&reservoir, &template, &hydrology, &mc)?;

            if let Some(path) = csv {
                write_runs_csv(&path, &outcomes)?;
            }
            if !common.quiet {
                match analysis::summarise_runs(&outcomes) {
                    Some(summary) if outcomes.len() >= 2 => {
                        print_distributions(&summary);
                        let annual: Vec<_> = outcomes.iter().map(|o| o.annual.clone()).collect();
                        print_positions(&analysis::position_distributions(&annual));
                    }
                    _ => eprintln!("Warning: Distribution requires >= 2 runs"),
                }
            }
        }

        Commands::Sensitivity { common, delivery_factors, blocks, csv } => {
            common.reject_grid_axes()?;
            let (reservoir, template, hydrology) = common.load()?;
            let mut grid = SensitivityGrid::canonical();
            if !delivery_factors.is_empty() {
                grid.delivery_factors = delivery_factors;
            }
            if !blocks.is_empty() {
                grid.block_years = blocks;
            }
            let rows = sensitivity::run_grid(&reservoir, &template, &hydrology, &grid)?;
            write_sensitivity_csv(&csv, &rows)?;
            if !common.quiet {
                print_block_means(&sensitivity::mean_over_blocks(&rows));
            }
        }

        Commands::Baseline { common, output } => {
            let (reservoir, scenario, hydrology) = common.load()?;
            let months = BaselineModel::from_config(&reservoir).run(&reservoir, &scenario, &hydrology)?;
            write_ndjson(&output, &months)?;
            if !common.quiet {
                let k = baseline::aggregate(&months);
                println!("Months simulated: {} → {}", k.months, output.display());
                println!("Deficit total:      {:>10.1} Hm³", k.deficit);
                println!("Satisfaction:       {:>10.1} %", k.satisfaction);
                println!("Turbined volume:    {:>10.1} Hm³", k.turbined);
                println!("Spill:              {:>10.1} Hm³", k.spill);
                println!("Ending storage:     {:>10.1} Hm³", k.ending_storage);
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn write_ndjson<T: serde::Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut w = create(path)?;
    for r in records {
        serde_json::to_writer(&mut w, r).context("failed to serialize record")?;
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}

fn write_annual_csv(path: &Path, years: &[kpi::AnnualSummary]) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "year_index,year,deficit_a,deficit_b,deficit_total,turbined,demand,mean_satisfaction,worst_month")?;
    for y in years {
        writeln!(
            w,
            "{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.4},{}",
            y.year_index,
            y.year,
            y.deficit_a,
            y.deficit_b,
            y.deficit_total,
            y.turbined,
            y.demand,
            y.mean_satisfaction,
            y.worst_month.map(|m| m.label()).unwrap_or("none"),
        )?;
    }
    w.flush()?;
    Ok(())
}

fn write_runs_csv(path: &Path, outcomes: &[McOutcome]) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "run,seed,years,deficit_total,deficit_with_fe,satisfaction,turbined,spill,mean_available_flow,ending_storage")?;
    for o in outcomes {
        let years: Vec<String> = o.years.iter().map(|y| y.0.to_string()).collect();
        let k = &o.kpis;
        writeln!(
            w,
            "{},{},{},{:.6},{:.6},{:.4},{:.6},{:.6},{:.6},{:.6}",
            o.run,
            o.seed,
            years.join(" "),
            k.deficit_total,
            k.deficit_with_fe,
            k.satisfaction,
            k.turbined,
            k.spill,
            k.mean_available_flow,
            k.ending_stocks.total(),
        )?;
    }
    w.flush()?;
    Ok(())
}

fn write_sensitivity_csv(path: &Path, rows: &[SensitivityRow]) -> Result<()> {
    let mut w = create(path)?;
    writeln!(
        w,
        "block_years,block_index,interval_start,interval_end,fe,initial,deficit_total,deficit_with_fe,spill,satisfaction,ending_storage,turbined,mean_available_flow"
    )?;
    for r in rows {
        let k = &r.kpis;
        writeln!(
            w,
            "{},{},{},{},{:.2},{:.2},{:.6},{:.6},{:.6},{:.4},{:.6},{:.6},{:.6}",
            r.block_years,
            r.block_index,
            r.interval_start.0,
            r.interval_end.0,
            r.fe,
            r.initial,
            k.deficit_total,
            k.deficit_with_fe,
            k.spill,
            k.satisfaction,
            k.ending_stocks.total(),
            k.turbined,
            k.mean_available_flow,
        )?;
    }
    w.flush()?;
    Ok(())
}

fn print_kpis(k: &RunKpis) {
    println!("\n=== Run KPIs (Hm³) ===");
    println!("Deficit A / B / total: {:>8.1} {:>8.1} {:>8.1}", k.deficit_a, k.deficit_b, k.deficit_total);
    println!("Deficit incl. FE:      {:>8.1}", k.deficit_with_fe);
    println!("Support A / B:         {:>8.1} {:>8.1}", k.support_a, k.support_b);
    println!("Floor draws:           {:>8.1}", k.floor_draw);
    println!(
        "Satisfaction A / B / total: {:>5.1}% {:>5.1}% {:>5.1}%",
        k.satisfaction_a, k.satisfaction_b, k.satisfaction
    );
    println!("Turbined:              {:>8.1}", k.turbined);
    println!("Spill:                 {:>8.1}", k.spill);
    println!("SSR paid / backlog:    {:>8.2} {:>8.2}", k.ssr_paid, k.ending_backlog);
    println!("Mean available flow:   {:>8.2} /month", k.mean_available_flow);
    println!(
        "Ending stocks R / A / B: {:>7.1} {:>7.1} {:>7.1}",
        k.ending_stocks.reserve, k.ending_stocks.sector_a, k.ending_stocks.sector_b
    );
}

fn dist_row(label: &str, d: &DistStats) {
    println!(
        "{:<16} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1}",
        label, d.min, d.p5, d.p10, d.p50, d.p90, d.p95, d.max, d.mean
    );
}

fn print_distributions(s: &analysis::McSummary) {
    println!("\n=== Monte Carlo Distribution (N={}) ===", s.runs);
    println!(
        "{:<16} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9}",
        "Metric", "min", "p5", "p10", "p50", "p90", "p95", "max", "mean"
    );
    println!("{}", "-".repeat(112));
    dist_row("Deficit (Hm³)", &s.deficit_total);
    dist_row("Satisfaction %", &s.satisfaction);
    dist_row("Turbined (Hm³)", &s.turbined);
    dist_row("Spill (Hm³)", &s.spill);
    dist_row("Avail. flow", &s.available_flow);
    dist_row("End storage", &s.ending_storage);
    println!("Best run: {}   Worst run: {}", s.best_run, s.worst_run);
}

fn print_positions(positions: &[analysis::PositionDist]) {
    println!("\n=== Annual deficit by simulated year ===");
    println!("{:>4} | {:>8} | {:>8} | {:>8} | {:>8}", "Year", "p5", "p50", "p95", "Sat p50%");
    for p in positions {
        println!(
            "{:>4} | {:>8.1} | {:>8.1} | {:>8.1} | {:>7.1}%",
            p.year_index + 1,
            p.deficit_total.p5,
            p.deficit_total.p50,
            p.deficit_total.p95,
            p.mean_satisfaction.p50,
        );
    }
}

fn print_block_means(cells: &[sensitivity::CellMean]) {
    println!("\n=== Sensitivity (mean over blocks) ===");
    println!(
        "{:>5} | {:>4} | {:>7} | {:>6} | {:>9} | {:>9} | {:>9} | {:>9} | {:>6} | {:>9}",
        "Block", "FE", "Init", "Blocks", "Deficit", "FE short", "Def+FE", "Spill", "Sat%", "EndStore"
    );
    for c in cells {
        println!(
            "{:>5} | {:>4.1} | {:>6.0}% | {:>6} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>6.1} | {:>9.1}",
            c.block_years,
            c.fe,
            c.initial * 100.0,
            c.blocks,
            c.deficit_total,
            c.fe_shortfall,
            c.deficit_with_fe,
            c.spill,
            c.satisfaction,
            c.ending_storage,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(args: &[&str]) -> CommonArgs {
        let mut argv = vec!["reservoir-sim", "sensitivity", "--hydrology", "flows.ndjson"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().cmd {
            Commands::Sensitivity { common, .. } => common,
            _ => unreachable!(),
        }
    }

    #[test]
    fn sensitivity_accepts_default_scenario_flags() {
        assert!(common(&[]).reject_grid_axes().is_ok());
        assert!(common(&["--reset-backlog", "--tap-floor"]).reject_grid_axes().is_ok());
    }

    #[test]
    fn sensitivity_rejects_overridden_flags() {
        assert!(common(&["--fe-a", "0.7"]).reject_grid_axes().is_err());
        assert!(common(&["--fe-b", "0.5"]).reject_grid_axes().is_err());
        assert!(common(&["--initial-fraction", "0.5"]).reject_grid_axes().is_err());
    }
}
