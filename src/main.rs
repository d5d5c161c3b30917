//! `parity` command-line front end: a price CSV in, allocation tables out.

use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::ValueEnum;
use parity_rs::portfolio::Objective;
use parity_rs::portfolio::OptimizationConfig;
use parity_rs::portfolio::PortfolioEngine;
use parity_rs::portfolio::PortfolioReport;
use parity_rs::portfolio::PortfolioWeights;
use parity_rs::portfolio::ReturnsMatrix;
use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "parity")]
#[command(version, about = "Risk parity and mean-variance allocations from a price history")]
struct Cli {
  /// CSV with a `date` column (%Y-%m-%d) followed by one price column per asset.
  #[arg(long)]
  prices: PathBuf,

  /// Mean-variance objective: minrisk, maxret, utility or sharpe.
  #[arg(long, default_value = "sharpe")]
  objective: String,

  /// Risk-free rate per period.
  #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
  risk_free: f64,

  /// Exponential decay for moment estimation, 1 for equal weights.
  #[arg(long, default_value_t = 1.0)]
  decay: f64,

  /// Relaxed risk parity penalty.
  #[arg(long, default_value_t = 1.0)]
  penalty: f64,

  /// Minimum expected return per period.
  #[arg(long, allow_negative_numbers = true)]
  min_return: Option<f64>,

  /// Risk aversion of the utility objective.
  #[arg(long, default_value_t = 2.0)]
  risk_aversion: f64,

  /// Number of efficient frontier points.
  #[arg(long, default_value_t = 20)]
  points: usize,

  #[arg(long, value_enum, default_value_t = LogLevel::Info)]
  log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
}

impl LogLevel {
  fn as_str(self) -> &'static str {
    match self {
      LogLevel::Trace => "trace",
      LogLevel::Debug => "debug",
      LogLevel::Info => "info",
      LogLevel::Warn => "warn",
      LogLevel::Error => "error",
    }
  }
}

fn setup_logging(level: &str) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  setup_logging(cli.log_level.as_str());

  let objective: Objective = cli.objective.parse()?;
  let config = OptimizationConfig {
    objective,
    risk_free: cli.risk_free,
    decay: cli.decay,
    penalty: cli.penalty,
    min_return: cli.min_return,
    risk_aversion: cli.risk_aversion,
    frontier_points: cli.points,
    ..OptimizationConfig::default()
  };

  let returns = read_returns(&cli.prices)?;
  info!(
    path = %cli.prices.display(),
    observations = returns.observations(),
    assets = returns.n_assets(),
    "loaded returns"
  );

  let engine = PortfolioEngine::new(config);
  let report = engine
    .run(&returns)
    .context("portfolio optimization failed")?;

  weights_table(&report, engine.config()).printstd();
  println!();
  frontier_table(&report).printstd();
  Ok(())
}

fn read_returns(path: &Path) -> Result<ReturnsMatrix> {
  let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
  ReturnsMatrix::from_price_csv(file).with_context(|| format!("cannot read {}", path.display()))
}

fn weights_table(report: &PortfolioReport, config: &OptimizationConfig) -> Table {
  let mut columns: Vec<(String, &PortfolioWeights)> =
    vec![("RP".to_string(), &report.risk_parity)];
  for (version, w) in &report.relaxed {
    columns.push((format!("RRP-{version}"), w));
  }
  columns.push((config.objective.to_string(), &report.mean_variance));

  let mut table = Table::new();
  let mut titles = vec![Cell::new("Asset")];
  titles.extend(columns.iter().map(|(name, _)| Cell::new(name)));
  table.set_titles(Row::new(titles));

  for (i, asset) in report.moments.assets().iter().enumerate() {
    let mut cells = vec![Cell::new(asset)];
    cells.extend(
      columns
        .iter()
        .map(|(_, w)| Cell::new(&format!("{:.4}", w.values()[i]))),
    );
    table.add_row(Row::new(cells));
  }

  let moments = &report.moments;
  let summary: [(&str, Vec<f64>); 3] = [
    (
      "Return",
      columns.iter().map(|(_, w)| w.expected_return(moments)).collect(),
    ),
    (
      "Volatility",
      columns.iter().map(|(_, w)| w.volatility(moments)).collect(),
    ),
    (
      "Sharpe",
      columns
        .iter()
        .map(|(_, w)| w.sharpe(moments, config.risk_free))
        .collect(),
    ),
  ];
  for (label, values) in &summary {
    let mut cells = vec![Cell::new(label)];
    cells.extend(values.iter().map(|v| Cell::new(&format!("{v:.6}"))));
    table.add_row(Row::new(cells));
  }

  table
}

fn frontier_table(report: &PortfolioReport) -> Table {
  let mut table = Table::new();
  let mut titles = vec![
    Cell::new("#"),
    Cell::new("Target"),
    Cell::new("Return"),
    Cell::new("Risk"),
  ];
  titles.extend(report.moments.assets().iter().map(|a| Cell::new(a)));
  table.set_titles(Row::new(titles));

  for (k, point) in report.frontier.iter().enumerate() {
    let mut cells = vec![
      Cell::new(&k.to_string()),
      Cell::new(&format!("{:.6}", point.target_return)),
      Cell::new(&format!("{:.6}", point.expected_return)),
      Cell::new(&format!("{:.6}", point.risk)),
    ];
    cells.extend(
      point
        .weights
        .values()
        .iter()
        .map(|w| Cell::new(&format!("{w:.4}"))),
    );
    table.add_row(Row::new(cells));
  }

  table
}
