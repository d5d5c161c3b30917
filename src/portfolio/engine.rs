//! # Portfolio Engine
//!
//! $$
//! (\hat\mu,\hat\Sigma)=\operatorname{Estimate}(R),\qquad
//! \mathbf{w}_m^\*=\operatorname{Optimize}_m(\hat\mu,\hat\Sigma,\rho)
//! $$
//!
//! Estimates moments once per run and fans the independent model solves out
//! over the rayon pool.

use rayon::prelude::*;
use tracing::info;

use super::data::MomentEstimate;
use super::data::ReturnsMatrix;
use super::data::estimate_moments;
use super::frontier::efficient_frontier;
use super::optimizers::optimize_mean_variance;
use super::risk_parity::optimize_relaxed_risk_parity;
use super::risk_parity::optimize_risk_parity;
use super::types::FrontierPoint;
use super::types::OptimizationConfig;
use super::types::PortfolioWeights;
use super::types::RrpVersion;
use crate::error::Result;

/// Every model's output for one returns history.
#[derive(Clone, Debug)]
pub struct PortfolioReport {
  /// Moments shared by every model.
  pub moments: MomentEstimate,
  /// Vanilla risk parity.
  pub risk_parity: PortfolioWeights,
  /// Relaxed risk parity, one entry per version in [`RrpVersion::ALL`] order.
  pub relaxed: Vec<(RrpVersion, PortfolioWeights)>,
  /// The configured mean-variance objective.
  pub mean_variance: PortfolioWeights,
  /// Efficient frontier, ordered by target return.
  pub frontier: Vec<FrontierPoint>,
}

/// Single entry point running every allocation model under one configuration.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: OptimizationConfig,
}

impl PortfolioEngine {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: OptimizationConfig) -> Self {
    Self { config }
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &OptimizationConfig {
    &self.config
  }

  /// Estimate moments with the configured decay.
  pub fn estimate(&self, returns: &ReturnsMatrix) -> Result<MomentEstimate> {
    estimate_moments(returns, self.config.decay)
  }

  pub fn risk_parity(&self, moments: &MomentEstimate) -> Result<PortfolioWeights> {
    optimize_risk_parity(moments, &self.config)
  }

  /// Relaxed risk parity for `version`, overriding the configured one.
  pub fn relaxed_risk_parity(
    &self,
    moments: &MomentEstimate,
    version: RrpVersion,
  ) -> Result<PortfolioWeights> {
    optimize_relaxed_risk_parity(moments, &self.config.with_version(version))
  }

  pub fn mean_variance(&self, moments: &MomentEstimate) -> Result<PortfolioWeights> {
    optimize_mean_variance(moments, &self.config)
  }

  pub fn frontier(&self, moments: &MomentEstimate) -> Result<Vec<FrontierPoint>> {
    efficient_frontier(moments, &self.config)
  }

  /// Estimate once, then solve every model in parallel. The first failing
  /// model's error is returned.
  pub fn run(&self, returns: &ReturnsMatrix) -> Result<PortfolioReport> {
    self.config.validate()?;
    let moments = self.estimate(returns)?;
    info!(
      assets = moments.n_assets(),
      observations = moments.observations(),
      "moments estimated"
    );

    let ((risk_parity, relaxed), (mean_variance, frontier)) = rayon::join(
      || {
        rayon::join(
          || self.risk_parity(&moments),
          || {
            RrpVersion::ALL[..]
              .par_iter()
              .map(|&version| {
                self
                  .relaxed_risk_parity(&moments, version)
                  .map(|w| (version, w))
              })
              .collect::<Result<Vec<_>>>()
          },
        )
      },
      || rayon::join(|| self.mean_variance(&moments), || self.frontier(&moments)),
    );

    let report = PortfolioReport {
      risk_parity: risk_parity?,
      relaxed: relaxed?,
      mean_variance: mean_variance?,
      frontier: frontier?,
      moments,
    };
    info!(
      objective = %self.config.objective,
      frontier_points = report.frontier.len(),
      "portfolio run finished"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;
  use tracing_test::traced_test;

  use super::*;
  use crate::error::PortfolioError;
  use crate::portfolio::types::Objective;

  fn returns() -> ReturnsMatrix {
    // Deterministic, full-rank and mildly correlated.
    let values = Array2::from_shape_fn((120, 4), |(t, j)| {
      let phase = t as f64 * (0.7 + 0.3 * j as f64);
      0.0004 * (j + 1) as f64
        + 0.01 * (1.0 + j as f64 * 0.5) * phase.sin()
        + 0.003 * (t as f64 * 1.3).cos()
    });
    ReturnsMatrix::new(
      vec!["AAA".into(), "BBB".into(), "CCC".into(), "DDD".into()],
      values,
    )
    .unwrap()
  }

  fn assert_valid(w: &PortfolioWeights) {
    assert_eq!(w.len(), 4);
    assert_abs_diff_eq!(w.values().sum(), 1.0, epsilon = 1e-6);
    assert!(w.values().iter().all(|&v| v >= -1e-8));
  }

  #[test]
  #[traced_test]
  fn run_reports_every_model() {
    let engine = PortfolioEngine::new(OptimizationConfig {
      objective: Objective::MinimizeRisk,
      ..OptimizationConfig::default()
    });
    let report = engine.run(&returns()).unwrap();

    assert_valid(&report.risk_parity);
    assert_eq!(report.relaxed.len(), 3);
    for (version, w) in &report.relaxed {
      assert_valid(w);
      assert!(RrpVersion::ALL.contains(version));
    }
    assert_valid(&report.mean_variance);
    assert_eq!(report.frontier.len(), 20);
    assert!(logs_contain("portfolio run finished"));
  }

  #[test]
  fn run_matches_individual_solves() {
    let engine = PortfolioEngine::default();
    let returns = returns();
    let moments = engine.estimate(&returns).unwrap();
    let report = engine.run(&returns).unwrap();

    assert_eq!(report.risk_parity, engine.risk_parity(&moments).unwrap());
    assert_eq!(
      report.relaxed[1].1,
      engine.relaxed_risk_parity(&moments, RrpVersion::B).unwrap()
    );
  }

  #[test]
  fn run_surfaces_the_first_error() {
    let engine = PortfolioEngine::new(OptimizationConfig {
      min_return: Some(1.0),
      ..OptimizationConfig::default()
    });
    assert!(matches!(
      engine.run(&returns()),
      Err(PortfolioError::Infeasible(_))
    ));
  }

  #[test]
  fn insufficient_history_is_reported_before_solving() {
    let values = Array2::from_elem((2, 4), 0.01);
    let short = ReturnsMatrix::new(
      vec!["AAA".into(), "BBB".into(), "CCC".into(), "DDD".into()],
      values,
    )
    .unwrap();
    assert_eq!(
      PortfolioEngine::default().run(&short).unwrap_err(),
      PortfolioError::InsufficientData {
        observations: 2,
        assets: 4
      }
    );
  }
}
