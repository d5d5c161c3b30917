//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Configuration enums, the per-solve parameter bundle and the weight
//! containers handed to reporting.

use std::fmt::Display;
use std::str::FromStr;

use impl_new_derive::ImplNew;
use ndarray::Array1;

use super::data::MomentEstimate;
use crate::error::PortfolioError;
use crate::error::Result;

/// Risk measure used by every model. Only variance is supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RiskMeasure {
  #[default]
  Variance,
}

/// Mean-variance objective.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Objective {
  /// Minimum variance on the long-only simplex.
  MinimizeRisk,
  /// Maximum expected return on the long-only simplex.
  MaximizeReturn,
  /// Mean minus scaled variance, `mu'w - (lambda / 2) w'Sigma w`.
  MaximizeUtility,
  /// Tangency portfolio.
  #[default]
  MaximizeSharpe,
}

impl FromStr for Objective {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "minrisk" | "min-risk" | "minimize-risk" | "minimizerisk" => Ok(Self::MinimizeRisk),
      "maxret" | "max-return" | "maximize-return" | "maximizereturn" => Ok(Self::MaximizeReturn),
      "utility" | "max-utility" | "maximize-utility" | "maximizeutility" => {
        Ok(Self::MaximizeUtility)
      }
      "sharpe" | "max-sharpe" | "maximize-sharpe" | "maximizesharpe" => Ok(Self::MaximizeSharpe),
      _ => Err(PortfolioError::InvalidObjective(s.to_string())),
    }
  }
}

impl Display for Objective {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Objective::MinimizeRisk => write!(f, "MinRisk"),
      Objective::MaximizeReturn => write!(f, "MaxRet"),
      Objective::MaximizeUtility => write!(f, "Utility"),
      Objective::MaximizeSharpe => write!(f, "Sharpe"),
    }
  }
}

/// Relaxed risk parity variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RrpVersion {
  /// Barrier risk budgeting whose contribution equalities absorb the return floor.
  #[default]
  A,
  /// Minimum variance with a quadratic penalty on standalone-risk deviations.
  B,
  /// Version A with the version B penalty folded into the quadratic form.
  C,
}

impl RrpVersion {
  /// All versions, in reporting order.
  pub const ALL: [RrpVersion; 3] = [RrpVersion::A, RrpVersion::B, RrpVersion::C];
}

impl FromStr for RrpVersion {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim() {
      "A" | "a" => Ok(Self::A),
      "B" | "b" => Ok(Self::B),
      "C" | "c" => Ok(Self::C),
      _ => Err(PortfolioError::InvalidVersion(s.to_string())),
    }
  }
}

impl Display for RrpVersion {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RrpVersion::A => write!(f, "A"),
      RrpVersion::B => write!(f, "B"),
      RrpVersion::C => write!(f, "C"),
    }
  }
}

/// Iteration caps and stopping tolerances of the two solver backends.
#[derive(Clone, Copy, Debug)]
pub struct SolverSettings {
  /// Maximum interior-point iterations per quadratic program.
  pub max_iters: u32,
  /// Feasibility and duality-gap tolerance of the quadratic programs.
  pub tolerance: f64,
  /// Maximum L-BFGS iterations per barrier solve.
  pub barrier_max_iters: u64,
  /// Gradient norm at which L-BFGS stops.
  pub barrier_tolerance: f64,
}

impl Default for SolverSettings {
  fn default() -> Self {
    Self {
      max_iters: 200,
      tolerance: 1e-9,
      barrier_max_iters: 1_000,
      barrier_tolerance: 1e-11,
    }
  }
}

/// Immutable parameter bundle for a single solve.
#[derive(Clone, Debug)]
pub struct OptimizationConfig {
  /// Risk measure behind every quadratic form the solvers see.
  pub risk_measure: RiskMeasure,
  /// Mean-variance objective.
  pub objective: Objective,
  /// Risk-free rate used by the Sharpe objective and reporting.
  pub risk_free: f64,
  /// Exponential decay for moment estimation, `1.0` is equal weighting.
  pub decay: f64,
  /// Relaxed risk parity variant.
  pub version: RrpVersion,
  /// Relaxed risk parity penalty coefficient `l`.
  pub penalty: f64,
  /// Minimum expected portfolio return. Used by relaxed risk parity,
  /// minimum risk and utility objectives.
  pub min_return: Option<f64>,
  /// Target risk-contribution shares; equal when `None`.
  pub risk_budget: Option<Vec<f64>>,
  /// Risk aversion for [`Objective::MaximizeUtility`].
  pub risk_aversion: f64,
  /// Number of efficient frontier points.
  pub frontier_points: usize,
  /// Solver caps and tolerance.
  pub solver: SolverSettings,
}

impl Default for OptimizationConfig {
  fn default() -> Self {
    Self {
      risk_measure: RiskMeasure::Variance,
      objective: Objective::MaximizeSharpe,
      risk_free: 0.0,
      decay: 1.0,
      version: RrpVersion::A,
      penalty: 1.0,
      min_return: None,
      risk_budget: None,
      risk_aversion: 2.0,
      frontier_points: 20,
      solver: SolverSettings::default(),
    }
  }
}

impl OptimizationConfig {
  /// Same configuration with a different relaxed risk parity version.
  pub fn with_version(&self, version: RrpVersion) -> Self {
    Self {
      version,
      ..self.clone()
    }
  }

  /// Same configuration with a different mean-variance objective.
  pub fn with_objective(&self, objective: Objective) -> Self {
    Self {
      objective,
      ..self.clone()
    }
  }

  /// Check scalar parameters for range and finiteness.
  pub fn validate(&self) -> Result<()> {
    if !self.risk_free.is_finite() {
      return Err(PortfolioError::InvalidInput(
        "risk-free rate must be finite".to_string(),
      ));
    }
    if !(self.decay > 0.0 && self.decay <= 1.0) {
      return Err(PortfolioError::InvalidInput(format!(
        "decay factor must lie in (0, 1], got {}",
        self.decay
      )));
    }
    if !(self.penalty.is_finite() && self.penalty >= 0.0) {
      return Err(PortfolioError::InvalidInput(format!(
        "penalty must be finite and non-negative, got {}",
        self.penalty
      )));
    }
    if !(self.risk_aversion.is_finite() && self.risk_aversion >= 0.0) {
      return Err(PortfolioError::InvalidInput(format!(
        "risk aversion must be finite and non-negative, got {}",
        self.risk_aversion
      )));
    }
    if let Some(r) = self.min_return {
      if !r.is_finite() {
        return Err(PortfolioError::InvalidInput(
          "minimum return must be finite".to_string(),
        ));
      }
    }
    if self.solver.max_iters == 0 || self.solver.barrier_max_iters == 0 {
      return Err(PortfolioError::InvalidInput(
        "solver iteration caps must be positive".to_string(),
      ));
    }
    if !(self.solver.tolerance > 0.0 && self.solver.barrier_tolerance > 0.0) {
      return Err(PortfolioError::InvalidInput(
        "solver tolerance must be positive".to_string(),
      ));
    }
    Ok(())
  }

  /// Resolve the risk budget for `n` assets, normalized to sum to one.
  pub fn risk_budget(&self, n: usize) -> Result<Array1<f64>> {
    let Some(b) = &self.risk_budget else {
      return Ok(Array1::from_elem(n, 1.0 / n as f64));
    };

    if b.len() != n {
      return Err(PortfolioError::InvalidInput(format!(
        "risk budget has {} entries for {} assets",
        b.len(),
        n
      )));
    }
    if b.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
      return Err(PortfolioError::InvalidInput(
        "risk budget entries must be positive and finite".to_string(),
      ));
    }

    let total: f64 = b.iter().sum();
    Ok(b.iter().map(|&v| v / total).collect())
  }
}

/// Long-only weights, one per asset, indexed like the asset set.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioWeights {
  assets: Vec<String>,
  weights: Array1<f64>,
}

impl PortfolioWeights {
  pub(crate) fn new(assets: Vec<String>, weights: Array1<f64>) -> Self {
    debug_assert_eq!(assets.len(), weights.len());
    Self { assets, weights }
  }

  /// Asset identifiers.
  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  /// Raw weight vector.
  pub fn values(&self) -> &Array1<f64> {
    &self.weights
  }

  /// Number of assets.
  pub fn len(&self) -> usize {
    self.weights.len()
  }

  pub fn is_empty(&self) -> bool {
    self.weights.is_empty()
  }

  /// Weight of a single asset.
  pub fn get(&self, asset: &str) -> Option<f64> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|i| self.weights[i])
  }

  /// `(asset, weight)` pairs in asset order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
    self
      .assets
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
  }

  /// Model expected return `mu'w`.
  pub fn expected_return(&self, moments: &MomentEstimate) -> f64 {
    self.weights.dot(moments.mu())
  }

  /// Portfolio variance `w'Sigma w`.
  pub fn variance(&self, moments: &MomentEstimate) -> f64 {
    self.weights.dot(&moments.cov().dot(&self.weights))
  }

  /// Portfolio standard deviation.
  pub fn volatility(&self, moments: &MomentEstimate) -> f64 {
    self.variance(moments).max(0.0).sqrt()
  }

  /// Sharpe ratio `(mu'w - rf) / sigma_p`; zero when the portfolio is riskless.
  pub fn sharpe(&self, moments: &MomentEstimate, risk_free: f64) -> f64 {
    let volatility = self.volatility(moments);
    if volatility > 1e-15 {
      (self.expected_return(moments) - risk_free) / volatility
    } else {
      0.0
    }
  }

  /// Risk contributions `w_i (Sigma w)_i`; they sum to the portfolio variance.
  pub fn risk_contributions(&self, moments: &MomentEstimate) -> Array1<f64> {
    &self.weights * &moments.cov().dot(&self.weights)
  }

  /// Risk contributions as shares of total variance.
  pub fn relative_risk_contributions(&self, moments: &MomentEstimate) -> Array1<f64> {
    let rc = self.risk_contributions(moments);
    let total = rc.sum();
    if total.abs() > 1e-300 {
      rc / total
    } else {
      Array1::zeros(self.len())
    }
  }
}

/// One point on the efficient frontier.
#[derive(ImplNew, Clone, Debug)]
pub struct FrontierPoint {
  /// Return floor imposed at this step.
  pub target_return: f64,
  /// Realized expected return of the solution.
  pub expected_return: f64,
  /// Realized standard deviation of the solution.
  pub risk: f64,
  /// Minimum-variance weights for the target.
  pub weights: PortfolioWeights,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_tags_are_rejected() {
    assert_eq!(
      "D".parse::<RrpVersion>(),
      Err(PortfolioError::InvalidVersion("D".to_string()))
    );
    assert_eq!(
      "kelly".parse::<Objective>(),
      Err(PortfolioError::InvalidObjective("kelly".to_string()))
    );
    assert_eq!("b".parse::<RrpVersion>(), Ok(RrpVersion::B));
    assert_eq!("Sharpe".parse::<Objective>(), Ok(Objective::MaximizeSharpe));
    assert_eq!("MinRisk".parse::<Objective>(), Ok(Objective::MinimizeRisk));
  }

  #[test]
  fn risk_budget_defaults_to_equal_and_normalizes() {
    let config = OptimizationConfig::default();
    let b = config.risk_budget(4).unwrap();
    assert!(b.iter().all(|&v| (v - 0.25).abs() < 1e-15));

    let config = OptimizationConfig {
      risk_budget: Some(vec![1.0, 3.0]),
      ..OptimizationConfig::default()
    };
    let b = config.risk_budget(2).unwrap();
    assert!((b[0] - 0.25).abs() < 1e-15);
    assert!((b[1] - 0.75).abs() < 1e-15);

    assert!(matches!(
      config.risk_budget(3),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn validate_rejects_out_of_range_parameters() {
    let bad_decay = OptimizationConfig {
      decay: 0.0,
      ..OptimizationConfig::default()
    };
    assert!(bad_decay.validate().is_err());

    let bad_penalty = OptimizationConfig {
      penalty: -1.0,
      ..OptimizationConfig::default()
    };
    assert!(bad_penalty.validate().is_err());

    assert!(OptimizationConfig::default().validate().is_ok());
  }
}
