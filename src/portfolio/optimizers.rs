//! # Mean-Variance Optimizers
//!
//! $$
//! \max_{\mathbf{w}\in\Delta}\ \mu^\top\mathbf{w}-\frac{\lambda}{2}\mathbf{w}^\top\Sigma\mathbf{w},
//! \qquad
//! \max_{\mathbf{w}\in\Delta}\
//! \frac{\mu^\top\mathbf{w}-r_f}{\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}}}
//! $$
//!
//! Long-only Markowitz objectives. The tangency portfolio is found through the
//! homogenized problem `min y'Sigma y` with `(mu - rf)'y = 1`, `y >= 0`.

use ndarray::Array1;
use tracing::debug;

use super::data::MomentEstimate;
use super::solver::LongOnly;
use super::solver::minimize_quadratic;
use super::solver::normalize_weights;
use super::types::Objective;
use super::types::OptimizationConfig;
use super::types::PortfolioWeights;
use crate::error::PortfolioError;
use crate::error::Result;

/// Solve the mean-variance objective selected by `config.objective`.
///
/// `config.min_return` applies to minimum risk, maximum return and utility;
/// the Sharpe objective ignores it.
pub fn optimize_mean_variance(
  moments: &MomentEstimate,
  config: &OptimizationConfig,
) -> Result<PortfolioWeights> {
  config.validate()?;

  let w = match config.objective {
    Objective::MinimizeRisk => minimum_variance(moments, config.min_return, config)?,
    Objective::MaximizeReturn => maximum_return(moments, config.min_return)?,
    Objective::MaximizeUtility => maximum_utility(moments, config)?,
    Objective::MaximizeSharpe => maximum_sharpe(moments, config)?,
  };

  debug!(objective = %config.objective, "mean-variance solve finished");
  Ok(PortfolioWeights::new(moments.assets().to_vec(), w))
}

/// Long-only feasible set, with the return floor when one is given.
fn feasible_set(moments: &MomentEstimate, floor: Option<f64>) -> Result<LongOnly> {
  match floor {
    Some(r) => LongOnly::with_floor(moments.mu(), r),
    None => Ok(LongOnly::simplex(moments.n_assets())),
  }
}

/// Minimum risk on the simplex with an optional return floor.
pub(crate) fn minimum_variance(
  moments: &MomentEstimate,
  floor: Option<f64>,
  config: &OptimizationConfig,
) -> Result<Array1<f64>> {
  let q = moments.risk_matrix(config.risk_measure) * 2.0;
  let c = Array1::zeros(moments.n_assets());
  let x = minimize_quadratic(&q, &c, &feasible_set(moments, floor)?, &config.solver)?;
  normalize_weights(&x)
}

/// All weight on the best asset; ties go to the lower variance, then the lower index.
fn maximum_return(moments: &MomentEstimate, floor: Option<f64>) -> Result<Array1<f64>> {
  let mu = moments.mu();
  let cov = moments.cov();

  let mut best = 0;
  for i in 1..mu.len() {
    if mu[i] > mu[best] || (mu[i] == mu[best] && cov[[i, i]] < cov[[best, best]]) {
      best = i;
    }
  }

  if let Some(r) = floor {
    if r > mu[best] {
      return Err(PortfolioError::Infeasible(format!(
        "minimum return {r} exceeds the best asset return {}",
        mu[best]
      )));
    }
  }

  let mut w = Array1::zeros(mu.len());
  w[best] = 1.0;
  Ok(w)
}

fn maximum_utility(moments: &MomentEstimate, config: &OptimizationConfig) -> Result<Array1<f64>> {
  let lambda = config.risk_aversion;
  if lambda == 0.0 {
    return maximum_return(moments, config.min_return);
  }

  let q = moments.risk_matrix(config.risk_measure) * lambda;
  let c = -moments.mu();
  let set = feasible_set(moments, config.min_return)?;
  normalize_weights(&minimize_quadratic(&q, &c, &set, &config.solver)?)
}

fn maximum_sharpe(moments: &MomentEstimate, config: &OptimizationConfig) -> Result<Array1<f64>> {
  let risk_free = config.risk_free;
  let excess = moments.mu() - risk_free;
  let top_excess = excess.fold(f64::NEG_INFINITY, |m, &v| m.max(v));

  if !(top_excess > 0.0) {
    return Err(PortfolioError::Infeasible(format!(
      "no asset earns more than the risk-free rate {risk_free}"
    )));
  }

  // Scaling the constraint leaves the normalized solution unchanged.
  let set = LongOnly::hyperplane(excess / top_excess);
  let q = moments.risk_matrix(config.risk_measure) * 2.0;
  let y = minimize_quadratic(&q, &Array1::zeros(moments.n_assets()), &set, &config.solver)?;
  normalize_weights(&y)
}
