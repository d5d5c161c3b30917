//! # Efficient Frontier
//!
//! $$
//! \sigma^\*(t)=\min_{\mathbf{w}\in\Delta,\ \mu^\top\mathbf{w}\ge t}
//! \sqrt{\mathbf{w}^\top\Sigma\mathbf{w}},
//! \qquad t_k=t_0+\frac{k}{K-1}\left(\max_i\mu_i-t_0\right)
//! $$

use ndarray::Array1;
use tracing::debug;
use tracing::warn;

use super::data::MomentEstimate;
use super::optimizers::minimum_variance;
use super::types::FrontierPoint;
use super::types::OptimizationConfig;
use super::types::PortfolioWeights;
use crate::error::PortfolioError;
use crate::error::Result;

/// Return range, relative to the spread of asset means, treated as empty.
const DEGENERATE_RANGE: f64 = 1e-6;

/// Trace `config.frontier_points` minimum-variance portfolios from the global
/// minimum-variance return up to the best single-asset return.
///
/// If the minimum-variance portfolio already earns the best return, up to
/// solver tolerance, the frontier is that single point.
pub fn efficient_frontier(
  moments: &MomentEstimate,
  config: &OptimizationConfig,
) -> Result<Vec<FrontierPoint>> {
  config.validate()?;
  let points = config.frontier_points;
  if points < 2 {
    return Err(PortfolioError::InvalidInput(format!(
      "efficient frontier needs at least 2 points, got {points}"
    )));
  }

  let mu = moments.mu();
  let hi = mu.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
  let lo = mu.fold(f64::INFINITY, |m, &v| m.min(v));

  let w = minimum_variance(moments, None, config)?;
  let start = mu.dot(&w);
  let point = |target: f64, w: &Array1<f64>| {
    let weights = PortfolioWeights::new(moments.assets().to_vec(), w.clone());
    FrontierPoint::new(
      target,
      weights.expected_return(moments),
      weights.volatility(moments),
      weights,
    )
  };

  let mut frontier = Vec::with_capacity(points);
  frontier.push(point(start, &w));

  if hi - start <= DEGENERATE_RANGE * (hi - lo) {
    warn!(
      start,
      best = hi,
      "minimum-variance portfolio already earns the best return"
    );
    return Ok(frontier);
  }

  let step = (hi - start) / (points - 1) as f64;
  for k in 1..points {
    let target = if k == points - 1 {
      hi
    } else {
      start + step * k as f64
    };
    let w = minimum_variance(moments, Some(target), config)?;
    frontier.push(point(target, &w));
  }

  debug!(points = frontier.len(), "efficient frontier traced");
  Ok(frontier)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn moments() -> MomentEstimate {
    MomentEstimate::new(
      vec!["A".into(), "B".into(), "C".into(), "D".into()],
      array![0.04, 0.06, 0.09, 0.12],
      array![
        [0.010, 0.002, 0.001, 0.000],
        [0.002, 0.030, 0.004, 0.002],
        [0.001, 0.004, 0.060, 0.010],
        [0.000, 0.002, 0.010, 0.120]
      ],
    )
    .unwrap()
  }

  #[test]
  fn frontier_is_monotone() {
    let moments = moments();
    let frontier = efficient_frontier(&moments, &OptimizationConfig::default()).unwrap();
    assert_eq!(frontier.len(), 20);

    for pair in frontier.windows(2) {
      assert!(pair[1].expected_return > pair[0].expected_return);
      assert!(pair[1].risk >= pair[0].risk - 1e-9);
    }

    let last = frontier.last().unwrap();
    assert_abs_diff_eq!(last.target_return, 0.12, epsilon = 1e-15);
    assert_abs_diff_eq!(last.weights.values()[3], 1.0, epsilon = 1e-8);

    for p in &frontier {
      assert_abs_diff_eq!(p.weights.values().sum(), 1.0, epsilon = 1e-6);
      assert!(p.expected_return >= p.target_return - 1e-10);
    }
  }

  #[test]
  fn frontier_starts_at_minimum_variance() {
    let moments = moments();
    let frontier = efficient_frontier(&moments, &OptimizationConfig::default()).unwrap();
    let min_risk = frontier
      .iter()
      .map(|p| p.risk)
      .fold(f64::INFINITY, f64::min);
    assert_abs_diff_eq!(frontier[0].risk, min_risk, epsilon = 1e-9);
  }

  #[test]
  fn too_few_points_is_rejected() {
    let config = OptimizationConfig {
      frontier_points: 1,
      ..OptimizationConfig::default()
    };
    assert!(matches!(
      efficient_frontier(&moments(), &config),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn degenerate_range_collapses_to_one_point() {
    // The least risky asset also has the highest mean and no hedge exists.
    let moments = MomentEstimate::new(
      vec!["A".into(), "B".into()],
      array![0.10, 0.05],
      array![[0.01, 0.02], [0.02, 0.09]],
    )
    .unwrap();
    let config = OptimizationConfig {
      frontier_points: 5,
      ..OptimizationConfig::default()
    };
    let frontier = efficient_frontier(&moments, &config).unwrap();
    assert_eq!(frontier.len(), 1);
  }

  #[test]
  fn two_points_span_the_whole_range() {
    let config = OptimizationConfig {
      frontier_points: 2,
      ..OptimizationConfig::default()
    };
    let frontier = efficient_frontier(&moments(), &config).unwrap();
    assert_eq!(frontier.len(), 2);
    assert_abs_diff_eq!(frontier[1].expected_return, 0.12, epsilon = 1e-9);
  }
}
