//! # Risk Parity
//!
//! $$
//! \min_{\mathbf{x}>0}\ \tfrac12\mathbf{x}^\top Q\mathbf{x}-\sum_i b_i\ln x_i
//! -\eta\,(\mu-r_{\min}\mathbf 1)^\top\mathbf{x},
//! \qquad \mathbf{w}=\mathbf{x}/\mathbf 1^\top\mathbf{x}
//! $$
//!
//! Vanilla risk budgeting and the three relaxed risk parity variants.
//!
//! At the barrier optimum `x_i (Qx)_i = b_i + eta a_i x_i`: with `eta = 0`
//! every asset contributes its budgeted share of risk, and a positive `eta`
//! is the smallest relaxation of those equalities that meets the return floor.

use std::cell::RefCell;

use ndarray::Array1;
use ndarray::Array2;
use tracing::debug;

use super::data::MomentEstimate;
use super::solver::LongOnly;
use super::solver::barrier_start;
use super::solver::bracket_upper;
use super::solver::bracketed_root;
use super::solver::minimize_log_barrier;
use super::solver::minimize_quadratic;
use super::solver::normalize_weights;
use super::types::OptimizationConfig;
use super::types::PortfolioWeights;
use super::types::RrpVersion;
use crate::error::PortfolioError;
use crate::error::Result;

/// Weights whose risk contributions match the configured budget.
pub fn optimize_risk_parity(
  moments: &MomentEstimate,
  config: &OptimizationConfig,
) -> Result<PortfolioWeights> {
  config.validate()?;
  let budget = config.risk_budget(moments.n_assets())?;
  let q = moments.risk_matrix(config.risk_measure);
  let w = budgeted_barrier(q, &budget, moments.mu(), None, config)?;
  Ok(PortfolioWeights::new(moments.assets().to_vec(), w))
}

/// Relaxed risk parity in the variant selected by `config.version`.
pub fn optimize_relaxed_risk_parity(
  moments: &MomentEstimate,
  config: &OptimizationConfig,
) -> Result<PortfolioWeights> {
  config.validate()?;
  let budget = config.risk_budget(moments.n_assets())?;
  let mu = moments.mu();

  if let Some(r) = config.min_return {
    let best = max_return(mu);
    if r > best {
      return Err(PortfolioError::Infeasible(format!(
        "minimum return {r} exceeds the best asset return {best}"
      )));
    }
  }

  let w = match config.version {
    RrpVersion::A => {
      let q = moments.risk_matrix(config.risk_measure);
      budgeted_barrier(q, &budget, mu, config.min_return, config)?
    }
    RrpVersion::B => {
      let q = penalized_risk(moments, &budget, config) * 2.0;
      let c = Array1::zeros(budget.len());
      let set = match config.min_return {
        Some(r) => LongOnly::with_floor(mu, r)?,
        None => LongOnly::simplex(budget.len()),
      };
      normalize_weights(&minimize_quadratic(&q, &c, &set, &config.solver)?)?
    }
    RrpVersion::C => {
      let q = penalized_risk(moments, &budget, config);
      budgeted_barrier(&q, &budget, mu, config.min_return, config)?
    }
  };

  Ok(PortfolioWeights::new(moments.assets().to_vec(), w))
}

/// `D` with `(Dw)_i = sigma_i w_i - b_i sum_j sigma_j w_j`, the deviation of each
/// asset's standalone risk from its budgeted share.
pub(crate) fn deviation_operator(sigma: &Array1<f64>, budget: &Array1<f64>) -> Array2<f64> {
  let n = sigma.len();
  Array2::from_shape_fn((n, n), |(i, j)| {
    let diag = if i == j { sigma[i] } else { 0.0 };
    diag - budget[i] * sigma[j]
  })
}

/// Risk matrix plus `l D'D`.
fn penalized_risk(
  moments: &MomentEstimate,
  budget: &Array1<f64>,
  config: &OptimizationConfig,
) -> Array2<f64> {
  let d = deviation_operator(&moments.volatilities(), budget);
  moments.risk_matrix(config.risk_measure) + &(d.t().dot(&d) * config.penalty)
}

fn max_return(mu: &Array1<f64>) -> f64 {
  mu.fold(f64::NEG_INFINITY, |m, &v| m.max(v))
}

/// Barrier risk budgeting on `q`, tilted toward `mu` only as far as the floor requires.
fn budgeted_barrier(
  q: &Array2<f64>,
  budget: &Array1<f64>,
  mu: &Array1<f64>,
  floor: Option<f64>,
  config: &OptimizationConfig,
) -> Result<Array1<f64>> {
  let settings = &config.solver;
  let n = budget.len();
  let x0 = barrier_start(q, budget)?;
  let x_free = minimize_log_barrier(q, budget, &Array1::zeros(n), &x0, settings)?;
  let w_free = normalize_weights(&x_free)?;

  let Some(r) = floor else {
    return Ok(w_free);
  };
  if mu.dot(&w_free) >= r {
    return Ok(w_free);
  }

  let hi = max_return(mu);
  if r >= hi {
    return Err(PortfolioError::Infeasible(format!(
      "barrier risk budgeting needs a minimum return below the best asset return {hi}"
    )));
  }
  let lo = mu.fold(f64::INFINITY, |m, &v| m.min(v));
  let range = hi - lo;

  let tilt = mu - r;
  let eta_unit = (budget / &x_free).fold(0.0_f64, |m, &v| m.max(v))
    / tilt.fold(0.0_f64, |m, &v| m.max(v.abs()));

  let warm = RefCell::new(x_free);
  let failure: RefCell<Option<PortfolioError>> = RefCell::new(None);

  let solve_at = |s: f64| -> Result<Array1<f64>> {
    let start = warm.borrow().clone();
    let x = minimize_log_barrier(q, budget, &(&tilt * (s * eta_unit)), &start, settings)?;
    *warm.borrow_mut() = x.clone();
    Ok(x)
  };

  // Zero on failure ends the search early; the stored error is returned below.
  let gap = |s: f64| match solve_at(s) {
    Ok(x) => (mu.dot(&x) / x.sum() - r) / range,
    Err(e) => {
      failure.borrow_mut().get_or_insert(e);
      0.0
    }
  };

  let s_hi = bracket_upper(&gap, 0.0)?;
  if let Some(e) = failure.borrow_mut().take() {
    return Err(e);
  }
  let s = bracketed_root(&gap, 0.0, s_hi)?;
  if let Some(e) = failure.borrow_mut().take() {
    return Err(e);
  }

  debug!(eta = s * eta_unit, floor = r, "return floor binds");
  normalize_weights(&solve_at(s)?)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;
  use ndarray::array;
  use ndarray_rand::RandomExt;
  use rand::SeedableRng;
  use rand::rngs::StdRng;
  use rand_distr::Normal;

  use super::*;
  use crate::portfolio::data::ReturnsMatrix;
  use crate::portfolio::data::estimate_moments;

  fn three_assets() -> MomentEstimate {
    MomentEstimate::new(
      vec!["A".into(), "B".into(), "C".into()],
      array![0.05, 0.08, 0.12],
      array![
        [0.04, 0.006, 0.002],
        [0.006, 0.09, 0.012],
        [0.002, 0.012, 0.16]
      ],
    )
    .unwrap()
  }

  fn assert_valid(w: &PortfolioWeights) {
    assert_abs_diff_eq!(w.values().sum(), 1.0, epsilon = 1e-6);
    assert!(w.values().iter().all(|&v| v >= -1e-8));
  }

  #[test]
  fn risk_contributions_are_equal() {
    let moments = three_assets();
    let w = optimize_risk_parity(&moments, &OptimizationConfig::default()).unwrap();

    assert_valid(&w);
    for share in w.relative_risk_contributions(&moments).iter() {
      assert_abs_diff_eq!(*share, 1.0 / 3.0, epsilon = 1e-6);
    }
  }

  #[test]
  fn diagonal_covariance_gives_inverse_volatility() {
    let moments = MomentEstimate::new(
      vec!["A".into(), "B".into()],
      array![0.01, 0.02],
      array![[0.01, 0.0], [0.0, 0.04]],
    )
    .unwrap();
    let w = optimize_risk_parity(&moments, &OptimizationConfig::default()).unwrap();

    // 1/0.1 : 1/0.2
    assert_abs_diff_eq!(w.values()[0], 2.0 / 3.0, epsilon = 1e-7);
    assert_abs_diff_eq!(w.values()[1], 1.0 / 3.0, epsilon = 1e-7);
  }

  #[test]
  fn custom_budget_is_honoured() {
    let moments = three_assets();
    let config = OptimizationConfig {
      risk_budget: Some(vec![0.5, 0.3, 0.2]),
      ..OptimizationConfig::default()
    };
    let w = optimize_risk_parity(&moments, &config).unwrap();
    let shares = w.relative_risk_contributions(&moments);

    assert_abs_diff_eq!(shares[0], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(shares[1], 0.3, epsilon = 1e-6);
    assert_abs_diff_eq!(shares[2], 0.2, epsilon = 1e-6);
  }

  #[test]
  fn version_a_without_binding_floor_is_vanilla() {
    let moments = three_assets();
    let config = OptimizationConfig::default();
    let vanilla = optimize_risk_parity(&moments, &config).unwrap();

    let free = optimize_relaxed_risk_parity(&moments, &config).unwrap();
    let slack = optimize_relaxed_risk_parity(
      &moments,
      &OptimizationConfig {
        min_return: Some(0.0),
        ..config.clone()
      },
    )
    .unwrap();

    for i in 0..3 {
      assert_abs_diff_eq!(free.values()[i], vanilla.values()[i], epsilon = 1e-12);
      assert_abs_diff_eq!(slack.values()[i], vanilla.values()[i], epsilon = 1e-12);
    }
  }

  #[test]
  fn binding_floor_is_met_by_every_version() {
    let moments = three_assets();
    for version in RrpVersion::ALL {
      let config = OptimizationConfig {
        version,
        min_return: Some(0.09),
        ..OptimizationConfig::default()
      };
      let w = optimize_relaxed_risk_parity(&moments, &config).unwrap();

      assert_valid(&w);
      assert!(
        w.expected_return(&moments) >= 0.09 - 1e-7,
        "version {version} missed the floor"
      );
    }
  }

  #[test]
  fn version_a_tilts_only_as_far_as_needed() {
    let moments = three_assets();
    let config = OptimizationConfig {
      min_return: Some(0.09),
      ..OptimizationConfig::default()
    };
    let w = optimize_relaxed_risk_parity(&moments, &config).unwrap();
    assert_abs_diff_eq!(w.expected_return(&moments), 0.09, epsilon = 1e-7);
  }

  #[test]
  fn floor_above_best_return_is_infeasible() {
    let moments = three_assets();
    for version in RrpVersion::ALL {
      let config = OptimizationConfig {
        version,
        min_return: Some(0.13),
        ..OptimizationConfig::default()
      };
      assert!(matches!(
        optimize_relaxed_risk_parity(&moments, &config),
        Err(PortfolioError::Infeasible(_))
      ));
    }
  }

  #[test]
  fn floor_at_best_return() {
    let moments = three_assets();
    let a = OptimizationConfig {
      min_return: Some(0.12),
      ..OptimizationConfig::default()
    };
    assert!(matches!(
      optimize_relaxed_risk_parity(&moments, &a),
      Err(PortfolioError::Infeasible(_))
    ));

    let w = optimize_relaxed_risk_parity(&moments, &a.with_version(RrpVersion::B)).unwrap();
    assert_abs_diff_eq!(w.values()[2], 1.0, epsilon = 1e-8);
  }

  #[test]
  fn zero_penalty_reduces_b_to_minimum_variance_and_c_to_a() {
    let moments = MomentEstimate::new(
      vec!["A".into(), "B".into(), "C".into()],
      array![0.01, 0.02, 0.03],
      Array2::from_diag(&array![0.01, 0.02, 0.04]),
    )
    .unwrap();
    let config = OptimizationConfig {
      penalty: 0.0,
      ..OptimizationConfig::default()
    };

    let b = optimize_relaxed_risk_parity(&moments, &config.with_version(RrpVersion::B)).unwrap();
    // inverse variance 100 : 50 : 25
    assert_abs_diff_eq!(b.values()[0], 4.0 / 7.0, epsilon = 1e-6);
    assert_abs_diff_eq!(b.values()[1], 2.0 / 7.0, epsilon = 1e-6);
    assert_abs_diff_eq!(b.values()[2], 1.0 / 7.0, epsilon = 1e-6);

    let a = optimize_relaxed_risk_parity(&moments, &config).unwrap();
    let c = optimize_relaxed_risk_parity(&moments, &config.with_version(RrpVersion::C)).unwrap();
    for i in 0..3 {
      assert_abs_diff_eq!(a.values()[i], c.values()[i], epsilon = 1e-12);
    }
  }

  #[test]
  fn penalty_pulls_b_toward_budgeted_standalone_risk() {
    let moments = three_assets();
    let sigma = moments.volatilities();
    let budget = Array1::from_elem(3, 1.0 / 3.0);
    let deviation = |w: &PortfolioWeights| {
      let d = deviation_operator(&sigma, &budget).dot(w.values());
      d.dot(&d)
    };

    let config = OptimizationConfig {
      version: RrpVersion::B,
      penalty: 0.0,
      ..OptimizationConfig::default()
    };
    let loose = optimize_relaxed_risk_parity(&moments, &config).unwrap();
    let tight = optimize_relaxed_risk_parity(
      &moments,
      &OptimizationConfig {
        penalty: 100.0,
        ..config
      },
    )
    .unwrap();

    assert!(deviation(&tight) < deviation(&loose));
  }

  #[test]
  fn negative_penalty_is_rejected() {
    let config = OptimizationConfig {
      penalty: -0.5,
      version: RrpVersion::C,
      ..OptimizationConfig::default()
    };
    assert!(matches!(
      optimize_relaxed_risk_parity(&three_assets(), &config),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn sampled_moments_give_valid_weights() {
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Array2::random_using((250, 5), Normal::new(0.0005, 0.01).unwrap(), &mut rng);
    let assets = (0..5).map(|i| format!("X{i}")).collect();
    let returns = ReturnsMatrix::new(assets, noise).unwrap();
    let moments = estimate_moments(&returns, 0.97).unwrap();

    let mu = moments.mu();
    let lo = mu.fold(f64::INFINITY, |m, &v| m.min(v));
    let hi = mu.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let floor = lo + 0.8 * (hi - lo);

    let rp = optimize_risk_parity(&moments, &OptimizationConfig::default()).unwrap();
    assert_valid(&rp);

    for version in RrpVersion::ALL {
      let config = OptimizationConfig {
        version,
        min_return: Some(floor),
        ..OptimizationConfig::default()
      };
      let w = optimize_relaxed_risk_parity(&moments, &config).unwrap();
      assert_valid(&w);
      assert!(w.expected_return(&moments) >= floor - 1e-6 * (hi - lo));
    }
  }
}
