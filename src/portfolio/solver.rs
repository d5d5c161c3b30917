//! # Solver Kernels
//!
//! $$
//! \min_{\mathbf{x}\ge 0,\ \mathbf{e}^\top\mathbf{x}=1}\ \tfrac12\mathbf{x}^\top Q\mathbf{x}
//! +\mathbf{c}^\top\mathbf{x},
//! \qquad
//! \min_{\mathbf{z}}\ \tfrac12 e^{\mathbf{z}\top}Qe^{\mathbf{z}}-\mathbf{b}^\top\mathbf{z}
//! -\mathbf{t}^\top e^{\mathbf{z}}
//! $$
//!
//! Long-only quadratic programs go through the `clarabel` interior-point
//! solver. The log-barrier risk-budgeting objective is minimized by `argmin`
//! L-BFGS in log coordinates, so every iterate stays strictly positive.
//! Hitting an iteration cap is reported as [`PortfolioError::Infeasible`].

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::State;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use clarabel::algebra::CscMatrix;
use clarabel::solver::DefaultSettingsBuilder;
use clarabel::solver::DefaultSolver;
use clarabel::solver::IPSolver;
use clarabel::solver::SolverStatus;
use clarabel::solver::SupportedConeT::NonnegativeConeT;
use clarabel::solver::SupportedConeT::ZeroConeT;
use nalgebra::DMatrix;
use ndarray::Array1;
use ndarray::Array2;
use roots::SimpleConvergency;
use roots::find_root_brent;
use tracing::debug;

use super::types::SolverSettings;
use crate::error::PortfolioError;
use crate::error::Result;

const MAX_BRACKET_DOUBLINGS: usize = 200;
/// L-BFGS history length.
const LBFGS_MEMORY: usize = 10;
/// Largest accepted barrier gradient, relative to the largest budget entry.
const BARRIER_ACCEPTANCE: f64 = 1e-7;

/// Long-only feasible set `{x >= 0, e'x = 1}`, optionally intersected with a
/// return floor `d'x >= level` or with some assets pinned at zero.
pub(crate) struct LongOnly {
  normal: Array1<f64>,
  floor: Option<(Array1<f64>, f64)>,
  pinned: Vec<usize>,
}

impl LongOnly {
  /// Probability simplex.
  pub(crate) fn simplex(n: usize) -> Self {
    Self::hyperplane(Array1::ones(n))
  }

  /// Non-negative orthant intersected with `normal'x = 1`.
  pub(crate) fn hyperplane(normal: Array1<f64>) -> Self {
    Self {
      normal,
      floor: None,
      pinned: Vec::new(),
    }
  }

  /// Simplex with `mu'w >= floor`.
  ///
  /// Fails with [`PortfolioError::Infeasible`] when `floor` exceeds every
  /// asset return. A floor equal to the best return leaves only the top
  /// assets free.
  pub(crate) fn with_floor(mu: &Array1<f64>, floor: f64) -> Result<Self> {
    let hi = mu.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let lo = mu.fold(f64::INFINITY, |m, &v| m.min(v));

    if floor > hi {
      return Err(PortfolioError::Infeasible(format!(
        "minimum return {floor} exceeds the best asset return {hi}"
      )));
    }

    let mut set = Self::simplex(mu.len());
    if floor <= lo {
      return Ok(set);
    }

    if floor == hi {
      set.pinned = mu
        .iter()
        .enumerate()
        .filter(|&(_, &m)| m < hi)
        .map(|(i, _)| i)
        .collect();
    } else {
      let range = hi - lo;
      set.floor = Some((mu.mapv(|m| (m - lo) / range), (floor - lo) / range));
    }
    Ok(set)
  }

  fn dim(&self) -> usize {
    self.normal.len()
  }

  /// Constraint data in clarabel's `Ax + s = b`, `s in K` form: the budget
  /// row and pinned assets in the zero cone, the floor and `x >= 0` in the
  /// non-negative cone.
  fn constraints(&self) -> (CscMatrix<f64>, Vec<f64>, usize, usize) {
    let n = self.dim();
    let zero_rows = 1 + self.pinned.len();
    let floor_rows = usize::from(self.floor.is_some());

    let columns = (0..n)
      .map(|j| {
        let mut column = vec![(0, self.normal[j])];
        if let Some(k) = self.pinned.iter().position(|&i| i == j) {
          column.push((1 + k, 1.0));
        }
        if let Some((direction, _)) = &self.floor {
          column.push((zero_rows, -direction[j]));
        }
        column.push((zero_rows + floor_rows + j, -1.0));
        column
      })
      .collect();

    let mut b = vec![0.0; zero_rows + floor_rows + n];
    b[0] = 1.0;
    if let Some((_, level)) = &self.floor {
      b[zero_rows] = -level;
    }

    let rows = b.len();
    (csc(rows, columns), b, zero_rows, floor_rows + n)
  }
}

/// Column-major sparse matrix from per-column `(row, value)` entries in row order.
fn csc(rows: usize, columns: Vec<Vec<(usize, f64)>>) -> CscMatrix<f64> {
  let n = columns.len();
  let mut colptr = Vec::with_capacity(n + 1);
  let mut rowval = Vec::new();
  let mut nzval = Vec::new();

  colptr.push(0);
  for column in columns {
    for (row, value) in column {
      if value != 0.0 {
        rowval.push(row);
        nzval.push(value);
      }
    }
    colptr.push(rowval.len());
  }

  CscMatrix::new(rows, n, colptr, rowval, nzval)
}

/// Clip rounding noise below zero and rescale onto the simplex.
pub(crate) fn normalize_weights(x: &Array1<f64>) -> Result<Array1<f64>> {
  let clipped = x.mapv(|v| v.max(0.0));
  let total = clipped.sum();
  if !(total > 0.0 && total.is_finite()) {
    return Err(PortfolioError::Infeasible(
      "solution has no positive weight".to_string(),
    ));
  }
  Ok(clipped / total)
}

/// Smallest `from + 2^k` (k >= 0) at which the nondecreasing `g` is non-negative.
pub(crate) fn bracket_upper<G: Fn(f64) -> f64>(g: &G, from: f64) -> Result<f64> {
  let mut width = 1.0;
  for _ in 0..MAX_BRACKET_DOUBLINGS {
    let hi = from + width;
    if g(hi) >= 0.0 {
      return Ok(hi);
    }
    width *= 2.0;
  }
  Err(PortfolioError::Infeasible(
    "could not bracket the constraint multiplier".to_string(),
  ))
}

/// Brent root of a continuous `g` with `g(lo) <= 0 <= g(hi)`, searched on the
/// unit interval so the tolerance is relative to the bracket.
pub(crate) fn bracketed_root<G: Fn(f64) -> f64>(g: &G, lo: f64, hi: f64) -> Result<f64> {
  let span = hi - lo;
  let mut convergency = SimpleConvergency {
    eps: 1e-14,
    max_iter: 500,
  };

  find_root_brent(0.0, 1.0, |s: f64| g(lo + s * span), &mut convergency)
    .map(|s| lo + s * span)
    .map_err(|e| PortfolioError::Infeasible(format!("multiplier search failed: {e:?}")))
}

/// Minimize `0.5 x'Qx + c'x` over `set` with the clarabel interior-point solver.
///
/// The objective is rescaled by the largest diagonal entry of `Q` first, which
/// leaves the minimizer unchanged and keeps the stopping tolerances meaningful
/// for daily-scale covariances.
pub(crate) fn minimize_quadratic(
  q: &Array2<f64>,
  c: &Array1<f64>,
  set: &LongOnly,
  settings: &SolverSettings,
) -> Result<Array1<f64>> {
  let n = set.dim();
  let scale = q.diag().fold(0.0_f64, |m, &v| m.max(v.abs()));
  if !(scale > 0.0 && scale.is_finite()) {
    return Err(PortfolioError::Infeasible(
      "quadratic form has no positive curvature".to_string(),
    ));
  }

  let p = csc(
    n,
    (0..n)
      .map(|j| (0..=j).map(|i| (i, q[[i, j]] / scale)).collect::<Vec<_>>())
      .collect(),
  );
  let linear: Vec<f64> = c.iter().map(|v| v / scale).collect();
  let (a, b, zero_rows, nonnegative_rows) = set.constraints();
  let cones = [ZeroConeT(zero_rows), NonnegativeConeT(nonnegative_rows)];

  let ipm_settings = DefaultSettingsBuilder::default()
    .max_iter(settings.max_iters)
    .tol_gap_abs(settings.tolerance)
    .tol_gap_rel(settings.tolerance)
    .tol_feas(settings.tolerance)
    .verbose(false)
    .build()
    .map_err(|e| PortfolioError::InvalidInput(format!("interior-point settings: {e}")))?;

  let mut solver = DefaultSolver::new(&p, &linear, &a, &b, &cones, ipm_settings)
    .map_err(|e| PortfolioError::Infeasible(format!("interior-point setup failed: {e:?}")))?;
  solver.solve();

  if !matches!(
    solver.solution.status,
    SolverStatus::Solved | SolverStatus::AlmostSolved
  ) {
    return Err(PortfolioError::Infeasible(format!(
      "interior-point solve ended with status {:?}",
      solver.solution.status
    )));
  }

  debug!(objective = solver.solution.obj_val * scale, "quadratic program solved");
  Ok(Array1::from(solver.solution.x.clone()))
}

/// `0.5 x'Qx - b'z - t'x` at `x = exp(z)`.
#[derive(Clone)]
struct LogBarrier {
  q: Array2<f64>,
  budget: Array1<f64>,
  tilt: Array1<f64>,
}

impl LogBarrier {
  fn point(z: &[f64]) -> Array1<f64> {
    z.iter().map(|v| v.exp()).collect()
  }

  /// Gradient in log coordinates, `x * (Qx - t) - b`; zero exactly at the
  /// budgeted optimum `x_i (Qx)_i = b_i + t_i x_i`.
  fn residual(&self, x: &Array1<f64>) -> Array1<f64> {
    (x * &(self.q.dot(x) - &self.tilt)) - &self.budget
  }
}

impl CostFunction for LogBarrier {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, z: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let x = Self::point(z);
    let log_budget: f64 = self.budget.iter().zip(z).map(|(b, z)| b * z).sum();
    Ok(0.5 * x.dot(&self.q.dot(&x)) - log_budget - self.tilt.dot(&x))
  }
}

impl Gradient for LogBarrier {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, z: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    Ok(self.residual(&Self::point(z)).to_vec())
  }
}

/// Strictly positive start `x_i = sqrt(b_i / Q_ii)`, exact when `Q` is diagonal.
///
/// The barrier is bounded below only for a positive definite `Q`, so anything
/// else is rejected here.
pub(crate) fn barrier_start(q: &Array2<f64>, budget: &Array1<f64>) -> Result<Array1<f64>> {
  let n = q.nrows();
  if DMatrix::from_fn(n, n, |i, j| q[[i, j]]).cholesky().is_none() {
    return Err(PortfolioError::Infeasible(
      "risk matrix is not positive definite".to_string(),
    ));
  }

  let diag = q.diag();
  Ok(Array1::from_shape_fn(budget.len(), |i| (budget[i] / diag[i]).sqrt()))
}

fn barrier_error(e: argmin::core::Error) -> PortfolioError {
  PortfolioError::Infeasible(format!("barrier solve failed: {e}"))
}

/// Minimize `0.5 x'Qx - sum b_i ln x_i - tilt'x` over `x > 0`, starting at `x0`.
pub(crate) fn minimize_log_barrier(
  q: &Array2<f64>,
  budget: &Array1<f64>,
  tilt: &Array1<f64>,
  x0: &Array1<f64>,
  settings: &SolverSettings,
) -> Result<Array1<f64>> {
  let problem = LogBarrier {
    q: q.clone(),
    budget: budget.clone(),
    tilt: tilt.clone(),
  };
  let z0: Vec<f64> = x0.iter().map(|v| v.ln()).collect();

  let linesearch = MoreThuenteLineSearch::new()
    .with_c(1e-4, 0.9)
    .map_err(barrier_error)?;
  let solver = LBFGS::new(linesearch, LBFGS_MEMORY)
    .with_tolerance_grad(settings.barrier_tolerance)
    .map_err(barrier_error)?;

  let result = Executor::new(problem.clone(), solver)
    .configure(|state| state.param(z0).max_iters(settings.barrier_max_iters))
    .run()
    .map_err(barrier_error)?;

  let state = result.state();
  let z = state.get_param().ok_or_else(|| {
    PortfolioError::Infeasible("barrier solve returned no point".to_string())
  })?;
  let x = LogBarrier::point(z);

  let residual = problem
    .residual(&x)
    .fold(0.0_f64, |m, v| m.max(v.abs()));
  let b_max = budget.fold(0.0_f64, |m, &v| m.max(v));
  if !(residual <= BARRIER_ACCEPTANCE * b_max) {
    return Err(PortfolioError::Infeasible(format!(
      "barrier solve stopped after {} iterations with residual {residual:e}",
      state.get_iter()
    )));
  }

  debug!(iterations = state.get_iter(), residual, "barrier L-BFGS converged");
  Ok(x)
}
